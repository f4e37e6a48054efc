use std::fmt;

/// Category of a type, stored in the low five bits of the descriptor's kind byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Invalid = 0,
    Bool,
    Int,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Uintptr,
    Float32,
    Float64,
    Complex64,
    Complex128,
    Array,
    Chan,
    Func,
    Interface,
    Map,
    Pointer,
    Slice,
    String,
    Struct,
    UnsafePointer,
}

const KIND_MASK: u8 = (1 << 5) - 1;

const KIND_NAMES: [&str; 27] = [
    "invalid",
    "bool",
    "int",
    "int8",
    "int16",
    "int32",
    "int64",
    "uint",
    "uint8",
    "uint16",
    "uint32",
    "uint64",
    "uintptr",
    "float32",
    "float64",
    "complex64",
    "complex128",
    "array",
    "chan",
    "func",
    "interface",
    "map",
    "ptr",
    "slice",
    "string",
    "struct",
    "unsafe.Pointer",
];

impl Kind {
    pub fn from_u8(raw: u8) -> Option<Kind> {
        use Kind::*;
        const ALL: [Kind; 27] = [
            Invalid,
            Bool,
            Int,
            Int8,
            Int16,
            Int32,
            Int64,
            Uint,
            Uint8,
            Uint16,
            Uint32,
            Uint64,
            Uintptr,
            Float32,
            Float64,
            Complex64,
            Complex128,
            Array,
            Chan,
            Func,
            Interface,
            Map,
            Pointer,
            Slice,
            String,
            Struct,
            UnsafePointer,
        ];
        ALL.get((raw & KIND_MASK) as usize).copied()
    }

    pub fn name(self) -> &'static str {
        KIND_NAMES[self as usize]
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            Kind::Int | Kind::Int8 | Kind::Int16 | Kind::Int32 | Kind::Int64
        )
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            Kind::Uint | Kind::Uint8 | Kind::Uint16 | Kind::Uint32 | Kind::Uint64 | Kind::Uintptr
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, Kind::Float32 | Kind::Float64)
    }

    pub fn is_complex(self) -> bool {
        matches!(self, Kind::Complex64 | Kind::Complex128)
    }

    pub fn is_numeric(self) -> bool {
        self.is_signed() || self.is_unsigned() || self.is_float() || self.is_complex()
    }

    /// Kinds whose values are a single machine pointer and therefore travel
    /// inside a dynamic value without boxing.
    pub fn is_pointer_shaped(self) -> bool {
        matches!(
            self,
            Kind::Pointer | Kind::UnsafePointer | Kind::Map | Kind::Chan | Kind::Func
        )
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags::bitflags! {
    /// Extra type information flags.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TFlag: u8 {
        const NAMED = 1 << 2;
        /// Equality and hashing may treat the value as a plain byte range.
        const REGULAR_MEMORY = 1 << 3;
        /// The pointer bitmap is built on first use instead of at registration.
        const GC_MASK_ON_DEMAND = 1 << 4;
        /// Values are stored directly in the data word of a dynamic value.
        const DIRECT_IFACE = 1 << 5;
    }
}

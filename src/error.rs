use thiserror::Error;

use crate::abi::Kind;

/// Failures raised by the accessor layer and the reflection bridge.
///
/// Contract violations are turned into panics through [`crate::runtime::fatal`];
/// conversion failures are handed back to the caller as values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("index out of range [{index}] with length {len}")]
    IndexOutOfRange { index: isize, len: usize },

    #[error("type size mismatch: element is {expected} bytes, value is {actual} bytes")]
    TypeSizeMismatch { expected: usize, actual: usize },

    #[error("invalid kind: expected {expected}, got {actual}")]
    InvalidKind { expected: &'static str, actual: Kind },

    #[error("assignment to entry in nil map")]
    NilMap,

    #[error("value of type {from} is not assignable to type {to}")]
    NotAssignable {
        from: &'static str,
        to: &'static str,
    },

    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("parsing {input:?} as {kind}: {reason}")]
    Parse {
        input: String,
        kind: Kind,
        reason: String,
    },

    #[error("value {input:?} out of range for {kind}")]
    OutOfRange { input: String, kind: Kind },

    #[error("hash of unhashable type {name}")]
    Unhashable { name: &'static str },

    #[error("comparing uncomparable type {name}")]
    Uncomparable { name: &'static str },

    #[error("out of memory allocating {bytes} bytes")]
    OutOfMemory { bytes: usize },

    #[error("{0}")]
    Fatal(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;

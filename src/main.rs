use std::error::Error;
use std::time::Instant;

use abiview::abi::{self, GROUP_SLOTS, MAX_ELEM_BYTES, MAX_KEY_BYTES};
use abiview::eface::Eface;
use abiview::maps::{self, CTRL_GROUP_EMPTY, Map, MapRef};
use abiview::runtime::{self, Allocator, ArenaHeap, DEFAULT_ARENA_CHUNK, SystemHeap};
use abiview::slice::SliceHeader;
use abiview::string::StrHeader;
use clap::{Parser as ClapParser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum HeapKind {
    System,
    Arena,
}

cfg_if::cfg_if! {
    if #[cfg(feature = "arena-heap")] {
        const DEFAULT_HEAP: HeapKind = HeapKind::Arena;
    } else {
        const DEFAULT_HEAP: HeapKind = HeapKind::System;
    }
}

#[derive(ClapParser, Debug, Clone)]
#[command(version, about = "Inspect and exercise type-erased container layouts", long_about = None)]
#[command(name = "abiview")]
#[command(bin_name = "abiview")]
pub struct CommandLineArguments {
    #[command(subcommand)]
    command: Command,
    #[clap(long, global = true, default_value = "false")]
    verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Insert, look up, delete, clone and clear maps of the given size
    Bench {
        #[clap(long, default_value = "100000")]
        keys: u64,
        #[clap(long, value_enum)]
        heap: Option<HeapKind>,
        #[clap(long, default_value = "false")]
        show_times: bool,
    },
    /// Print layout constants and descriptor sizes
    Layout,
    /// Clone a small string-keyed map and clear the clone
    Demo,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("ABIVIEW_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn install_heap(kind: HeapKind) -> Result<(), Box<dyn Error>> {
    let heap: Box<dyn Allocator> = match kind {
        HeapKind::System => Box::new(SystemHeap::new()),
        HeapKind::Arena => Box::new(ArenaHeap::new(DEFAULT_ARENA_CHUNK)?),
    };
    runtime::install_allocator(heap).map_err(|_| "heap already installed")?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = CommandLineArguments::parse();
    init_logging(args.verbose);
    match args.command {
        Command::Bench {
            keys,
            heap,
            show_times,
        } => bench(keys, heap.unwrap_or(DEFAULT_HEAP), show_times),
        Command::Layout => {
            layout();
            Ok(())
        }
        Command::Demo => demo(),
    }
}

fn timed<T>(label: &str, show_times: bool, f: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let out = f();
    if show_times {
        println!("{label}: {:?}", start.elapsed());
    }
    out
}

fn bench(keys: u64, heap: HeapKind, show_times: bool) -> Result<(), Box<dyn Error>> {
    install_heap(heap)?;
    info!(keys, heap = ?heap, "starting bench");

    let m = MapRef::<u64, u64>::with_capacity(0);
    timed("insert", show_times, || {
        for k in 0..keys {
            unsafe { m.insert(k, k * 2) };
        }
    });
    let missing = timed("lookup", show_times, || {
        (0..keys).find(|k| unsafe { m.get(k) } != Some(k * 2))
    });
    if let Some(k) = missing {
        return Err(format!("lookup of key {k} failed").into());
    }
    timed("delete half", show_times, || {
        for k in (0..keys).step_by(2) {
            unsafe { m.remove(&k) };
        }
    });

    let words = MapRef::<StrHeader, u64>::new();
    timed("insert strings", show_times, || {
        for k in 0..keys {
            unsafe { words.insert_str(&format!("key-{k}"), k) };
        }
    });
    let missing = timed("lookup strings", show_times, || {
        (0..keys).find(|k| unsafe { words.get_str(&format!("key-{k}")) } != Some(*k))
    });
    if let Some(k) = missing {
        return Err(format!("lookup of string key-{k} failed").into());
    }

    let copy = timed("clone", show_times, || unsafe { words.clone_map() });
    timed("clear clone", show_times, || unsafe { copy.clear() });

    let stats = unsafe { m.stats() };
    let word_stats = unsafe { words.stats() };
    println!("integer map: {stats:?}");
    println!("string map: {word_stats:?}");
    println!("clone after clear: {} entries", unsafe { copy.len() });
    println!("heap ({}): {:?}", runtime::heap().name(), runtime::heap().stats());

    unsafe {
        copy.release();
        words.release();
        m.release();
    }
    Ok(())
}

fn layout() {
    let mt = abi::map_type_of::<StrHeader, i64>();
    println!("group slots: {GROUP_SLOTS}");
    println!("max inline key bytes: {MAX_KEY_BYTES}");
    println!("max inline elem bytes: {MAX_ELEM_BYTES}");
    println!("max table capacity: {}", maps::MAX_TABLE_CAPACITY);
    println!("empty control word: {CTRL_GROUP_EMPTY:#018x}");
    println!("type descriptor: {} bytes", std::mem::size_of::<abi::Type>());
    println!("eface: {} bytes", std::mem::size_of::<Eface>());
    println!("string header: {} bytes", std::mem::size_of::<StrHeader>());
    println!("slice header: {} bytes", std::mem::size_of::<SliceHeader>());
    println!("map header: {} bytes", std::mem::size_of::<Map>());
    println!(
        "{}: group {} bytes, slot {} bytes, elem offset {}",
        mt.typ.name, mt.group_size, mt.slot_size, mt.elem_off
    );
}

fn demo() -> Result<(), Box<dyn Error>> {
    let m = MapRef::<StrHeader, i64>::new();
    unsafe {
        m.insert_str("a", 1);
        m.insert_str("b", 2);
        let a = m.get_str("a").ok_or("key a missing")?;
        println!("get(a) = {a}");
        let c = m.clone_map();
        c.clear();
        println!("clone len = {}", c.len());
        println!("original len = {}", m.len());
        c.release();
        m.release();
    }
    Ok(())
}

use anyhow::Context as _;
use anyhow::Result;

use heapsym::ptmalloc::BinKind;
use heapsym::ptmalloc::GlibcVersion;
use heapsym::Addr;
use heapsym::Pid;
use heapsym::ThreadId;

use clap::ArgAction;
use clap::Args as Arguments;
use clap::Parser;
use clap::Subcommand;


/// Parse a PID from a string.
fn parse_pid(s: &str) -> Result<Pid> {
    let pid = if let Some(s) = s.strip_prefix("0x") {
        u32::from_str_radix(s, 16)
    } else {
        s.parse::<u32>()
    }
    .with_context(|| format!("failed to parse PID: {s}"))?;

    Ok(Pid::from(pid))
}

/// Parse a thread ID from a string.
fn parse_tid(s: &str) -> Result<ThreadId> {
    let tid = s
        .parse::<u32>()
        .with_context(|| format!("failed to parse thread ID: {s}"))?;
    Ok(ThreadId(tid))
}

/// Parse an address from a string.
fn parse_addr(s: &str) -> Result<Addr> {
    // In our world addresses are always represented in hex, with or without 0x
    // prefix.
    Addr::from_str_radix(s.trim_start_matches("0x"), 16)
        .with_context(|| format!("failed to parse address: {s}"))
}

/// Parse a `<tid>=<addr>` pair.
fn parse_thread_pointer(s: &str) -> Result<(ThreadId, Addr)> {
    let (tid, addr) = s
        .split_once('=')
        .with_context(|| format!("thread pointer `{s}` is not of the form <tid>=<addr>"))?;
    Ok((parse_tid(tid)?, parse_addr(addr)?))
}

fn parse_glibc(s: &str) -> Result<GlibcVersion> {
    s.parse::<GlibcVersion>()
        .with_context(|| format!("failed to parse glibc version: {s}"))
}

fn parse_bin(s: &str) -> Result<BinKind> {
    s.parse::<BinKind>()
        .with_context(|| format!("failed to parse bin: {s}"))
}


/// A command line interface for heapsym.
#[derive(Debug, Parser)]
#[clap(version = env!("VERSION"))]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
    #[command(flatten)]
    pub target: Target,
    /// Increase verbosity (can be supplied multiple times).
    #[arg(short = 'v', long = "verbose", global = true, action = ArgAction::Count)]
    pub verbosity: u8,
}


/// Options describing the process to inspect and how.
#[derive(Debug, Arguments)]
pub struct Target {
    /// The PID of the process to inspect.
    #[clap(short, long, global = true)]
    #[arg(value_parser = parse_pid)]
    pub pid: Option<Pid>,
    /// The thread considered selected; the main thread by default.
    #[clap(short, long, global = true)]
    #[arg(value_parser = parse_tid)]
    pub thread: Option<ThreadId>,
    /// The thread pointer of a thread, as <tid>=<addr>, enabling scans
    /// of its thread-local storage (can be supplied multiple times).
    #[clap(long, global = true)]
    #[arg(value_parser = parse_thread_pointer)]
    pub thread_pointer: Vec<(ThreadId, Addr)>,
    /// The glibc release of the process, e.g., 2.35; detected if not
    /// provided.
    #[clap(long, global = true)]
    #[arg(value_parser = parse_glibc)]
    pub glibc: Option<GlibcVersion>,
    /// Use the built-in structure layouts only.
    #[clap(long, global = true)]
    pub builtin_layouts: bool,
    /// Disable heuristics and brute force scans for locating allocator
    /// structures.
    #[clap(long, global = true)]
    pub no_heuristics: bool,
    /// Answer all prompts for brute force scans with yes.
    #[clap(short, long, global = true)]
    pub yes: bool,
}


#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the glibc chunk at an address.
    MallocChunk(MallocChunk),
    /// Inspect jemalloc state.
    #[command(subcommand)]
    Jemalloc(jemalloc::Jemalloc),
    /// Interpret hex bytes as a little endian pointer.
    Unhexify(Unhexify),
}


#[derive(Debug, Arguments)]
pub struct MallocChunk {
    /// The address of the chunk.
    #[arg(value_parser = parse_addr)]
    pub addr: Addr,
    /// The bin the chunk is known to be in (tcache, fast, small, large,
    /// or unsorted); inferred if not provided.
    #[clap(short, long)]
    #[arg(value_parser = parse_bin)]
    pub bin: Option<BinKind>,
    /// Print a hexdump of the chunk's memory.
    #[clap(short, long)]
    pub dump: bool,
}


#[derive(Debug, Arguments)]
pub struct Unhexify {
    /// The hex bytes, e.g., "00 70 75 c1 cd ef 59 00".
    pub data: Vec<String>,
}


pub mod jemalloc {
    use super::*;


    /// A type representing the `jemalloc` command.
    #[derive(Debug, Subcommand)]
    pub enum Jemalloc {
        /// Find the extent containing a pointer.
        FindExtent(FindExtent),
        /// Print the extent described by an `edata_t`.
        ExtentInfo(ExtentInfo),
        /// Print all extents.
        Heap(Heap),
    }

    /// Options shared by all `jemalloc` sub-commands.
    #[derive(Debug, Arguments)]
    pub struct Tree {
        /// The offset of the radix tree root in `je_arena_emap_global`.
        #[clap(long)]
        #[arg(value_parser = parse_addr)]
        pub rtree_root_offset: Option<u64>,
    }

    #[derive(Debug, Arguments)]
    pub struct FindExtent {
        /// The pointer to look up.
        #[arg(value_parser = parse_addr)]
        pub ptr: Addr,
        #[command(flatten)]
        pub tree: Tree,
    }

    #[derive(Debug, Arguments)]
    pub struct ExtentInfo {
        /// The address of the `edata_t`.
        #[arg(value_parser = parse_addr)]
        pub addr: Addr,
        #[command(flatten)]
        pub tree: Tree,
    }

    #[derive(Debug, Arguments)]
    pub struct Heap {
        #[command(flatten)]
        pub tree: Tree,
    }
}

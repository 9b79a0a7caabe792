#![allow(clippy::let_and_return, clippy::let_unit_value)]

mod args;

use std::io::stderr;
use std::io::stdin;
use std::io::BufRead;
use std::io::Write;

use anyhow::Context;
use anyhow::Result;

use heapsym::hex::unhexify;
use heapsym::jemalloc::Jemalloc;
use heapsym::ptmalloc::BinQuery;
use heapsym::ptmalloc::ChunkOpts;
use heapsym::ptmalloc::Heap;
use heapsym::ptmalloc::LayoutPolicy;
use heapsym::ptmalloc::RenderMode;
use heapsym::Confirm;
use heapsym::Process;

use clap::Parser as _;

use tracing::subscriber::set_global_default as set_global_subscriber;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::FmtSubscriber;


/// Ask the operator on the terminal, unless `--yes` was given.
struct Prompt {
    yes: bool,
}

impl Confirm for Prompt {
    fn confirm(&self, prompt: &str) -> bool {
        if self.yes {
            return true
        }

        // Prompts go to stderr so as to not interleave with the
        // rendered output.
        ask(prompt, &mut stdin().lock(), &mut stderr())
    }
}

fn ask<R, W>(prompt: &str, input: &mut R, output: &mut W) -> bool
where
    R: BufRead,
    W: Write,
{
    let _result = write!(output, "{prompt} [y/N] ").and_then(|()| output.flush());
    let mut answer = String::new();
    match input.read_line(&mut answer) {
        Ok(_) => matches!(answer.trim(), "y" | "Y" | "yes"),
        Err(_) => false,
    }
}


fn open(target: &args::Target) -> Result<Process> {
    let pid = target.pid.context("no process to inspect; use --pid")?;
    let builder = target.thread_pointer.iter().fold(
        Process::builder().set_selected_thread(target.thread),
        |builder, (thread, tp)| builder.set_thread_pointer(*thread, *tp),
    );
    let process = builder
        .open(pid)
        .with_context(|| format!("failed to attach to process {pid}"))?;
    Ok(process)
}

/// The handler for the 'malloc-chunk' command.
fn malloc_chunk(target: &args::Target, chunk: args::MallocChunk) -> Result<()> {
    let args::MallocChunk { addr, bin, dump } = chunk;
    let process = open(target)?;
    let prompt = Prompt { yes: target.yes };
    let policy = if target.builtin_layouts {
        LayoutPolicy::Builtin
    } else {
        LayoutPolicy::Auto
    };
    let heap = Heap::builder()
        .set_glibc_version(target.glibc)
        .set_layout_policy(policy)
        .enable_heuristics(!target.no_heuristics)
        .set_confirm(&prompt)
        .build(&process);

    let opts = ChunkOpts {
        bin: bin.map(BinQuery::Explicit).unwrap_or_default(),
        mode: if dump {
            RenderMode::Dump
        } else {
            RenderMode::Summary
        },
    };
    let out = heap
        .malloc_chunk(addr, &opts)
        .with_context(|| format!("failed to print chunk at {addr:#x}"))?;
    print!("{out}");
    Ok(())
}

/// The handler for the 'jemalloc' command.
fn jemalloc(target: &args::Target, jemalloc: args::jemalloc::Jemalloc) -> Result<()> {
    use args::jemalloc::Jemalloc as Cmd;

    let tree = match &jemalloc {
        Cmd::FindExtent(args::jemalloc::FindExtent { tree, .. })
        | Cmd::ExtentInfo(args::jemalloc::ExtentInfo { tree, .. })
        | Cmd::Heap(args::jemalloc::Heap { tree }) => tree,
    };
    let process = open(target)?;
    let model = Jemalloc::builder()
        .set_rtree_root_offset(tree.rtree_root_offset)
        .build(&process);

    let out = match jemalloc {
        Cmd::FindExtent(args::jemalloc::FindExtent { ptr, .. }) => model
            .render_find_extent(ptr)
            .with_context(|| format!("failed to find extent of {ptr:#x}"))?,
        Cmd::ExtentInfo(args::jemalloc::ExtentInfo { addr, .. }) => model
            .render_extent_info(addr)
            .with_context(|| format!("failed to read extent at {addr:#x}"))?,
        Cmd::Heap(..) => model.render_heap().context("failed to enumerate extents")?,
    };
    print!("{out}");
    Ok(())
}

/// The handler for the 'unhexify' command.
fn unhexify_cmd(unhex: args::Unhexify) -> Result<()> {
    let data = unhex.data.join(" ");
    let value = unhexify(&data).context("failed to unhexify input")?;
    println!("{value}");
    Ok(())
}


fn main() -> Result<()> {
    let args = args::Args::parse();
    let level = match args.verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_span_events(FmtSpan::FULL)
        .with_timer(SystemTime)
        .with_writer(stderr)
        .finish();

    let () =
        set_global_subscriber(subscriber).with_context(|| "failed to set tracing subscriber")?;

    match args.command {
        args::Command::MallocChunk(chunk) => malloc_chunk(&args.target, chunk),
        args::Command::Jemalloc(jemalloc) => self::jemalloc(&args.target, jemalloc),
        args::Command::Unhexify(unhex) => unhexify_cmd(unhex),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    use heapsym::Pid;


    /// Check that `--yes` answers prompts without asking.
    #[test]
    fn prompt_yes() {
        let prompt = Prompt { yes: true };
        assert!(prompt.confirm("brute force?"));
    }

    /// Check that answers are read from the input and the question is
    /// written to the given output only.
    #[test]
    fn prompt_answers() {
        let mut output = Vec::new();
        assert!(ask("brute force?", &mut "y\n".as_bytes(), &mut output));
        assert_eq!(output, b"brute force? [y/N] ");

        let mut output = Vec::new();
        assert!(!ask("brute force?", &mut "\n".as_bytes(), &mut output));
        assert!(!ask("brute force?", &mut "".as_bytes(), &mut output));
    }

    /// Make sure that attaching requires a PID.
    #[test]
    fn missing_pid() {
        let args = args::Args::try_parse_from(["heapcli", "jemalloc", "heap"]).unwrap();
        let err = open(&args.target).unwrap_err();
        assert!(err.to_string().contains("--pid"), "{err}");

        let args = args::Args::try_parse_from(["heapcli", "-p", "0", "unhexify", "00"]).unwrap();
        assert_eq!(args.target.pid, Some(Pid::Slf));
    }
}

//! Command-line utility that wires a sample pipeline and prints its diagnostics.

use std::io::{self, Write};
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use demo::{Demo, DemoConfig};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

mod demo;

/// Text rendering helpers used by the CLI commands.
mod render {
    use crate::demo::PacketReport;
    use std::fmt::Write;

    /// Format the decorations the pipeline expects from outside.
    pub fn roots(names: &[String]) -> String {
        let mut out = String::new();
        if names.is_empty() {
            out.push_str("Every input has a producer.\n");
        } else {
            out.push_str("Root decorations:\n");
            for name in names {
                writeln!(out, "  {name}").expect("write root");
            }
        }
        out
    }

    /// Format one line per packet plus a totals line.
    pub fn run_summary(reports: &[PacketReport]) -> String {
        let mut out = String::new();
        for report in reports {
            let line = match (report.sequence, &report.annotated, &report.error) {
                (_, _, Some(error)) => writeln!(out, "packet ?: error: {error}"),
                (Some(sequence), Some(annotated), None) => writeln!(
                    out,
                    "packet {sequence}: motion={} score={}",
                    annotated.motion, annotated.score
                ),
                (Some(sequence), None, None) => writeln!(out, "packet {sequence}: unannotated"),
                (None, _, None) => writeln!(out, "packet ?: no sequence"),
            };
            line.expect("write packet");
        }
        let annotated = reports.iter().filter(|report| report.annotated.is_some()).count();
        writeln!(out, "{annotated}/{} packets annotated", reports.len()).expect("write totals");
        out
    }
}

/// Inspect a sample context tree and its filter graph.
#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect a wired context tree and its filter graph", long_about = None)]
struct Cli {
    /// Packets to push through the pipeline before inspecting.
    #[arg(short, long, default_value_t = 8)]
    packets: usize,

    /// Packet pump threads under the Capture context.
    #[arg(short, long, default_value_t = 2)]
    workers: usize,

    /// Samples per synthetic frame.
    #[arg(long, default_value_t = 16)]
    frame_width: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the context tree.
    Tree,
    /// Print the context tree with each context's runnables.
    Runnables,
    /// Print the filter graph in DOT format.
    Graph,
    /// List decorations no filter produces.
    Roots,
    /// Show which filters supply the inputs of one filter.
    Filter {
        /// Filter type name, e.g. `Overlay`.
        name: String,
    },
    /// Print a JSON snapshot of the whole tree.
    Json,
    /// Push packets and print the per-packet outcome.
    Run,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = DemoConfig {
        workers: cli.workers,
        frame_width: cli.frame_width,
        ..DemoConfig::default()
    };
    let demo = Demo::build(&config)?;
    demo.start()?;
    info!(
        workers = demo.worker_count(),
        filters = demo.factory().registry().len(),
        packets = cli.packets,
        "pipeline started"
    );

    let reports = demo.pump(cli.packets, Duration::from_secs(10))?;
    let result = print_view(&demo, &cli.command, &reports);
    demo.shutdown();
    result
}

fn print_view(demo: &Demo, command: &Command, reports: &[demo::PacketReport]) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match command {
        Command::Tree => introspect::print_tree(&mut out, &demo.root)?,
        Command::Runnables => introspect::print_runnables(&mut out, &demo.root)?,
        Command::Graph => introspect::write_dependency_graph(&mut out, &demo.root)?,
        Command::Roots => {
            let names = introspect::list_root_decorations(&demo.root);
            out.write_all(render::roots(&names).as_bytes())?;
        }
        Command::Filter { name } => {
            let info = introspect::filter_info(&demo.root, name)
                .with_context(|| format!("cannot describe filter `{name}`"))?;
            out.write_all(info.as_bytes())?;
        }
        Command::Json => {
            let json = introspect::to_json(&introspect::snapshot(&demo.root))?;
            writeln!(out, "{json}")?;
        }
        Command::Run => out.write_all(render::run_summary(reports).as_bytes())?,
    }
    out.flush()?;
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Ignore error if already set (e.g., during tests).
    let _ = fmt().with_env_filter(env_filter).with_writer(io::stderr).try_init();
}

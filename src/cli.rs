//! CLI argument parsing for rastreo

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "rastreo")]
#[command(version)]
#[command(about = "Call-tree tracer: instruments compiled units and renders sequence diagrams", long_about = None)]
pub struct Cli {
    /// Enable debug tracing output (to stderr)
    #[arg(long = "debug", global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Insert entry/exit hooks into a raw compiled unit
    Instrument(InstrumentArgs),
    /// Re-render the sequence diagram of a stored trace record
    Render(RenderArgs),
}

#[derive(Args, Debug)]
pub struct InstrumentArgs {
    /// Raw unit file (MessagePack-encoded)
    #[arg(value_name = "CLASS")]
    pub class: PathBuf,

    /// Qualified name of the unit's type, e.g. shop.order.Cart
    #[arg(long = "type-name", value_name = "NAME")]
    pub type_name: String,

    /// Write the (possibly unchanged) unit here
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Agent-style options, e.g. "includePrefixes=shop.;maxDepth=20" (overrides --config)
    #[arg(long = "agent-args", value_name = "ARGS")]
    pub agent_args: Option<String>,

    /// Print the resulting unit in readable form
    #[arg(long = "dump")]
    pub dump: bool,
}

#[derive(Args, Debug)]
pub struct RenderArgs {
    /// Stored trace record (trace.json)
    #[arg(value_name = "RECORD")]
    pub record: PathBuf,

    /// Write the diagram here instead of stdout
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Leave types with this prefix out of the diagram (repeatable)
    #[arg(long = "hide", value_name = "PREFIX")]
    pub hide: Vec<String>,
}

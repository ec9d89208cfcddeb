use anyhow::{Context, Result};
use clap::Parser;
use rastreo::cli::{Cli, Command, InstrumentArgs, RenderArgs};
use rastreo::config::TracerConfig;
use rastreo::diagram::DiagramRenderer;
use rastreo::export::TraceRecord;
use rastreo::transform::Instrumenter;
use rastreo::unit::codec;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_config(args: &InstrumentArgs) -> Result<TracerConfig> {
    if let Some(agent_args) = &args.agent_args {
        return TracerConfig::parse_agent_args(agent_args).context("invalid --agent-args");
    }
    match &args.config {
        Some(path) => TracerConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(TracerConfig::default()),
    }
}

fn run_instrument(args: &InstrumentArgs) -> Result<()> {
    let config = load_config(args)?;
    let raw = std::fs::read(&args.class)
        .with_context(|| format!("failed to read {}", args.class.display()))?;

    let instrumenter = Instrumenter::from_config(&config);
    let (bytes, report) = instrumenter.transform_raw(&args.type_name, &raw);
    print!("{report}");

    if let Some(output) = &args.output {
        std::fs::write(output, bytes.as_ref())
            .with_context(|| format!("failed to write {}", output.display()))?;
    }

    if args.dump {
        let unit = codec::decode(&bytes).context("resulting unit cannot be decoded")?;
        println!();
        print!("{unit}");
    }
    Ok(())
}

fn run_render(args: &RenderArgs) -> Result<()> {
    let text = std::fs::read_to_string(&args.record)
        .with_context(|| format!("failed to read {}", args.record.display()))?;
    let record = TraceRecord::from_json(&text)
        .with_context(|| format!("{} is not a trace record", args.record.display()))?;

    let renderer = args
        .hide
        .iter()
        .fold(DiagramRenderer::new(), |r, prefix| r.hide_prefix(prefix.clone()));
    let tree = record
        .into_tree()
        .with_context(|| format!("{} has an inconsistent call list", args.record.display()))?;
    let diagram = renderer.render(&tree);

    match &args.output {
        Some(output) => std::fs::write(output, diagram)
            .with_context(|| format!("failed to write {}", output.display()))?,
        None => println!("{diagram}"),
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug);

    match &args.command {
        Command::Instrument(instrument) => run_instrument(instrument),
        Command::Render(render) => run_render(render),
    }
}

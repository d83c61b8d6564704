//! rtsync-sim - run route reconciliation against a simulated kernel.
//!
//! Route descriptions are logged at info level; use
//! `RUST_LOG=rtsync=info` to see them.

mod output;
mod scenario;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use rtsync::events::Flow;
use rtsync::producer::RouteProducer;
use rtsync::{Config, EventLoop, Reconciler, SimKernel};

use output::{Rendered, StepOutput};
use scenario::{Platform, Scenario};

#[derive(Parser)]
#[command(name = "rtsync-sim", version, about = "Route reconciliation simulator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a scenario file step by step.
    Run(RunArgs),

    /// Validate a configuration file and print it normalised.
    Check(CheckArgs),

    /// Show the routes a configuration installs on an empty kernel.
    Routes(RoutesArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Scenario file (YAML).
    scenario: PathBuf,

    /// Override the scenario's platform.
    #[arg(long, value_enum)]
    platform: Option<Platform>,

    /// Output format.
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Args)]
struct CheckArgs {
    /// Configuration file (YAML).
    config: PathBuf,

    /// Output format.
    #[arg(short, long, value_enum, default_value = "yaml")]
    format: ConfigFormat,
}

#[derive(Args)]
struct RoutesArgs {
    /// Configuration file (YAML).
    config: PathBuf,

    /// Platform to simulate.
    #[arg(long, value_enum, default_value = "linux")]
    platform: Platform,

    /// Output format.
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum ConfigFormat {
    Yaml,
    Json,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => run(args),
        Command::Check(args) => check(args),
        Command::Routes(args) => routes(args),
    }
}

fn run(args: RunArgs) -> anyhow::Result<()> {
    let mut scenario = Scenario::load(&args.scenario)?;
    if let Some(platform) = args.platform {
        scenario.platform = platform;
    }

    let interfaces = scenario.config.interface_table();
    let kernel = scenario.kernel(&interfaces)?;
    let producers = scenario.config.producers(&interfaces)?;
    let reconciler = Reconciler::new(scenario.config.reconciler_options());
    let mut daemon = EventLoop::new(reconciler, kernel, interfaces.clone()).with_producers(producers);

    let mut steps = Vec::with_capacity(scenario.steps.len());
    for (index, step) in scenario.steps.iter().enumerate() {
        daemon.backend_mut().clear_calls();
        let event = Scenario::event(step, &interfaces, daemon.backend_mut())
            .with_context(|| format!("step {}", index + 1))?;
        let flow = daemon
            .handle(event)
            .with_context(|| format!("step {}", index + 1))?;

        let out = StepOutput::new(index + 1, step, daemon.backend(), daemon.interfaces());
        if let OutputFormat::Text = args.format {
            print!("{}", out);
        }
        steps.push(out);
        if flow == Flow::Stop {
            break;
        }
    }

    let rendered = Rendered {
        platform: scenario.platform,
        steps,
        totals: *daemon.totals(),
    };
    match args.format {
        OutputFormat::Text => println!("{}", rendered.totals_line()),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rendered)?),
    }
    Ok(())
}

fn check(args: CheckArgs) -> anyhow::Result<()> {
    let config = Config::load(&args.config)
        .with_context(|| format!("invalid configuration {}", args.config.display()))?;
    match args.format {
        ConfigFormat::Yaml => print!("{}", config.to_yaml()?),
        ConfigFormat::Json => println!("{}", config.to_json()?),
    }
    Ok(())
}

fn routes(args: RoutesArgs) -> anyhow::Result<()> {
    let config = Config::load(&args.config)
        .with_context(|| format!("invalid configuration {}", args.config.display()))?;
    let interfaces = config.interface_table();
    let producers = config.producers(&interfaces)?;
    let producers: Vec<&dyn RouteProducer> = producers.iter().map(|p| p.as_ref()).collect();

    let mut kernel = SimKernel::new(args.platform.capabilities());
    let mut reconciler = Reconciler::new(config.reconciler_options());
    reconciler.build_all(&mut kernel, &producers, &interfaces)?;

    let table = output::routes(&kernel, &interfaces);
    match args.format {
        OutputFormat::Text => {
            for route in &table {
                println!("{}", route);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&table)?),
    }
    Ok(())
}

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "scalesim",
    about = "Discrete-event simulation of an autoscaled VM pool",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one simulation described by a TOML config
    Run {
        #[arg(short, long)]
        config: PathBuf,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
        /// Override run.horizon (seconds)
        #[arg(long)]
        horizon: Option<f64>,
    },
    /// Run every *.toml config under a directory
    Sweep {
        #[arg(short, long)]
        dir: PathBuf,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Smallest VM count that keeps Erlang-B blocking under a target
    ErlangB {
        /// Offered load in Erlangs (lambda / mu)
        #[arg(long)]
        load: f64,
        /// Worst acceptable blocking probability
        #[arg(long)]
        target: f64,
        /// Seats per VM
        #[arg(long, default_value = "1")]
        density: u32,
    },
    /// Write a starter config
    Scaffold {
        #[arg(short, long, default_value = "baseline")]
        name: String,
        /// Destination file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Reports go to stdout, logs to stderr.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("scalesim=info"));
    if cli.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Run {
            config,
            format,
            horizon,
        } => commands::run::run(&config, &format, horizon),
        Commands::Sweep { dir, format } => commands::sweep::sweep(&dir, &format),
        Commands::ErlangB {
            load,
            target,
            density,
        } => commands::erlang::erlang_b(load, target, density),
        Commands::Scaffold { name, output } => {
            commands::scaffold::scaffold(&name, output.as_deref())
        }
    }
}

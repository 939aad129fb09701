//! grid - Command-line interface for benchgrid

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use grid_core::{BenchConfig, CoreError};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use output::{OutputFormat, OutputFormatter};

/// Benchmark an inference server across parallelism, memory utilization, concurrency and
/// request rate
#[derive(Debug, Parser)]
#[command(name = "grid")]
#[command(version)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory holding probe results (overrides the configuration)
    #[arg(long, value_name = "DIR")]
    results_dir: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    output: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable JSON output (overrides --output)
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by both sweeps
#[derive(Debug, Args)]
pub struct SweepArgs {
    /// Tensor-parallel degrees to sweep (comma-separated)
    #[arg(long, value_delimiter = ',')]
    tp: Vec<u32>,

    /// Restrict the sweep to these model ids (comma-separated)
    #[arg(short, long, value_delimiter = ',')]
    models: Vec<String>,

    /// Re-run probes whose stored result is an error
    #[arg(long)]
    retry_failed: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the throughput and latency sweep
    Sweep {
        #[command(flatten)]
        args: SweepArgs,

        /// Request rates for latency probes (comma-separated)
        #[arg(long, value_delimiter = ',')]
        rates: Vec<f64>,
    },

    /// Run the context-limit sweep
    Capacity {
        #[command(flatten)]
        args: SweepArgs,

        /// Memory-utilization targets (comma-separated)
        #[arg(long, value_delimiter = ',')]
        utils: Vec<f64>,

        /// Concurrency levels (comma-separated)
        #[arg(long, value_delimiter = ',')]
        levels: Vec<u32>,
    },

    /// Write the context-limit report as Markdown
    Report {
        /// Read results from an exported JSON array instead of the results directory
        #[arg(long, value_name = "FILE")]
        json: Option<PathBuf>,

        /// Write the report to a file instead of stdout
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },

    /// Print the backfilled capacity table as Markdown
    Table {
        /// Read results from an exported JSON array instead of the results directory
        #[arg(long, value_name = "FILE")]
        json: Option<PathBuf>,

        /// Write the table to a file instead of stdout
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },

    /// Show throughput and latency results
    Summary,

    /// Export every stored result as one JSON array
    Export {
        /// Destination file
        #[arg(default_value = "max_context_results.json")]
        out: PathBuf,
    },

    /// List the model catalog
    Models,

    /// Launch a server with the best verified context and keep it running until Ctrl-C
    Serve {
        /// Model identifier
        model: String,

        /// Tensor-parallel degree (defaults to the largest the model and host allow)
        #[arg(long)]
        tp: Option<u32>,

        /// Context length (defaults to the best verified result)
        #[arg(long)]
        ctx: Option<u32>,

        /// Memory-utilization target
        #[arg(long)]
        util: Option<f64>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Delete every stored result
    Clear {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Write the default configuration to a file
    Init {
        /// Destination file
        #[arg(default_value = "benchgrid.yaml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(
            [
                "grid_cli",
                "grid_sweep",
                "grid_runtime",
                "grid_store",
                "grid_report",
                "grid_core",
            ]
            .iter()
            .map(|target| format!("{}={}", target, level))
            .collect::<Vec<_>>()
            .join(","),
        )
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Errors the user can fix in the configuration file get a pointer to the defaults
fn config_error(e: CoreError) -> anyhow::Error {
    let message = if e.is_configuration() {
        "Failed to load configuration (`grid config init` writes a working default)"
    } else {
        "Failed to load configuration"
    };
    anyhow::Error::new(e).context(message)
}

fn load_config(cli: &Cli) -> Result<BenchConfig> {
    let mut config = BenchConfig::load(cli.config.as_deref()).map_err(config_error)?;
    if let Some(dir) = &cli.results_dir {
        config.results_dir = dir.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    debug!("Starting grid CLI with arguments: {:?}", cli);

    let output_format = if cli.json {
        OutputFormat::Json
    } else {
        cli.output
    };
    let formatter = OutputFormatter::new(output_format);

    if let Commands::Config {
        action: ConfigCommands::Init { path, force },
    } = &cli.command
    {
        return commands::config::init(path, *force, &formatter);
    }

    let config = load_config(&cli)?;
    match cli.command {
        Commands::Sweep { args, rates } => {
            commands::sweep::performance(config, args, rates, &formatter).await?;
        }
        Commands::Capacity {
            args,
            utils,
            levels,
        } => {
            commands::sweep::capacity(config, args, utils, levels, &formatter).await?;
        }
        Commands::Report { json, out } => {
            commands::report::context_report(&config, json, out, &formatter).await?;
        }
        Commands::Table { json, out } => {
            commands::report::capacity_table(&config, json, out, &formatter).await?;
        }
        Commands::Summary => {
            commands::report::summary(&config, &formatter).await?;
        }
        Commands::Export { out } => {
            commands::results::export(&config, &out, &formatter).await?;
        }
        Commands::Models => {
            commands::config::list_models(&config, &formatter)?;
        }
        Commands::Serve {
            model,
            tp,
            ctx,
            util,
        } => {
            commands::serve::serve(&config, &model, tp, ctx, util, &formatter).await?;
        }
        Commands::Config { action } => match action {
            ConfigCommands::Show => commands::config::show(&config, &formatter)?,
            ConfigCommands::Init { path, force } => {
                commands::config::init(&path, force, &formatter)?
            }
        },
        Commands::Clear { yes } => {
            commands::results::clear(&config, yes, &formatter).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert()
    }

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["grid", "sweep", "--tp", "1,2", "--rates", "1,4"]).unwrap();
        match cli.command {
            Commands::Sweep { args, rates } => {
                assert_eq!(args.tp, vec![1, 2]);
                assert_eq!(rates, vec![1.0, 4.0]);
                assert!(!args.retry_failed);
            }
            other => panic!("unexpected command {:?}", other),
        }

        let cli = Cli::try_parse_from([
            "grid",
            "capacity",
            "--models",
            "org/a,org/b",
            "--levels",
            "1,4",
            "--retry-failed",
        ])
        .unwrap();
        match cli.command {
            Commands::Capacity { args, levels, .. } => {
                assert_eq!(args.models, vec!["org/a", "org/b"]);
                assert_eq!(levels, vec![1, 4]);
                assert!(args.retry_failed);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_report_reads_json_file() {
        let cli =
            Cli::try_parse_from(["grid", "--json", "report", "--json", "results.json"]).unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Report { json, out } => {
                assert_eq!(json, Some(PathBuf::from("results.json")));
                assert!(out.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_serve_and_clear() {
        let cli = Cli::try_parse_from(["grid", "serve", "org/a", "--tp", "2"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Serve { tp: Some(2), ctx: None, .. }
        ));

        let cli = Cli::try_parse_from(["grid", "clear", "--yes"]).unwrap();
        assert!(matches!(cli.command, Commands::Clear { yes: true }));

        let cli = Cli::try_parse_from(["grid", "config", "init"]).unwrap();
        match cli.command {
            Commands::Config {
                action: ConfigCommands::Init { path, force },
            } => {
                assert_eq!(path, PathBuf::from("benchgrid.yaml"));
                assert!(!force);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_output_format() {
        let cli = Cli::try_parse_from(["grid", "--output", "yaml", "summary"]).unwrap();
        assert_eq!(cli.output, OutputFormat::Yaml);
    }

    #[test]
    fn test_configuration_errors_point_at_init() {
        let err = config_error(CoreError::config("catalog is empty"));
        assert!(err.to_string().contains("grid config init"));
        assert!(format!("{:#}", err).contains("catalog is empty"));

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = config_error(CoreError::Io(io));
        assert_eq!(err.to_string(), "Failed to load configuration");
    }
}

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use pims_plugins::{LifecycleDriver, Phase, PluginManifest, RunReport, Settings};

/// pims-plugins - Plugin lifecycle driver for PIMS image builds
#[derive(Parser)]
#[command(name = "pims-plugins", version, about)]
struct Cli {
    /// Plugin manifest: a CSV file path or inline CSV content
    #[arg(
        long,
        visible_alias = "plugin_csv",
        alias = "plugin_csv_path",
        env = "PLUGIN_CSV",
        global = true
    )]
    plugin_csv: Option<String>,

    /// Directory plugins are installed into
    #[arg(
        long,
        visible_alias = "install_path",
        alias = "directory",
        env = "PIMS_PLUGINS_INSTALL_PATH",
        default_value = "/app/plugins",
        global = true
    )]
    install_path: PathBuf,

    /// Configuration file (default: ~/.config/pims/plugins.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Lifecycle method to run (shorthand for `run <METHOD>`)
    #[arg(long, value_enum)]
    method: Option<Method>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Apply a lifecycle method to every enabled plugin
    Run {
        /// Lifecycle method, or `all` for the four methods in order
        #[arg(value_enum)]
        method: Method,

        /// Keep applying the current method to other plugins after a failure
        #[arg(long)]
        keep_going: bool,

        /// Fast-forward plugins that are already downloaded
        #[arg(long)]
        update_existing: bool,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show manifest rows and whether each plugin is downloaded
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate the manifest without running anything
    Check,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
#[value(rename_all = "snake_case")]
enum Method {
    Download,
    #[value(alias = "dependencies-before-vips")]
    DependenciesBeforeVips,
    #[value(alias = "dependencies-before-python")]
    DependenciesBeforePython,
    Install,
    All,
}

impl Method {
    fn phases(self) -> Vec<Phase> {
        match self {
            Self::Download => vec![Phase::Download],
            Self::DependenciesBeforeVips => vec![Phase::DependenciesBeforeVips],
            Self::DependenciesBeforePython => vec![Phase::DependenciesBeforePython],
            Self::Install => vec![Phase::Install],
            Self::All => Phase::ALL.to_vec(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info",
        1 => "info,pims_plugins=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let command = match (cli.command, cli.method) {
        (Some(_), Some(_)) => {
            Cli::command()
                .error(
                    clap::error::ErrorKind::ArgumentConflict,
                    "--method cannot be combined with a subcommand",
                )
                .exit();
        }
        (Some(command), None) => command,
        (None, Some(method)) => Command::Run {
            method,
            keep_going: false,
            update_existing: false,
            json: false,
        },
        (None, None) => {
            Cli::command()
                .error(
                    clap::error::ErrorKind::MissingSubcommand,
                    "a subcommand or --method is required",
                )
                .exit();
        }
    };

    let Some(source) = cli.plugin_csv else {
        Cli::command()
            .error(
                clap::error::ErrorKind::MissingRequiredArgument,
                "--plugin-csv (or PLUGIN_CSV) is required",
            )
            .exit();
    };

    let manifest = PluginManifest::load(&source)?;

    match command {
        Command::Check => {
            println!(
                "manifest ok: {} plugins, {} enabled",
                manifest.len(),
                manifest.enabled().count()
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::List { json } => {
            let settings = Settings::load(&cli.install_path, cli.config.as_deref())?;
            let driver = LifecycleDriver::with_process_runner(settings);
            let statuses = driver.status(&manifest);

            if json {
                println!("{}", serde_json::to_string_pretty(&statuses)?);
            } else if statuses.is_empty() {
                println!("plugins: none configured");
            } else {
                for status in &statuses {
                    println!(
                        "{:<40} {:<8} {} ({})",
                        status.name,
                        if status.enabled { "enabled" } else { "disabled" },
                        status.state,
                        status.path.display()
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            method,
            keep_going,
            update_existing,
            json,
        } => {
            let mut settings = Settings::load(&cli.install_path, cli.config.as_deref())?;
            settings.keep_going = keep_going;
            settings.git.update_existing |= update_existing;

            tracing::info!(
                install_path = %settings.install_path.display(),
                plugins = manifest.len(),
                enabled = manifest.enabled().count(),
                ?method,
                "running plugin lifecycle"
            );

            let driver = LifecycleDriver::with_process_runner(settings);
            let report = driver.run_phases(&manifest, &method.phases()).await;
            print_report(&report, json)?;

            Ok(if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn print_report(report: &RunReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    for line in report.summary() {
        println!("{line}");
    }
    for failure in report.failures() {
        if let pims_plugins::PhaseOutcome::Failed { error } = &failure.outcome {
            eprintln!("FAILED {} [{}]: {error}", failure.plugin, failure.phase);
        }
    }

    Ok(())
}

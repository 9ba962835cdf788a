use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use console::{style, Term};
use tokio::sync::mpsc::UnboundedReceiver;

use forensic_usb::acquire::{self, AcquisitionOutcome, AcquisitionTarget};
use forensic_usb::collect::{
    abort_run, catalog, execute_full_run, require_destination, CatalogPaths, CategoryKind,
    CollectError, Collector, RunOptions, RunState, Stamp,
};
use forensic_usb::config::{Config, LoggingConfig};
use forensic_usb::manifest::{self, VerifyStatus};
use forensic_usb::prepare;
use forensic_usb::runner::{CommandRunner, ShellRunner};
use forensic_usb::status::{Level, StatusLine, StatusLog};
use forensic_usb::terminal::{self, TerminalStep};
use forensic_usb::volumes;
use forensic_usb::worker::WorkerPool;

#[derive(Parser)]
#[command(
    name = "forensic-usb",
    about = "Trusted-binary USB live response collection for macOS endpoints",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Where artifacts are written.
#[derive(Args, Debug, Clone)]
#[group(multiple = false)]
struct Destination {
    /// Output volume name under the volumes root
    #[arg(long)]
    volume: Option<String>,

    /// Output directory
    #[arg(long)]
    dir: Option<PathBuf>,
}

impl Destination {
    fn resolve(&self, cfg: &Config) -> Result<PathBuf, CollectError> {
        match (&self.volume, &self.dir) {
            (Some(name), _) => volumes::resolve_destination(&cfg.volumes.root, name),
            (None, dir) => require_destination(dir.as_deref()).map(Path::to_path_buf),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TerminalAction {
    Link,
    Path,
    Logging,
    Open,
    /// Every step, then open Terminal
    All,
}

#[derive(Subcommand)]
enum Commands {
    /// List external volumes and their physical disks
    Volumes {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Copy trusted system binaries onto a USB stick (requires sudo)
    Prepare {
        /// Volume name of the stick
        #[arg(long)]
        volume: String,

        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Set up the trusted terminal on a prepared stick
    Terminal {
        #[arg(value_enum)]
        action: TerminalAction,

        /// Volume name of the stick
        #[arg(long)]
        volume: String,
    },

    /// Collect one or more categories of live response data
    Collect {
        #[arg(value_enum, required = true)]
        categories: Vec<CategoryKind>,

        #[command(flatten)]
        dest: Destination,
    },

    /// Archive user data with tar
    Acquire {
        #[arg(value_enum)]
        template: AcquisitionTarget,

        #[command(flatten)]
        dest: Destination,
    },

    /// Write checksums.txt for the collected artifacts
    Hash {
        #[command(flatten)]
        dest: Destination,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Re-hash artifacts against checksums.txt
    Verify {
        #[command(flatten)]
        dest: Destination,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Run every category in order, then hash
    RunAll {
        #[command(flatten)]
        dest: Destination,

        /// Pause between categories in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,

        /// JSON summary on stdout
        #[arg(long)]
        json: bool,
    },
}

impl Commands {
    fn json(&self) -> bool {
        match self {
            Commands::Volumes { json }
            | Commands::Hash { json, .. }
            | Commands::Verify { json, .. }
            | Commands::RunAll { json, .. } => *json,
            _ => false,
        }
    }
}

fn env_filter(default_level: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level))
}

/// Resolve the config under a plain stderr subscriber, so fallback warnings
/// are visible before the configured one is installed.
fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(env_filter(&LoggingConfig::default().level))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::with_default(bootstrap, || Config::resolve(explicit))
}

fn init_tracing(cfg: &LoggingConfig) {
    let filter = env_filter(&cfg.level);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cfg.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Render status lines in arrival order until every sender is gone.
async fn print_status(mut rx: UnboundedReceiver<StatusLine>, term: Term) {
    while let Some(line) = rx.recv().await {
        let text = line.render();
        let styled = match line.level {
            Level::Ok => style(text).green(),
            Level::Warn => style(text).yellow(),
            Level::Fail => style(text).red(),
            Level::Info => style(text),
        };
        let _ = term.write_line(&styled.to_string());
    }
}

fn confirm(message: &str) -> bool {
    let term = Term::stdout();
    println!("  {} {}", style("?").blue(), message);
    print!("  {} (y/N): ", style("➜").cyan());
    let _ = std::io::stdout().flush();
    let input = term.read_line().unwrap_or_default();
    matches!(input.trim().to_lowercase().as_str(), "y" | "yes")
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn shell_runner(cfg: &Config) -> Arc<dyn CommandRunner> {
    Arc::new(ShellRunner::new(cfg.collection.shell.clone()))
}

/// Resolve a destination or report why it is unusable.
fn destination_or_report(dest: &Destination, cfg: &Config, status: &StatusLog) -> Option<PathBuf> {
    match dest.resolve(cfg) {
        Ok(dir) => Some(dir),
        Err(CollectError::NoDestination) => {
            status.fail("Please select an output USB medium first");
            None
        }
        Err(e) => {
            status.fail(format!("Error: {}", e));
            None
        }
    }
}

async fn dispatch(command: Commands, cfg: Config, status: StatusLog) -> Result<ExitCode> {
    match command {
        Commands::Volumes { json } => {
            status.info("Scanning USB devices...");
            let root = cfg.volumes.root.clone();
            let excluded = cfg.volumes.excluded.clone();
            let found = match tokio::task::spawn_blocking(move || volumes::scan(&root, &excluded))
                .await
                .context("volume scan task failed")?
            {
                Ok(found) => found,
                Err(e) => {
                    status.fail(format!("Scanning error: {}", e));
                    return Ok(ExitCode::FAILURE);
                }
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&found)?);
            }
            if found.is_empty() {
                status.warn("No external volumes found");
            } else {
                let names: Vec<&str> = found.iter().map(|v| v.name.as_str()).collect();
                status.ok(format!("{} Volume(s) found: {}", found.len(), names.join(", ")));
                for v in &found {
                    status.info(format!("  {} → {}", v.name, v.disk.as_deref().unwrap_or("unknown")));
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Prepare { volume, yes } => {
            let path = match volumes::resolve_destination(&cfg.volumes.root, &volume) {
                Ok(p) => p,
                Err(_) => {
                    status.fail(format!(
                        "Volume '{}' not found! Please format the USB stick first.",
                        volume
                    ));
                    return Ok(ExitCode::FAILURE);
                }
            };
            let prompt = format!(
                "Trusted binaries will be copied to {}. This requires sudo rights and may take several minutes. Continue?",
                path.display()
            );
            if !yes && !confirm(&prompt) {
                status.warn("Copy aborted by operator");
                return Ok(ExitCode::SUCCESS);
            }

            let runner = shell_runner(&cfg);
            let report =
                prepare::copy_binaries(runner.as_ref(), &status, &cfg.prepare, &path, &volume).await?;
            Ok(exit_code(report.failed.is_empty()))
        }

        Commands::Terminal { action, volume } => {
            let path = match volumes::resolve_destination(&cfg.volumes.root, &volume) {
                Ok(p) => p,
                Err(e) => {
                    status.fail(format!("Error: {}", e));
                    return Ok(ExitCode::FAILURE);
                }
            };
            let ok = match action {
                TerminalAction::All => terminal::prepare_all(&path, &status)
                    .iter()
                    .all(|(_, r)| r.is_ok()),
                single => {
                    let step = match single {
                        TerminalAction::Link => TerminalStep::Link,
                        TerminalAction::Path => TerminalStep::Path,
                        TerminalAction::Logging => TerminalStep::Logging,
                        _ => TerminalStep::Open,
                    };
                    terminal::run_step(step, &path, &status).is_ok()
                }
            };
            Ok(exit_code(ok))
        }

        Commands::Collect { categories, dest } => {
            let Some(dir) = destination_or_report(&dest, &cfg, &status) else {
                return Ok(ExitCode::FAILURE);
            };
            let collector = Collector::new(shell_runner(&cfg), status.clone());
            let pool = WorkerPool::new(cfg.workers.max_concurrent);
            let paths = CatalogPaths::from(&cfg.collection);
            let stamp = Stamp::now();

            let mut kinds: Vec<CategoryKind> = Vec::with_capacity(categories.len());
            for kind in categories {
                if !kinds.contains(&kind) {
                    kinds.push(kind);
                }
            }

            let handles: Vec<_> = kinds
                .iter()
                .map(|kind| {
                    let category = kind.build(&paths);
                    let collector = collector.clone();
                    let dir = dir.clone();
                    let stamp = stamp.clone();
                    pool.submit(kind.name(), async move {
                        collector.execute_category(&category, &dir, &stamp).await
                    })
                })
                .collect();

            let mut failures = 0;
            for handle in handles {
                match handle.await {
                    Ok(outcome) => failures += outcome.failures().count(),
                    Err(e) => {
                        status.fail(format!("Error: {}", e));
                        failures += 1;
                    }
                }
            }
            Ok(exit_code(failures == 0))
        }

        Commands::Acquire { template, dest } => {
            let Some(dir) = destination_or_report(&dest, &cfg, &status) else {
                return Ok(ExitCode::FAILURE);
            };
            let collector = Collector::new(shell_runner(&cfg), status.clone());
            let pool = WorkerPool::new(cfg.workers.max_concurrent);
            let max_chars = cfg.collection.error_excerpt_chars;
            let req = template.request();

            let handle = pool.submit("acquire", async move {
                acquire::acquire(&collector, &req, &dir, &Stamp::now(), max_chars).await
            });
            let ok = match handle.await {
                Ok(Ok(AcquisitionOutcome::Archived(_))) => true,
                Ok(Ok(AcquisitionOutcome::Warning { kept, .. })) => kept.is_some(),
                Ok(Err(_)) => false,
                Err(e) => {
                    status.fail(format!("Error: {}", e));
                    false
                }
            };
            Ok(exit_code(ok))
        }

        Commands::Hash { dest, json } => {
            let Some(dir) = destination_or_report(&dest, &cfg, &status) else {
                return Ok(ExitCode::FAILURE);
            };
            match manifest::hash_and_report(&dir, &status).await {
                Ok(result) => {
                    if json {
                        println!("{}", serde_json::to_string_pretty(&result)?);
                    }
                    Ok(ExitCode::SUCCESS)
                }
                Err(_) => Ok(ExitCode::FAILURE),
            }
        }

        Commands::Verify { dest, json } => {
            let Some(dir) = destination_or_report(&dest, &cfg, &status) else {
                return Ok(ExitCode::FAILURE);
            };
            match manifest::verify_and_report(&dir, &status).await {
                Ok(entries) => {
                    if json {
                        println!("{}", serde_json::to_string_pretty(&entries)?);
                    }
                    let bad = entries
                        .iter()
                        .filter(|e| e.status != VerifyStatus::Ok)
                        .count();
                    if bad == 0 {
                        status.ok(format!("{} file(s) verified", entries.len()));
                    } else {
                        status.fail(format!("{} of {} file(s) did not verify", bad, entries.len()));
                    }
                    Ok(exit_code(bad == 0))
                }
                Err(_) => Ok(ExitCode::FAILURE),
            }
        }

        Commands::RunAll { dest, delay_ms, json } => {
            let out_dir = match dest.resolve(&cfg) {
                Ok(dir) => dir,
                Err(e) => {
                    let result = abort_run(&status, e);
                    if json {
                        println!("{}", serde_json::to_string_pretty(&result.summary())?);
                    }
                    return Ok(ExitCode::FAILURE);
                }
            };
            let collector = Collector::new(shell_runner(&cfg), status.clone());
            let pool = WorkerPool::new(cfg.workers.max_concurrent);

            let mut opts = RunOptions::new(
                cfg.collection.inter_category_delay(),
                cfg.collection.pre_hash_delay(),
            )
            .with_cancel(pool.cancel_token());
            if let Some(ms) = delay_ms {
                opts.inter_category_delay = Duration::from_millis(ms);
            }
            let categories = catalog::full_run(&CatalogPaths::from(&cfg.collection));

            let handle = pool.submit("run-all", async move {
                execute_full_run(&collector, &categories, Some(&out_dir), &opts).await
            });
            let interrupt = {
                let pool = pool.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        pool.cancel();
                    }
                })
            };
            let result = handle.await.context("run task failed")?;
            interrupt.abort();

            if json {
                println!("{}", serde_json::to_string_pretty(&result.summary())?);
            }
            Ok(exit_code(result.state != RunState::Aborted))
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_deref())?;
    init_tracing(&cfg.logging);

    // With --json, stdout carries only the JSON document.
    let term = if cli.command.json() {
        Term::stderr()
    } else {
        Term::stdout()
    };
    let (status, rx) = StatusLog::channel();
    let printer = tokio::spawn(print_status(rx, term));

    let code = dispatch(cli.command, cfg, status).await;
    // dispatch owned the last sender, so the printer drains and stops.
    let _ = printer.await;
    code
}

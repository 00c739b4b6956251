use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use prism_core::{BackendId, BundleOptions, DispatchOutcome, QueryResult, Relay, Settings};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "prism-relay",
    version,
    about = "Send one prompt to several LLM backends, optionally with a bundled source tree"
)]
struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask a single backend
    Query {
        backend: BackendId,
        prompt: String,
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Ask 2-3 backends in parallel and print each answer
    Compare {
        prompt: String,
        #[arg(short, long, value_delimiter = ',', required = true)]
        backends: Vec<BackendId>,
    },
    /// Show which backends are usable without sending a query
    Status,
    /// Print the bundle artifact for a directory
    Bundle {
        root: PathBuf,
        #[command(flatten)]
        filters: BundleFilters,
        /// Print the manifest as JSON instead of the artifact
        #[arg(long)]
        manifest: bool,
    },
    /// Bundle a directory and ask one backend about it
    BundleQuery {
        backend: BackendId,
        root: PathBuf,
        prompt: String,
        #[arg(short, long)]
        model: Option<String>,
        #[command(flatten)]
        filters: BundleFilters,
    },
    /// Bundle a directory and ask 2-3 backends about it
    BundleCompare {
        root: PathBuf,
        prompt: String,
        #[arg(short, long, value_delimiter = ',', required = true)]
        backends: Vec<BackendId>,
        #[command(flatten)]
        filters: BundleFilters,
    },
    /// Print the resolved configuration as shell exports
    Env,
    /// Write the settings file with defaults if it does not exist
    Init {
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug, Clone)]
struct BundleFilters {
    /// Only bundle files matching one of these globs
    #[arg(long, value_delimiter = ',')]
    include: Vec<String>,
    /// Extra globs to exclude on top of the default rules
    #[arg(long, value_delimiter = ',')]
    exclude: Vec<String>,
    /// Size budget for the bundled files
    #[arg(long, default_value_t = prism_core::bundle::DEFAULT_MAX_SIZE_KB)]
    max_kb: usize,
}

impl From<BundleFilters> for BundleOptions {
    fn from(filters: BundleFilters) -> Self {
        BundleOptions {
            include: filters.include,
            exclude: filters.exclude,
            max_size_kb: filters.max_kb,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    tracing::debug!(command = ?cli.command, "prism-relay starting");

    if let Command::Init { force } = cli.command {
        return init_settings(force).await;
    }

    let settings = Settings::load().await?;
    let config = settings
        .resolve()
        .context("Failed to resolve backend configuration")?;
    let relay = Relay::new(config);

    let ok = match cli.command {
        Command::Query {
            backend,
            prompt,
            model,
        } => {
            let result = relay.query(backend, &prompt, model.as_deref()).await?;
            print_single(&result)
        }
        Command::Compare { prompt, backends } => {
            let outcome = relay.compare(&backends, &prompt).await?;
            print_outcome(&outcome)
        }
        Command::Status => {
            for row in relay.status().await {
                let marker = if row.availability.available { "ok " } else { "-- " };
                let model = if row.default_model.is_empty() {
                    "auto-detect"
                } else {
                    row.default_model.as_str()
                };
                println!(
                    "{}{:<10} {:<12} {:<32} {}",
                    marker,
                    row.backend.as_str(),
                    row.label,
                    model,
                    row.availability.detail
                );
            }
            true
        }
        Command::Bundle {
            root,
            filters,
            manifest,
        } => {
            let bundle = relay.bundle(&root, filters.into()).await?;
            if manifest {
                println!("{}", serde_json::to_string_pretty(&bundle.manifest)?);
            } else {
                print!("{}", bundle.artifact);
            }
            true
        }
        Command::BundleQuery {
            backend,
            root,
            prompt,
            model,
            filters,
        } => {
            let answer = relay
                .bundle_query(backend, &root, filters.into(), &prompt, model.as_deref())
                .await?;
            eprintln!("{}", bundle_note(&answer.bundle.manifest));
            print_single(&answer.reply)
        }
        Command::BundleCompare {
            root,
            prompt,
            backends,
            filters,
        } => {
            let answer = relay
                .bundle_compare(&backends, &root, filters.into(), &prompt)
                .await?;
            eprintln!("{}", bundle_note(&answer.bundle.manifest));
            print_outcome(&answer.reply)
        }
        Command::Env => {
            for (key, value) in relay.config().env_exports() {
                println!("export {}={}", key, shell_quote(&value));
            }
            true
        }
        Command::Init { .. } => true,
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            "prism_core=debug,prism_exec=debug,prism_relay=debug,warn"
        } else {
            "warn"
        })
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();
}

async fn init_settings(force: bool) -> Result<ExitCode> {
    let path = Settings::config_path()?;
    if path.exists() && !force {
        println!("Settings already exist at {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }
    Settings::default()
        .save()
        .await
        .with_context(|| format!("Failed to write settings to {}", path.display()))?;
    println!("Wrote default settings to {}", path.display());
    Ok(ExitCode::SUCCESS)
}

fn print_single(result: &QueryResult) -> bool {
    match &result.reply {
        Ok(text) => {
            println!("{}", text);
            true
        }
        Err(err) => {
            eprintln!("{} ({}) failed: {}", result.label, result.model, err);
            false
        }
    }
}

fn print_outcome(outcome: &DispatchOutcome) -> bool {
    for result in &outcome.results {
        println!("{}\n", result.render_section());
        println!("---\n");
    }
    println!("{}", outcome.summary_line());
    !outcome.all_failed()
}

fn bundle_note(manifest: &prism_core::BundleManifest) -> String {
    format!(
        "Bundled {} file(s), {:.1} KB ({} blocked, {} redacted, {} truncated)",
        manifest.included.len(),
        manifest.total_bytes as f64 / 1024.0,
        manifest.blocked.len(),
        manifest.redacted_count,
        manifest.truncated_count
    )
}

fn shell_quote(value: &str) -> String {
    if value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:".contains(c))
    {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

//! jirasync - bidirectional Jira synchronization
//!
//! Main entry point for the jirasync CLI.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use jirasync::config::{validate_config, JiraSyncConfig};
use jirasync::connector::{Connector, ProjectLink};
use jirasync::daemon::{metrics, Daemon, DaemonConfig};
use jirasync::jobs::Worker;
use jirasync::storage::JobState;
use jirasync::sync::{Model, SyncAction};
use jirasync::webhook::WebhookEvent;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

/// jirasync - keep a local record store and Jira in sync
#[derive(Parser, Debug)]
#[command(name = "jirasync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: ~/.config/jirasync/config.yaml)
    #[arg(short, long, env = "JIRASYNC_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default configuration file
    Init,

    /// Run the sync daemon (scheduler and workers)
    Run {
        /// Number of workers (default from config)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Do not enqueue every scan at startup
        #[arg(long)]
        no_initial_scan: bool,
    },

    /// Enqueue every batch of a backend now
    Scan {
        backend: String,
    },

    /// Import one remote record right away
    Import {
        backend: String,
        /// project, issue_type, user, task, worklog or organization
        model: Model,
        /// Jira id of the record
        id: String,
        /// Import even when the local copy is up to date
        #[arg(short, long)]
        force: bool,
    },

    /// Export one binding right away
    Export {
        backend: String,
        model: Model,
        binding_id: i64,
    },

    /// Bind a local project to a Jira project
    LinkProject {
        backend: String,
        project_id: i64,
        /// Jira project id (omit when exporting a new project)
        jira_project_id: Option<String>,
        /// Jira project key
        #[arg(short, long)]
        key: Option<String>,
        /// Jira id of an issue type to synchronize (repeatable, default all)
        #[arg(short = 't', long = "issue-type")]
        issue_types: Vec<String>,
        /// Push the local project to Jira instead of following it
        #[arg(long)]
        export: bool,
    },

    /// Start exporting a local task of an exported project
    ExportTask {
        backend: String,
        task_id: i64,
        /// Jira id of the task's issue type
        issue_type: String,
    },

    /// Remove a binding, keeping the local record
    Unlink {
        backend: String,
        model: Model,
        binding_id: i64,
    },

    /// Run due jobs once and exit
    Work {
        /// Maximum number of jobs to run
        #[arg(short, long, default_value_t = 100)]
        max: usize,
    },

    /// Show the job queue
    Jobs {
        /// Filter by state (pending, started, done, failed)
        #[arg(short, long)]
        state: Option<JobState>,

        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },

    /// Enqueue the job handling a Jira webhook
    Webhook {
        backend: String,
        /// Event name, e.g. jira:issue_updated
        #[arg(required_unless_present = "body")]
        event: Option<String>,
        /// Jira id of the affected entity
        #[arg(required_unless_present = "body")]
        id: Option<String>,
        /// Read a complete webhook body from a JSON file instead
        #[arg(long, conflicts_with_all = ["event", "id"])]
        body: Option<PathBuf>,
    },

    /// Print metrics in Prometheus text format
    Metrics,
}

#[tokio::main]
async fn main() {
    if let Err(e) = jirasync::logging::init() {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(JiraSyncConfig::default_path);

    if let Commands::Init = cli.command {
        return handle_init_command(&config_path);
    }
    if let Commands::Metrics = cli.command {
        print!("{}", metrics::encode_metrics());
        return Ok(());
    }

    let config = load_config(&config_path)?;
    let connector = Arc::new(Connector::from_config(&config).context("Failed to open connector")?);
    tracing::info!(
        backends = config.backends.len(),
        database = %config.database.display(),
        "Configuration loaded"
    );

    match cli.command {
        Commands::Run {
            workers,
            no_initial_scan,
        } => {
            let mut daemon_config =
                DaemonConfig::from_config(&config).with_scan_on_start(!no_initial_scan);
            if let Some(workers) = workers {
                daemon_config = daemon_config.with_workers(workers);
            }
            println!(
                "Sync daemon running with {} workers (Ctrl+C to stop)",
                daemon_config.workers
            );
            Daemon::new(connector, daemon_config).run().await?;
        }

        Commands::Scan { backend } => {
            let handles = connector.scan_all(&backend)?;
            println!("Enqueued {} batch jobs for {}", handles.len(), backend);
        }

        Commands::Import {
            backend,
            model,
            id,
            force,
        } => {
            let summary = connector.import_record(&backend, model, &id, force).await?;
            println!("{} {}: {}", model, id, summary);
        }

        Commands::Export {
            backend,
            model,
            binding_id,
        } => {
            let summary = connector.export_record(&backend, model, binding_id).await?;
            println!("{} binding {}: {}", model, binding_id, summary);
        }

        Commands::LinkProject {
            backend,
            project_id,
            jira_project_id,
            key,
            issue_types,
            export,
        } => {
            let link = ProjectLink {
                project_id,
                jira_project_id,
                jira_key: key,
                action: if export {
                    SyncAction::Export
                } else {
                    SyncAction::Link
                },
                issue_types,
            };
            let binding_id = connector.link_project(&backend, &link)?;
            println!(
                "✓ Project {} bound ({}), binding {}",
                project_id,
                link.action.as_str(),
                binding_id
            );
        }

        Commands::ExportTask {
            backend,
            task_id,
            issue_type,
        } => {
            let handle = connector.export_task(&backend, task_id, &issue_type)?;
            println!("✓ Task {} export enqueued (job {})", task_id, handle.id);
        }

        Commands::Unlink {
            backend,
            model,
            binding_id,
        } => {
            connector.unlink(&backend, model, binding_id)?;
            println!("✓ Unlinked {} binding {}", model, binding_id);
        }

        Commands::Work { max } => {
            let worker = Worker::new(connector.clone(), "cli")?;
            let reports = worker.drain(max).await?;
            if reports.is_empty() {
                println!("No jobs due");
            }
            for report in reports {
                println!("{}", report);
            }
        }

        Commands::Jobs { state, limit } => {
            let session = connector.store().session()?;
            let jobs = session.list_jobs(state, limit)?;
            println!("{} jobs:", jobs.len());
            for job in jobs {
                print!(
                    "  #{:<6} {:<8} p{:<3} {}",
                    job.id, job.state.as_str(), job.priority, job.description
                );
                if job.attempts > 0 {
                    print!(" (attempt {}/{})", job.attempts, job.max_retries);
                }
                if let Some(error) = job.error.as_deref().filter(|_| job.state != JobState::Done) {
                    print!(" - {}", error);
                }
                println!();
            }
        }

        Commands::Webhook {
            backend,
            event,
            id,
            body,
        } => {
            let event = match (body, event, id) {
                (Some(path), _, _) => {
                    let raw = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    let body: serde_json::Value = serde_json::from_str(&raw)?;
                    WebhookEvent::from_jira(&backend, &body)?
                }
                (None, Some(event), Some(id)) => WebhookEvent::new(&backend, event, id),
                _ => bail!("webhook needs an event and an id, or --body"),
            };
            let handle = connector.handle_webhook(&event)?;
            println!("✓ {} routed to job {}", event.event, handle.id);
        }

        Commands::Init | Commands::Metrics => unreachable!("handled before loading configuration"),
    }

    Ok(())
}

fn load_config(path: &PathBuf) -> anyhow::Result<JiraSyncConfig> {
    let config = match JiraSyncConfig::load(path) {
        Ok(config) => config,
        Err(jirasync::SyncError::Config(msg)) if msg.contains("Config file not found") => {
            bail!(
                "No configuration found at {}. Run 'jirasync init' first to create one.",
                path.display()
            );
        }
        Err(e) => return Err(e.into()),
    };

    if let Err(problems) = validate_config(&config) {
        for problem in &problems {
            eprintln!("  {}", problem);
        }
        bail!("Invalid configuration ({} problems)", problems.len());
    }
    Ok(config)
}

fn handle_init_command(config_file: &PathBuf) -> anyhow::Result<()> {
    if config_file.exists() {
        println!("Configuration already exists at {}", config_file.display());
        return Ok(());
    }

    JiraSyncConfig::new().save(config_file)?;

    println!("✓ Created configuration at {}", config_file.display());
    println!();
    println!("Next steps:");
    println!("  1. Add a backend (id, uri, token_env) to the config file");
    println!("  2. Import the catalogs:");
    println!("     jirasync import <backend> ... or jirasync scan <backend>");
    println!("  3. Run the daemon:");
    println!("     jirasync run");

    Ok(())
}

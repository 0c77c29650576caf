//! Flowcheck - Main Entry Point

use clap::{Parser, Subcommand};
use flowcheck_common::{AppConfig, Environment, RunStatus};
use flowcheck_core::run::generate_run_id;
use flowcheck_core::{EmailNotifier, ResultStore, RunHandle, TestRun};
use flowcheck_driver::{RunLog, WorkflowSpec};
use flowcheck_web::{playwright_factory, prepare_workflow, RunTestRequest};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Flowcheck - browser-driven end-to-end workflow checks
#[derive(Parser)]
#[command(name = "flowcheck")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file; environment variables are used when it does not exist
    #[arg(
        short,
        long,
        default_value = "flowcheck.toml",
        env = "FLOWCHECK_CONFIG",
        global = true
    )]
    config: PathBuf,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the control API
    Serve {
        /// Listen address, overrides the configuration
        #[arg(long)]
        listen: Option<String>,
    },

    /// Run the workflow once and print the result as JSON
    Run {
        /// Target environment (dev, staging, prod)
        #[arg(long, default_value = "dev")]
        env: String,

        /// JSON file with case details and upload paths
        #[arg(long)]
        payload: Option<PathBuf>,

        /// Workflow definition, overrides the configuration
        #[arg(long)]
        workflow: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Variables already set in the process take precedence over the file
    match dotenvy::dotenv() {
        Ok(path) => info!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => debug!("No .env file found"),
        Err(e) => warn!("Ignoring unreadable .env file: {}", e),
    }

    let mut config = AppConfig::load(&cli.config)?;

    match cli.command {
        Commands::Serve { listen } => {
            if let Some(listen) = listen {
                config.listen = listen;
            }
            flowcheck_web::serve(config).await
        }
        Commands::Run {
            env,
            payload,
            workflow,
        } => {
            if let Some(workflow) = workflow {
                config.workflow_path = workflow;
            }
            let status = run_once(&config, env.parse()?, payload.as_deref()).await?;
            if status == RunStatus::Failed {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

async fn run_once(
    config: &AppConfig,
    env: Environment,
    payload: Option<&Path>,
) -> anyhow::Result<RunStatus> {
    let request: RunTestRequest = match payload {
        Some(path) => serde_json::from_str(&tokio::fs::read_to_string(path).await?)?,
        None => RunTestRequest::default(),
    };
    let parameters = request.into_parameters(env, &config.defaults);

    let spec = WorkflowSpec::from_file(&config.workflow_path)?;
    let run_id = generate_run_id("run");
    let workflow = prepare_workflow(config, &spec, &run_id, &parameters)?;

    info!("Running workflow '{}' against {} as {}", spec.name, env, run_id);
    let notifier = Arc::new(EmailNotifier::from_config(&config.environment(env).smtp));
    let handle = RunHandle::new(TestRun::with_id(run_id.clone(), parameters).with_notifier(notifier));
    let log = RunLog::detached(&run_id);
    let factory = playwright_factory(config, &spec);

    let snapshot = workflow.run(&factory, &handle, &log).await;

    let store = ResultStore::new(&config.results_dir).await?;
    let path = store.save(&snapshot).await?;
    info!("Test results saved to {}", path.display());

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(snapshot.status)
}

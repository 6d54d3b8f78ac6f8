use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use galleria::server;
use galleria::storage::sweep::sweep_staging;
use galleria::{
    init_logging, load_config, ClassroomClient, ImportConfig, ImportError, ImportRequest,
    ImportService, LogFormat, TaskHandler,
};

#[derive(Parser, Debug)]
#[command(name = "galleria-import")]
#[command(about = "Import course submissions into a review gallery", long_about = None)]
struct Cli {
    /// Path to the import configuration file
    #[arg(short, long, env = "GALLERIA_CONFIG", default_value = "galleria.json")]
    config: PathBuf,

    /// Log output format (pretty or json)
    #[arg(long, default_value = "pretty")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start an import and wait for it to finish
    Start {
        #[arg(long)]
        gallery: String,
        #[arg(long)]
        course: String,
        #[arg(long)]
        assignment: String,
        /// Identity of the user starting the import
        #[arg(long, env = "GALLERIA_USER")]
        user: String,
        /// Seconds to wait for the job to reach a terminal status
        #[arg(long, default_value_t = 600)]
        wait_secs: u64,
    },
    /// Print the status of an import job
    Status { job_id: String },
    /// Receive work units delivered by the remote task queue
    Serve {
        /// Address the task endpoint listens on
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: SocketAddr,
    },
    /// Delete staged files left behind by interrupted imports
    Sweep {
        #[arg(long, default_value_t = 24)]
        older_than_hours: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    info!("Starting galleria-import v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(path = ?cli.config, error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    match run(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, config: &ImportConfig) -> Result<(), ImportError> {
    match command {
        Commands::Sweep { older_than_hours } => {
            let removed = sweep_staging(
                &config.storage.root,
                &config.storage.staging_prefix,
                Duration::from_secs(older_than_hours * 3600),
            );
            info!(removed, "staging sweep finished");
            Ok(())
        }
        Commands::Serve { bind } => {
            if config.dispatch.queue.is_none() {
                warn!("no remote queue configured, nothing will deliver to this endpoint");
            }
            let service = service(config)?;
            let handler: Arc<dyn TaskHandler> = service.endpoint().clone();
            server::serve(bind, handler, config.dispatch.max_attempts).await
        }
        Commands::Status { job_id } => {
            let service = service(config)?;
            print_json(&service.job_status(&job_id)?)
        }
        Commands::Start {
            gallery,
            course,
            assignment,
            user,
            wait_secs,
        } => {
            let service = service(config)?;
            let request = ImportRequest::new(gallery, course, assignment, user);
            let job_id = service.start_import(&request).await?;
            info!(job_id = %job_id, "import started");

            let status = service
                .wait_for_job(&job_id, Duration::from_secs(wait_secs))
                .await?;
            service.shutdown();
            print_json(&status)
        }
    }
}

fn service(config: &ImportConfig) -> Result<ImportService, ImportError> {
    let client = ClassroomClient::from_config(&config.source)?;
    ImportService::from_config(config, Arc::new(client))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), ImportError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| ImportError::InvalidInput(format!("status is not serializable: {}", e)))?;
    println!("{}", text);
    Ok(())
}

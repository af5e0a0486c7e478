use clap::{Parser, Subcommand};
use git_publish::config::{DEFAULT_CONFIG_PATH, PublishConfig, load_config};
use git_publish::storage::aws::load_sdk_config;
use git_publish::storage::{
    CdnInvalidator, CloudFrontInvalidator, MemoryStore, ObjectStore, S3Store,
};
use git_publish::webhook::PushPayload;
use git_publish::{AppState, api, logging};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(version, about = "Publish a repository's content to S3 on every GitHub push")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, env = "PUBLISH_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the webhook server (default)
    Serve,
    /// Run one delivery from a saved push event payload
    Replay {
        #[arg(long)]
        event: PathBuf,
        #[arg(long)]
        delivery_id: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Print every object currently in the bucket
    ListObjects,
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config: PublishConfig = match load_config(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let _log_guard = match logging::setup_logging(config.log_dir.as_deref(), config.max_log_files)
    {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to set up logging: {}", e);
            std::process::exit(1);
        }
    };

    let command = cli.command.unwrap_or(Command::Serve);
    let (store, cdn): (Arc<dyn ObjectStore>, Option<Arc<dyn CdnInvalidator>>) = match &command {
        // a dry replay never reaches storage, so it needs no AWS credentials
        Command::Replay { dry_run: true, .. } => (
            Arc::new(MemoryStore::new(config.storage.bucket.clone())) as Arc<dyn ObjectStore>,
            None,
        ),
        _ => {
            let sdk_config = load_sdk_config(&config.storage.region).await;
            let cdn = config.cdn.as_ref().map(|_| {
                Arc::new(CloudFrontInvalidator::new(&sdk_config)) as Arc<dyn CdnInvalidator>
            });
            (
                Arc::new(S3Store::new(&sdk_config, config.storage.bucket.clone()))
                    as Arc<dyn ObjectStore>,
                cdn,
            )
        }
    };

    info!("Using config at {:?}", cli.config);
    let state = Arc::new(AppState::new(config, store, cdn));

    let result = match command {
        Command::Serve => serve(state).await,
        Command::Replay {
            event,
            delivery_id,
            dry_run,
        } => replay(state, event, delivery_id, dry_run).await,
        Command::ListObjects => list_objects(state).await,
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn serve(state: git_publish::SharedState) -> Result<(), String> {
    let bind_address = state.config.bind_address.clone();
    let app = api::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .map_err(|e| format!("Failed to bind {}: {}", bind_address, e))?;
    info!("Listening on {}", bind_address);
    axum::serve(listener, app)
        .await
        .map_err(|e| format!("Server error: {}", e))
}

async fn replay(
    state: git_publish::SharedState,
    event: PathBuf,
    delivery_id: Option<String>,
    dry_run: bool,
) -> Result<(), String> {
    let body = tokio::fs::read(&event)
        .await
        .map_err(|e| format!("Failed to read {}: {}", event.display(), e))?;
    let payload = PushPayload::parse(&body)
        .map_err(|e| format!("Invalid push payload in {}: {}", event.display(), e))?;
    let delivery_id = delivery_id.unwrap_or_else(|| uuid::Uuid::now_v7().to_string());

    let report = state
        .pipeline
        .run(&delivery_id, &payload, dry_run)
        .await
        .map_err(|e| e.to_string())?;
    let json = serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?;
    println!("{}", json);

    if report.is_complete() {
        Ok(())
    } else {
        Err(format!(
            "Delivery {} finished with {} failed step(s)",
            delivery_id,
            report.failures.len()
        ))
    }
}

async fn list_objects(state: git_publish::SharedState) -> Result<(), String> {
    let objects = state
        .pipeline
        .store()
        .list_objects()
        .await
        .map_err(|e| e.to_string())?;
    for object in &objects {
        println!("{}\t{}", object.size, object.key);
    }
    info!("{} objects in {}", objects.len(), state.pipeline.store().bucket());
    Ok(())
}

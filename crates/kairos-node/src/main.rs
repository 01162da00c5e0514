//! KAIROS node: protocol memory and execution engine for AI agents.

use std::sync::Arc;
use std::time::Duration;

use clap::{command, Parser};
use tokio::task::JoinHandle;
use tracing::{error, info, subscriber::set_global_default, warn};
use tracing_subscriber::filter::EnvFilter;

use kairos_embedding_client::HttpEmbedder;
use kairos_engine::{EngineConfig, ExecutionEngine};
use kairos_kv::RedisStore;
use kairos_memory::{run_invalidation_listener, MemoryStore};
use kairos_proof::{ProofConfig, ProofEngine, ProofStore};
use kairos_vector_client::{QdrantConfig, QdrantStore};

use crate::rpc::{RpcConfig, RpcServer};
use crate::shutdown::Shutdown;

mod rpc;
mod shutdown;

/// Startup budget for the vector store to become healthy.
const HEALTH_WAIT_ATTEMPTS: u32 = 30;
const HEALTH_WAIT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Application port
    #[arg(long, env = "PORT", default_value = "8080")]
    port: u16,
    /// Vector store base URL
    #[arg(long, env = "VECTOR_STORE_URL", default_value = "http://127.0.0.1:6333")]
    vector_store_url: String,
    /// Vector store collection name
    #[arg(long, env = "VECTOR_STORE_COLLECTION", default_value = "kairos")]
    vector_store_collection: String,
    /// Vector store API key (optional)
    #[arg(long, env = "VECTOR_STORE_API_KEY")]
    vector_store_api_key: Option<String>,
    /// Embedding service base URL
    #[arg(long, env = "EMBEDDING_URL", default_value = "http://127.0.0.1:11434")]
    embedding_url: String,
    /// Embedding model name
    #[arg(long, env = "EMBEDDING_MODEL", default_value = "nomic-embed-text")]
    embedding_model: String,
    /// Embedding vector dimension
    #[arg(long, env = "EMBEDDING_DIM", default_value = "768")]
    embedding_dim: usize,
    /// KV store URL
    #[arg(long, env = "KV_URL", default_value = "redis://127.0.0.1:6379")]
    kv_url: String,
    /// KV key prefix
    #[arg(long, env = "KV_PREFIX", default_value = "kb:")]
    kv_prefix: String,
    /// Minimum blended score for a search match
    #[arg(long, env = "SCORE_THRESHOLD", default_value = "0.3")]
    score_threshold: f32,
    /// Collapse search results to one entry per chain
    #[arg(long, env = "ENABLE_GROUP_COLLAPSE", default_value = "true", action = clap::ArgAction::Set)]
    enable_group_collapse: bool,
    /// Minimum cosine similarity for comment proofs
    #[arg(long, env = "COMMENT_SEMANTIC_THRESHOLD", default_value = "0.25")]
    comment_semantic_threshold: f32,
    /// Consecutive proof failures tolerated before escalation
    #[arg(long, env = "MAX_RETRIES", default_value = "3")]
    max_retries: u32,
    /// Space used when a request names none
    #[arg(long, env = "DEFAULT_SPACE_ID", default_value = "public")]
    default_space_id: String,
    /// Trigger a vector store snapshot before serving
    #[arg(long, env = "SNAPSHOT_ON_START", default_value = "false", action = clap::ArgAction::Set)]
    snapshot_on_start: bool,
    /// Snapshot output directory (recorded for the operator; snapshots are
    /// stored by the vector store itself)
    #[arg(long, env = "SNAPSHOT_DIR", default_value = "./snapshots")]
    snapshot_dir: String,
    /// Logging level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber_builder =
        tracing_subscriber::fmt::Subscriber::builder().with_env_filter(env_filter);

    let subscriber = subscriber_builder.with_writer(std::io::stderr).finish();
    set_global_default(subscriber).expect("Failed to set subscriber");
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env file if it exists
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    info!("KAIROS node is launching...");

    let (vector, engine, memory) = match bootstrap(&cli).await {
        Ok(parts) => parts,
        Err(err) => {
            error!("KAIROS node failed to start: {err:#}");
            std::process::exit(1);
        }
    };

    let shutdown = Shutdown::default();

    let rpc_config = RpcConfig {
        host: format!("0.0.0.0:{}", cli.port),
        collection: cli.vector_store_collection.clone(),
    };
    let rpc_server = RpcServer::new(rpc_config, engine, vector, shutdown.subscribe());

    let rx_invalidation_shutdown = shutdown.subscribe();

    // Launching tasks for each component
    let rpc_handle = tokio::spawn(async move { rpc_server.run().await });
    let invalidation_handle =
        tokio::spawn(run_invalidation_listener(memory, rx_invalidation_shutdown));
    let shutdown_handle = tokio::spawn(async move { shutdown.run().await });

    // If at least one component exits with an error, the node exits with an error
    match tokio::try_join!(
        flatten(rpc_handle),
        flatten(invalidation_handle),
        flatten(shutdown_handle)
    ) {
        Ok(_) => {
            info!("KAIROS node has shut down");
            std::process::exit(0);
        }
        Err(_) => {
            error!("KAIROS node has exited with error");
            std::process::exit(1);
        }
    }
}

/// Instantiate the adapters, gate on vector store health, and wire the
/// engine together.
async fn bootstrap(
    cli: &Cli,
) -> Result<(Arc<QdrantStore>, Arc<ExecutionEngine>, Arc<MemoryStore>), anyhow::Error> {
    let vector = Arc::new(QdrantStore::new(QdrantConfig {
        url: cli.vector_store_url.clone(),
        collection: cli.vector_store_collection.clone(),
        api_key: cli.vector_store_api_key.clone(),
        dimension: cli.embedding_dim,
    })?);

    vector
        .wait_healthy(HEALTH_WAIT_ATTEMPTS, HEALTH_WAIT_INTERVAL)
        .await?;
    vector.ensure_collection().await?;

    if cli.snapshot_on_start {
        match vector.snapshot().await {
            Ok(name) => info!("Startup snapshot {} (dir {})", name, cli.snapshot_dir),
            Err(err) => warn!("Startup snapshot failed: {err}"),
        }
    }

    let kv = Arc::new(RedisStore::connect(&cli.kv_url, &cli.kv_prefix).await?);
    let embedder = Arc::new(HttpEmbedder::new(
        cli.embedding_url.clone(),
        cli.embedding_model.clone(),
        cli.embedding_dim,
    )?);

    let memory = Arc::new(MemoryStore::new(
        vector.clone(),
        embedder.clone(),
        kv.clone(),
    ));
    let proof = ProofEngine::new(
        ProofStore::new(kv.clone()),
        embedder,
        ProofConfig {
            max_retries: cli.max_retries,
            comment_semantic_threshold: cli.comment_semantic_threshold,
        },
    );
    let engine = Arc::new(ExecutionEngine::new(
        memory.clone(),
        proof,
        kv,
        EngineConfig {
            score_threshold: cli.score_threshold,
            collapse_enabled: cli.enable_group_collapse,
            default_space: cli.default_space_id.clone(),
            ..EngineConfig::default()
        },
    ));

    engine.seed_system_memories().await?;
    info!("Engine ready; system memories seeded");

    Ok((vector, engine, memory))
}

async fn flatten<T>(handle: JoinHandle<Result<T, ()>>) -> Result<T, ()> {
    match handle.await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(err)) => Err(err),
        Err(_) => Err(()),
    }
}

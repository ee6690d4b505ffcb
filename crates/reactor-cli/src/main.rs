mod cli;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use reactor_ai::GeminiClient;
use reactor_auth::{CredentialSource, TokenSource};
use reactor_core::config::{HANDLER_STATUS, WATCHER_STATUS};
use reactor_core::{Answerer, ReactorConfig, TextGenerator};
use reactor_host::{Handled, handle_event, run_watcher};
use reactor_store::FirestoreStore;
use tokio::io::AsyncReadExt;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, Global};

/// Everything a command needs, wired from the global options.
struct Wiring {
    config: ReactorConfig,
    store: FirestoreStore,
    generator: Arc<dyn TextGenerator>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let Cli { global, command } = Cli::parse();
    info!("reactor v{}", env!("CARGO_PKG_VERSION"));

    match command {
        Command::Watch { poll_interval_ms } => {
            if let Err(e) = watch(&global, Duration::from_millis(poll_interval_ms)).await {
                error!("watcher stopped: {e:#}");
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Handle { payload } => handle(&global, payload.as_deref()).await,
        Command::Ask { question } => ask(&global, &question).await,
    }
}

async fn watch(global: &Global, poll_interval: Duration) -> anyhow::Result<()> {
    let wiring = wire(global).await?;
    let store = Arc::new(wiring.store.with_poll_interval(poll_interval));
    let answerer = Answerer::new(store.clone(), wiring.generator, WATCHER_STATUS)
        .with_server_timestamp(true);

    info!(
        project = %wiring.config.project_id,
        collection = %wiring.config.collection,
        "starting watcher"
    );
    let stats = run_watcher(store.as_ref(), &answerer, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    })
    .await
    .context("subscribing to collection")?;

    info!(
        added = stats.added,
        answered = stats.answered,
        generation_failures = stats.generation_failures,
        skipped = stats.skipped,
        lost_races = stats.lost_races,
        failed = stats.failed,
        "watcher stopped"
    );
    Ok(())
}

async fn handle(global: &Global, payload: Option<&Path>) -> anyhow::Result<()> {
    let bytes = read_payload(payload).await?;
    let wiring = wire(global).await?;
    let answerer = Answerer::new(Arc::new(wiring.store), wiring.generator, HANDLER_STATUS);

    match handle_event(&answerer, &bytes).await.context("saving answer")? {
        Handled::Ignored(reason) => info!(%reason, "nothing to do"),
        Handled::Processed(outcome) => info!(?outcome, "event handled"),
    }
    Ok(())
}

async fn ask(global: &Global, question: &str) -> anyhow::Result<()> {
    let generator: Arc<dyn TextGenerator> = match &global.api_key {
        Some(key) => Arc::new(api_key_client(global, key.clone())?),
        None => {
            let tokens = credentials(global).await?;
            let config = global.config(project_id(global, tokens.as_ref()).await?);
            Arc::new(vertex_client(global, &config, tokens)?)
        }
    };
    let answer = generator.generate(question).await.context("generating answer")?;
    println!("{answer}");
    Ok(())
}

async fn read_payload(path: Option<&Path>) -> anyhow::Result<Vec<u8>> {
    match path {
        Some(path) if path != Path::new("-") => tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display())),
        _ => {
            let mut buf = Vec::new();
            tokio::io::stdin()
                .read_to_end(&mut buf)
                .await
                .context("reading payload from stdin")?;
            Ok(buf)
        }
    }
}

async fn wire(global: &Global) -> anyhow::Result<Wiring> {
    let tokens = credentials(global).await?;
    let config = global.config(project_id(global, tokens.as_ref()).await?);

    let mut store = FirestoreStore::new(config.clone(), tokens.clone());
    if let Some(url) = &global.firestore_url {
        store = store.with_base_url(url);
    }
    if let Some(timeout) = global.store_timeout() {
        store = store.with_timeout(timeout)?;
    }

    let generator: Arc<dyn TextGenerator> = match &global.api_key {
        Some(key) => Arc::new(api_key_client(global, key.clone())?),
        None => Arc::new(vertex_client(global, &config, tokens)?),
    };

    Ok(Wiring {
        config,
        store,
        generator,
    })
}

async fn credentials(global: &Global) -> anyhow::Result<Arc<dyn TokenSource>> {
    CredentialSource::pick(global.access_token.clone(), global.credentials.clone())
        .load()
        .await
        .context("loading credentials")
}

async fn project_id(global: &Global, tokens: &dyn TokenSource) -> anyhow::Result<String> {
    if let Some(project) = &global.project {
        return Ok(project.clone());
    }
    match tokens.project_id().await {
        Some(project) => Ok(project),
        None => bail!("no project id: pass --project or set GOOGLE_CLOUD_PROJECT"),
    }
}

fn vertex_client(
    global: &Global,
    config: &ReactorConfig,
    tokens: Arc<dyn TokenSource>,
) -> anyhow::Result<GeminiClient> {
    let client = GeminiClient::vertex(config, tokens);
    with_generate_timeout(global, client)
}

fn api_key_client(global: &Global, key: String) -> anyhow::Result<GeminiClient> {
    let client = GeminiClient::api_key(&global.model, key);
    with_generate_timeout(global, client)
}

fn with_generate_timeout(global: &Global, client: GeminiClient) -> anyhow::Result<GeminiClient> {
    Ok(match global.generate_timeout() {
        Some(timeout) => client.with_timeout(timeout)?,
        None => client,
    })
}

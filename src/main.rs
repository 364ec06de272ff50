use digitrust_core::{
    api,
    config::Config,
    engine::ScoringEngine,
    ledger::RevisionLedger,
    signer::RevisionSigner,
    store::ResultStore,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ----------------------------------------------------------------
    // 0. 加载配置 & 日志
    // ----------------------------------------------------------------
    let _ = dotenvy::dotenv();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        db = %config.db_path,
        key = %config.key_path,
        "configuration loaded"
    );

    // ----------------------------------------------------------------
    // 1. 身份 & 存储
    // ----------------------------------------------------------------
    let signer = RevisionSigner::load_or_generate(&config.key_path)?;
    tracing::info!(public_key = %hex::encode(signer.public_key().to_bytes()), "service identity ready");

    let store = ResultStore::open(&config.db_path)?;
    let ledger = RevisionLedger::open(store.ledger_tree())?;
    tracing::info!(leaves = ledger.len(), "revision ledger ready");

    // ----------------------------------------------------------------
    // 2. 状态共享容器
    // ----------------------------------------------------------------
    let shared_state = Arc::new(api::AppState {
        engine: ScoringEngine::new(config.scoring.clone()),
        store,
        ledger: Arc::new(Mutex::new(ledger)),
        signer: Arc::new(signer),
    });

    // ----------------------------------------------------------------
    // 3. 启动 HTTP 服务
    // ----------------------------------------------------------------
    let app = api::app(shared_state.clone());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "DigiTrust-AVP scoring service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shared_state.store.flush()?;
    tracing::info!("store flushed, bye");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received");
}

use std::net::SocketAddr;
use std::sync::Arc;
use vault_ledger::{
    api, config::Config, db::init_db, BlockSource, Dispatcher, Indexer, IndexerSettings,
    LedgerEngine, Repository, RpcBlockSource,
};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let port = config.port;

    // Initialize database and dependencies
    let pool = match init_db(&config.database_path).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let repo = Arc::new(Repository::new(pool));

    let mut dispatcher = Dispatcher::new(config.udc_address.clone(), config.vault_class_hash.clone());
    if let Err(e) = dispatcher.load(&repo).await {
        eprintln!("Failed to load known contracts: {}", e);
        std::process::exit(1);
    }

    let source: Arc<dyn BlockSource> = Arc::new(RpcBlockSource::new(config.rpc_url.clone()));
    let indexer = Indexer::new(
        source,
        LedgerEngine::new(repo.clone()),
        dispatcher,
        IndexerSettings::from_config(&config),
    );
    tokio::spawn(indexer.run());

    // Create router
    let app = api::create_router(api::AppState::new(repo));

    // Bind to address
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on {}", addr);

    // Run server
    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}

use cinnabar::config::Config;
use cinnabar::persistence::{self, aof::FsyncPolicy, Coordinator};
use cinnabar::pubsub::PubSubBus;
use cinnabar::server;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info};

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = Config::from_args(&args);

    // Recovery happens before the runtime exists; a corrupt file aborts
    // startup with a diagnostic.
    let keyspace = match persistence::recover(&config) {
        Ok(ks) => ks,
        Err(e) => {
            error!("startup recovery failed: {e}");
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                e.to_string(),
            ));
        }
    };

    let mut coordinator = Coordinator::new();
    if config.aof_enabled {
        let aof_path = config.aof_path();
        let policy = FsyncPolicy::from_str(&config.aof_fsync);
        match coordinator.aof.open(&aof_path, policy) {
            Ok(()) => info!("append-only file enabled: {aof_path}"),
            Err(e) => return Err(e),
        }
    }

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if config.workers > 0 {
        builder.worker_threads(config.workers);
    }
    let runtime = builder.enable_all().build()?;

    runtime.block_on(async move {
        let store = Arc::new(RwLock::new(keyspace));
        let pubsub = Arc::new(RwLock::new(PubSubBus::new()));
        let coord = Arc::new(Mutex::new(coordinator));
        server::run_server(store, Arc::new(config), pubsub, coord).await
    })
}

use std::net::SocketAddr;
use std::sync::Arc;

use dss_datanode::{build_router, AppState, Config, ReferenceStore};
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "dss_datanode=info,tower_http=info".into()))
        .json()
        .init();

    let config = Config::from_env();
    info!(min_s2_level = config.min_s2_level, max_s2_level = config.max_s2_level, "starting dss-datanode");

    let state = AppState {
        store: Arc::new(ReferenceStore::new()),
        config: Arc::new(config.clone()),
    };

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap_or_else(|e| {
        eprintln!("could not bind to {addr}: {e}");
        std::process::exit(1);
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutting down");
        })
        .await
        .unwrap_or_else(|e| {
            eprintln!("server error: {e}");
            std::process::exit(1);
        });
}

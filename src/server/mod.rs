//! Admin API server.
//!
//! Thin JSON wrappers over the batch components: kick off searches,
//! register posts, drive the job lifecycle by hand, and inspect state.

mod handlers;
mod routes;

pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::batch::Batcher;
use crate::config::Settings;
use crate::provider::BatchProvider;
use crate::queue::{connect_broker, Broker};
use crate::repository::{JobRepository, PostRepository};

/// Shared state for the admin server.
#[derive(Clone)]
pub struct AppState {
    pub posts: Arc<PostRepository>,
    pub jobs: Arc<JobRepository>,
    pub batcher: Arc<Batcher>,
    pub broker: Arc<dyn Broker>,
}

impl AppState {
    pub async fn new(
        settings: &Settings,
        provider: Arc<dyn BatchProvider>,
    ) -> anyhow::Result<Self> {
        let db_path = settings.database_path();
        let store_timeout = settings.batch.store_timeout();
        let posts = Arc::new(PostRepository::new(&db_path, store_timeout)?);
        let jobs = Arc::new(JobRepository::new(&db_path, store_timeout)?);
        let broker = connect_broker(settings.broker_url.as_deref()).await?;
        let batcher = Arc::new(Batcher::new(
            Arc::clone(&posts),
            Arc::clone(&jobs),
            provider,
            Arc::clone(&broker),
            &settings.batch,
        ));
        batcher.accumulator.start()?;

        Ok(Self {
            posts,
            jobs,
            batcher,
            broker,
        })
    }
}

/// Start the admin server.
pub async fn serve(
    settings: &Settings,
    provider: Arc<dyn BatchProvider>,
    host: &str,
    port: u16,
) -> anyhow::Result<()> {
    let state = AppState::new(settings, provider).await?;
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    tracing::info!("Starting admin server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

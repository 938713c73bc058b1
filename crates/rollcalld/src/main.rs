use std::sync::Arc;

use anyhow::Result;
use rollcall_core::{Gallery, GalleryHandle, Verifier};
use tracing_subscriber::EnvFilter;

mod analyzer;
mod config;
mod dbus_interface;
mod engine;
mod store;

use analyzer::ProcessAnalyzer;
use config::Config;
use dbus_interface::RollcallService;
use store::SqliteStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::from_env();

    // Load the gallery snapshot. A missing file is not fatal — the daemon
    // starts with an empty gallery and every scan reports EmptyGallery
    // until a reload succeeds.
    let gallery = if config.gallery_path.exists() {
        let g = Gallery::load(&config.gallery_path)
            .map_err(|e| anyhow::anyhow!("gallery load: {e}"))?;
        tracing::info!(
            path = %config.gallery_path.display(),
            entries = g.len(),
            dim = g.dim(),
            "gallery loaded"
        );
        g
    } else {
        tracing::warn!(
            path = %config.gallery_path.display(),
            "gallery file not found; starting with an empty gallery"
        );
        Gallery::new(Vec::new()).map_err(|e| anyhow::anyhow!("empty gallery: {e}"))?
    };
    let gallery = Arc::new(GalleryHandle::new(gallery));

    let store = SqliteStore::open(&config.db_path)
        .map_err(|e| anyhow::anyhow!("store open: {e}"))?;
    tracing::info!(path = %config.db_path.display(), "attendance store opened");

    // Two connections to the analyzer helper: the eye reader and the
    // embedder are distinct external functions with their own traffic.
    let eyes = ProcessAnalyzer::new(&config.analyzer_socket);
    let embedder = ProcessAnalyzer::new(&config.analyzer_socket);

    let verifier = Verifier::new(config.pipeline_config());
    let engine = engine::spawn_engine(
        verifier,
        embedder,
        eyes,
        store,
        gallery.clone(),
        config.gallery_path.clone(),
    );

    let service = RollcallService::new(engine, gallery);
    let _connection = zbus::connection::Builder::system()?
        .name("org.rollcall.Attendance1")?
        .serve_at("/org/rollcall/Attendance1", service)?
        .build()
        .await?;

    tracing::info!("rollcalld ready on org.rollcall.Attendance1");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}

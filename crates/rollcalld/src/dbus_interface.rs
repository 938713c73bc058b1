use std::sync::Arc;

use rollcall_core::GalleryHandle;
use zbus::interface;

use crate::engine::{BurstFrame, EngineHandle};

/// D-Bus interface for the Rollcall attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
pub struct RollcallService {
    engine: EngineHandle,
    gallery: Arc<GalleryHandle>,
}

impl RollcallService {
    pub fn new(engine: EngineHandle, gallery: Arc<GalleryHandle>) -> Self {
        Self { engine, gallery }
    }
}

#[interface(name = "org.rollcall.Attendance1")]
impl RollcallService {
    /// Run one verification attempt over a submitted frame burst.
    ///
    /// Each frame is `(sequence, capture offset in ms, encoded image bytes)`.
    /// Returns the structured attempt outcome as JSON.
    async fn verify(&self, frames: Vec<(u32, u64, Vec<u8>)>) -> zbus::fdo::Result<String> {
        tracing::info!(frames = frames.len(), "verify requested");
        let burst: Vec<BurstFrame> = frames
            .into_iter()
            .map(|(sequence, offset_ms, bytes)| BurstFrame {
                sequence,
                offset_ms,
                bytes,
            })
            .collect();

        let reply = self
            .engine
            .verify(burst)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;

        serde_json::to_string(&reply).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Rebuild the gallery snapshot from its file and swap it in atomically.
    async fn reload_gallery(&self) -> zbus::fdo::Result<String> {
        tracing::info!("gallery reload requested");
        let (version, entries) = self
            .engine
            .reload_gallery()
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;

        Ok(serde_json::json!({
            "version": version,
            "entries": entries,
        })
        .to_string())
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "gallery_version": self.gallery.version(),
            "gallery_entries": self.gallery.current().len(),
        })
        .to_string())
    }
}

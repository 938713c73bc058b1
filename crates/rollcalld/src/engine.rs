//! Verification engine thread.
//!
//! All blocking work — frame decoding, analyzer round trips, the pipeline
//! itself, gallery reloads, store access — happens on one dedicated OS
//! thread that owns the analyzer connections and the store. D-Bus handlers
//! talk to it through a clone-safe [`EngineHandle`].
//!
//! Per-attempt state (the liveness session) is constructed inside each
//! request by the pipeline and dropped with it; nothing attempt-scoped is
//! pooled or reused across requests.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rollcall_core::{
    AttemptOutcome, EyeReader, FaceEmbedder, Frame, GalleryHandle, RejectReason, Verifier,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::store::{IdentityRecord, SqliteStore};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("gallery reload failed: {0}")]
    Reload(String),
}

/// One frame of a submitted burst, still encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurstFrame {
    pub sequence: u32,
    pub offset_ms: u64,
    pub bytes: Vec<u8>,
}

/// Verification reply: the pipeline outcome plus the matched identity's
/// display record, when one was matched and is on file.
#[derive(Debug, Serialize)]
pub struct VerifyReply {
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
    pub identity: Option<IdentityRecord>,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Verify {
        burst: Vec<BurstFrame>,
        reply: oneshot::Sender<VerifyReply>,
    },
    ReloadGallery {
        reply: oneshot::Sender<Result<(u64, usize), String>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Run one verification attempt over a frame burst.
    pub async fn verify(&self, burst: Vec<BurstFrame>) -> Result<VerifyReply, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Verify {
                burst,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Rebuild the gallery snapshot from its file and swap it in.
    pub async fn reload_gallery(&self) -> Result<(u64, usize), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::ReloadGallery { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx
            .await
            .map_err(|_| EngineError::ChannelClosed)?
            .map_err(EngineError::Reload)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The analyzers and the store move onto the thread; the gallery handle is
/// shared so status queries and concurrent readers see snapshot swaps
/// immediately.
pub fn spawn_engine<E, R>(
    verifier: Verifier,
    mut embedder: E,
    mut eyes: R,
    mut store: SqliteStore,
    gallery: Arc<GalleryHandle>,
    gallery_path: PathBuf,
) -> EngineHandle
where
    E: FaceEmbedder + Send + 'static,
    R: EyeReader + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Verify { burst, reply } => {
                        let result = run_verify(
                            &verifier,
                            burst,
                            &mut embedder,
                            &mut eyes,
                            &gallery,
                            &mut store,
                        );
                        let _ = reply.send(result);
                    }
                    EngineRequest::ReloadGallery { reply } => {
                        let result = gallery
                            .reload(&gallery_path)
                            .map_err(|e| e.to_string());
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle { tx }
}

/// Decode the burst, run the pipeline, enrich with the identity record.
fn run_verify(
    verifier: &Verifier,
    burst: Vec<BurstFrame>,
    embedder: &mut dyn FaceEmbedder,
    eyes: &mut dyn EyeReader,
    gallery: &Arc<GalleryHandle>,
    store: &mut SqliteStore,
) -> VerifyReply {
    let mut frames = Vec::with_capacity(burst.len());
    for f in &burst {
        match Frame::decode(&f.bytes, f.sequence, Duration::from_millis(f.offset_ms)) {
            Ok(frame) => frames.push(frame),
            Err(e) => {
                tracing::info!(sequence = f.sequence, error = %e, "rejected: undecodable frame");
                return VerifyReply {
                    outcome: AttemptOutcome::rejected(RejectReason::InvalidInput),
                    identity: None,
                };
            }
        }
    }

    // Pin the snapshot for the whole attempt; a concurrent reload publishes
    // a new one without disturbing this read.
    let snapshot = gallery.current();

    let outcome = verifier.verify(frames, Utc::now(), embedder, eyes, &snapshot, store);

    let identity = outcome
        .identity_id
        .as_deref()
        .and_then(|id| match store.get_identity(id) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(identity_id = id, error = %e, "identity record fetch failed");
                None
            }
        });

    VerifyReply { outcome, identity }
}

//! Bridge to the external face analyzer helper.
//!
//! Embedding extraction and eye-landmark reading are opaque external
//! functions as far as the pipeline is concerned. The daemon reaches them
//! through a helper process listening on a Unix socket, speaking
//! length-prefixed bincode messages: one request per frame, one response
//! per request.
//!
//! The bridge implements the core's [`FaceEmbedder`] and [`EyeReader`]
//! seams. A broken connection is dropped and re-established on the next
//! call; a helper-reported error or garbage on the wire surfaces as
//! [`AnalyzerError`], which the pipeline maps to an operational rejection.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rollcall_core::{AnalyzerError, Embedding, EyeReader, FaceEmbedder, FaceObservation, Frame};
use serde::{Deserialize, Serialize};

/// Largest response the bridge will accept; anything bigger is a protocol
/// violation, not a legitimate embedding.
const MAX_RESPONSE_BYTES: u32 = 16 * 1024 * 1024;

const IO_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize, Deserialize, Debug)]
pub enum AnalyzerRequest {
    /// Eye openness + positions for the liveness machine.
    ReadEyes {
        width: u32,
        height: u32,
        data: Vec<u8>,
    },
    /// Probe embedding for the matcher.
    Embed {
        width: u32,
        height: u32,
        data: Vec<u8>,
    },
}

#[derive(Serialize, Deserialize, Debug)]
pub enum AnalyzerResponse {
    Eyes {
        openness: f32,
        eye_centers: [(f32, f32); 2],
    },
    Embedding {
        values: Vec<f32>,
    },
    NoFace,
    Error(String),
}

/// Client for the analyzer helper socket.
pub struct ProcessAnalyzer {
    socket_path: PathBuf,
    stream: Option<UnixStream>,
}

impl ProcessAnalyzer {
    pub fn new(socket_path: &Path) -> Self {
        Self {
            socket_path: socket_path.to_path_buf(),
            stream: None,
        }
    }

    fn connect(&mut self) -> Result<&mut UnixStream, AnalyzerError> {
        if self.stream.is_none() {
            let stream = UnixStream::connect(&self.socket_path).map_err(|e| {
                AnalyzerError::Unavailable(format!(
                    "connect to {}: {e}",
                    self.socket_path.display()
                ))
            })?;
            stream
                .set_read_timeout(Some(IO_TIMEOUT))
                .and_then(|_| stream.set_write_timeout(Some(IO_TIMEOUT)))
                .map_err(|e| AnalyzerError::Unavailable(format!("set socket timeout: {e}")))?;
            tracing::info!(socket = %self.socket_path.display(), "connected to analyzer helper");
            self.stream = Some(stream);
        }
        Ok(self.stream.as_mut().expect("stream just set"))
    }

    /// One request/response round trip. Any I/O failure drops the
    /// connection so the next call reconnects.
    fn round_trip(&mut self, request: &AnalyzerRequest) -> Result<AnalyzerResponse, AnalyzerError> {
        let result = self.try_round_trip(request);
        if result.is_err() {
            self.stream = None;
        }
        result
    }

    fn try_round_trip(
        &mut self,
        request: &AnalyzerRequest,
    ) -> Result<AnalyzerResponse, AnalyzerError> {
        let stream = self.connect()?;

        let payload = bincode::serialize(request)
            .map_err(|e| AnalyzerError::Protocol(format!("encode request: {e}")))?;
        let len = (payload.len() as u32).to_le_bytes();
        stream
            .write_all(&len)
            .and_then(|_| stream.write_all(&payload))
            .map_err(|e| AnalyzerError::Unavailable(format!("send request: {e}")))?;

        let mut len_buf = [0u8; 4];
        stream
            .read_exact(&mut len_buf)
            .map_err(|e| AnalyzerError::Unavailable(format!("read response length: {e}")))?;
        let len = u32::from_le_bytes(len_buf);
        if len > MAX_RESPONSE_BYTES {
            return Err(AnalyzerError::Protocol(format!(
                "response length {len} exceeds limit"
            )));
        }

        let mut buf = vec![0u8; len as usize];
        stream
            .read_exact(&mut buf)
            .map_err(|e| AnalyzerError::Unavailable(format!("read response: {e}")))?;

        bincode::deserialize(&buf)
            .map_err(|e| AnalyzerError::Protocol(format!("decode response: {e}")))
    }
}

impl EyeReader for ProcessAnalyzer {
    fn read_eyes(&mut self, frame: &Frame) -> Result<Option<FaceObservation>, AnalyzerError> {
        let response = self.round_trip(&AnalyzerRequest::ReadEyes {
            width: frame.width,
            height: frame.height,
            data: frame.data.clone(),
        })?;

        match response {
            AnalyzerResponse::Eyes {
                openness,
                eye_centers,
            } => Ok(Some(FaceObservation {
                openness,
                eye_centers,
            })),
            AnalyzerResponse::NoFace => Ok(None),
            AnalyzerResponse::Error(msg) => Err(AnalyzerError::Protocol(msg)),
            other => Err(AnalyzerError::Protocol(format!(
                "unexpected response to ReadEyes: {other:?}"
            ))),
        }
    }
}

impl FaceEmbedder for ProcessAnalyzer {
    fn embed(&mut self, frame: &Frame) -> Result<Option<Embedding>, AnalyzerError> {
        let response = self.round_trip(&AnalyzerRequest::Embed {
            width: frame.width,
            height: frame.height,
            data: frame.data.clone(),
        })?;

        match response {
            AnalyzerResponse::Embedding { values } => Ok(Some(Embedding::new(values))),
            AnalyzerResponse::NoFace => Ok(None),
            AnalyzerResponse::Error(msg) => Err(AnalyzerError::Protocol(msg)),
            other => Err(AnalyzerError::Protocol(format!(
                "unexpected response to Embed: {other:?}"
            ))),
        }
    }
}

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::Frame;

/// Face embedding vector produced by the external embedding function.
///
/// Fixed-length for a given deployment (the dimensionality is set by the
/// embedding model, e.g. 128 or 512). Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance to another embedding.
    ///
    /// Lower = more similar. Both embeddings must have the same
    /// dimensionality; callers enforce this via gallery validation.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Per-frame product of the external eye-landmark computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceObservation {
    /// Eye-openness scalar (eye aspect ratio). Higher = more open.
    pub openness: f32,
    /// Left and right eye centre positions in frame coordinates.
    pub eye_centers: [(f32, f32); 2],
}

/// Failure of an external analyzer call (the analyzer process died, spoke
/// garbage, or timed out). Distinct from "no face in this frame", which is
/// a normal `None` result.
#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("analyzer unavailable: {0}")]
    Unavailable(String),
    #[error("analyzer protocol error: {0}")]
    Protocol(String),
}

/// External embedding function: frame in, identity-summarizing vector out.
///
/// `Ok(None)` means no face was found in the frame.
pub trait FaceEmbedder {
    fn embed(&mut self, frame: &Frame) -> Result<Option<Embedding>, AnalyzerError>;
}

/// External eye-landmark function: frame in, eye openness + positions out.
///
/// `Ok(None)` means no face/landmarks were found in the frame.
pub trait EyeReader {
    fn read_eyes(&mut self, frame: &Frame) -> Result<Option<FaceObservation>, AnalyzerError>;
}

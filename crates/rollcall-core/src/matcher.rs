//! Nearest-neighbor matching of a probe embedding against the gallery.

use thiserror::Error;

use crate::gallery::Gallery;
use crate::types::Embedding;

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("gallery has no enrolled identities")]
    EmptyGallery,
    #[error("probe embedding has dimension {got}, gallery expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Result of matching a probe against a gallery snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    /// The arg-min identity — returned even when `is_match` is false, so
    /// callers can surface "closest but below threshold" diagnostics.
    pub identity_id: String,
    /// Euclidean distance to that identity's embedding.
    pub distance: f32,
    /// True iff `distance < threshold`.
    pub is_match: bool,
}

/// Strategy for matching a probe embedding against a gallery of enrolled
/// identities.
pub trait Matcher {
    fn best_match(
        &self,
        probe: &Embedding,
        gallery: &Gallery,
        threshold: f32,
    ) -> Result<MatchOutcome, MatchError>;
}

/// Euclidean-distance arg-min matcher.
///
/// Scans every gallery entry; ties keep the first entry in gallery order.
/// Callers must not rely on tie-break stability across reloads, since
/// gallery order is reload-dependent. Deterministic and side-effect-free.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn best_match(
        &self,
        probe: &Embedding,
        gallery: &Gallery,
        threshold: f32,
    ) -> Result<MatchOutcome, MatchError> {
        if gallery.is_empty() {
            return Err(MatchError::EmptyGallery);
        }
        if probe.dim() != gallery.dim() {
            return Err(MatchError::DimensionMismatch {
                expected: gallery.dim(),
                got: probe.dim(),
            });
        }

        let mut best_idx = 0usize;
        let mut best_distance = f32::INFINITY;

        // Strict < keeps the first entry on exact ties.
        for (i, entry) in gallery.entries().iter().enumerate() {
            let distance = probe.euclidean_distance(&entry.embedding);
            if distance < best_distance {
                best_distance = distance;
                best_idx = i;
            }
        }

        Ok(MatchOutcome {
            identity_id: gallery.entries()[best_idx].identity_id.clone(),
            distance: best_distance,
            is_match: best_distance < threshold,
        })
    }
}

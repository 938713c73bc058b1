//! Verification orchestrator.
//!
//! Runs one attendance attempt through
//! `RECEIVED -> LIVENESS_CHECK -> MATCHING -> GATING`, short-circuiting to a
//! terminal rejection with a specific reason at the first failing stage.
//! Liveness strictly precedes matching: a failed liveness verdict means the
//! matcher is never invoked.
//!
//! One deterministic pass per attempt, no internal retries; resubmitting a
//! new frame burst is the caller's job.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::frame::{order_burst, Frame};
use crate::gallery::Gallery;
use crate::gate::{admit, AdmitDecision, CooldownPolicy};
use crate::liveness::{new_session, LivenessConfig, LivenessReport, LivenessVerdict};
use crate::matcher::{EuclideanMatcher, MatchError, Matcher};
use crate::types::{EyeReader, FaceEmbedder};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("attendance store unavailable: {0}")]
    Unavailable(String),
}

/// External attendance store, read+write collaborator. All cooldown state
/// lives here; the core only reads it through this seam.
pub trait AttendanceStore {
    fn last_event_time(&mut self, identity_id: &str)
        -> Result<Option<DateTime<Utc>>, StoreError>;
    fn record_event(&mut self, event: &AttendanceEvent) -> Result<(), StoreError>;
}

/// One logical attendance record per identity per cooldown window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceEvent {
    pub identity_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessFailure {
    Timeout,
    InsufficientBlinks,
    NoFace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RejectReason {
    /// Malformed burst: too few or too many frames. Not retryable as-is.
    InvalidInput,
    /// Liveness verdict was not `Passed`. Retryable with a new burst.
    LivenessFailed(LivenessFailure),
    /// Best gallery distance was at or above the match threshold.
    NotRecognized,
    /// Identity matched but the cooldown gate denied a duplicate event.
    DuplicateAttendance,
    /// Nobody enrolled — distinct from a normal non-match so operators can
    /// tell "empty gallery" from "no match found".
    EmptyGallery,
    /// The external embedding/landmark analyzer failed or is mis-deployed.
    AnalyzerUnavailable,
    /// The attendance store could not be read or written. Never silently
    /// downgraded to `DuplicateAttendance` or an admit.
    StoreUnavailable,
    /// Attempt deadline exceeded outside the liveness stage.
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LivenessSummary {
    pub blinks: u32,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchSummary {
    pub distance: f32,
}

/// Structured result of one verification attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptOutcome {
    pub admitted: bool,
    pub reason: Option<RejectReason>,
    pub identity_id: Option<String>,
    pub liveness: Option<LivenessSummary>,
    #[serde(rename = "match")]
    pub match_summary: Option<MatchSummary>,
    /// The event emitted for the external collaborator; present only in the
    /// admitted terminal state, and only after the store accepted it.
    pub event: Option<AttendanceEvent>,
}

impl AttemptOutcome {
    /// Terminal rejection with no stage summaries attached.
    pub fn rejected(reason: RejectReason) -> Self {
        Self {
            admitted: false,
            reason: Some(reason),
            identity_id: None,
            liveness: None,
            match_summary: None,
            event: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Accepted burst size range. The blink machine needs several frames,
    /// so the minimum is at least 3.
    pub min_frames: usize,
    pub max_frames: usize,
    /// Euclidean distance below which the arg-min identity is a match.
    /// Lower = fewer false accepts.
    pub match_threshold: f32,
    pub liveness: LivenessConfig,
    pub cooldown: CooldownPolicy,
    /// Overall wall-clock deadline for one attempt.
    pub attempt_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_frames: 3,
            max_frames: 64,
            match_threshold: 0.6,
            liveness: LivenessConfig::default(),
            cooldown: CooldownPolicy::Rolling(chrono::Duration::hours(24)),
            attempt_timeout: Duration::from_secs(15),
        }
    }
}

/// The verification orchestrator. Stateless across attempts; per-attempt
/// state (the liveness session) is constructed inside `verify` and dropped
/// with it.
pub struct Verifier {
    config: PipelineConfig,
    matcher: Box<dyn Matcher + Send + Sync>,
}

impl Verifier {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            matcher: Box::new(EuclideanMatcher),
        }
    }

    pub fn with_matcher(config: PipelineConfig, matcher: Box<dyn Matcher + Send + Sync>) -> Self {
        Self { config, matcher }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one verification attempt over a frame burst.
    pub fn verify(
        &self,
        mut frames: Vec<Frame>,
        now: DateTime<Utc>,
        embedder: &mut dyn FaceEmbedder,
        eyes: &mut dyn EyeReader,
        gallery: &Gallery,
        store: &mut dyn AttendanceStore,
    ) -> AttemptOutcome {
        let attempt_id = Uuid::new_v4();
        let span = tracing::info_span!("verify", attempt = %attempt_id);
        let _enter = span.enter();
        let started = Instant::now();

        // RECEIVED
        if frames.len() < self.config.min_frames || frames.len() > self.config.max_frames {
            tracing::info!(frames = frames.len(), "rejected: burst size out of range");
            return AttemptOutcome::rejected(RejectReason::InvalidInput);
        }
        order_burst(&mut frames);

        // LIVENESS_CHECK
        let report = match self.run_liveness(&frames, started, eyes) {
            Ok(report) => report,
            Err(outcome) => return outcome,
        };
        let liveness = LivenessSummary {
            blinks: report.blinks,
            confidence: report.confidence,
        };
        if report.verdict != LivenessVerdict::Passed {
            let failure = match report.verdict {
                LivenessVerdict::FailedTimeout => LivenessFailure::Timeout,
                LivenessVerdict::FailedNoFace => LivenessFailure::NoFace,
                _ => LivenessFailure::InsufficientBlinks,
            };
            tracing::info!(verdict = ?report.verdict, blinks = report.blinks, "rejected: liveness failed");
            return AttemptOutcome {
                liveness: Some(liveness),
                ..AttemptOutcome::rejected(RejectReason::LivenessFailed(failure))
            };
        }

        // MATCHING
        if started.elapsed() >= self.config.attempt_timeout {
            return AttemptOutcome {
                liveness: Some(liveness),
                ..AttemptOutcome::rejected(RejectReason::Timeout)
            };
        }
        let probe = match self.extract_probe(&frames, embedder) {
            Ok(Some(probe)) => probe,
            Ok(None) => {
                // Liveness passed but no frame yielded an embedding — face
                // evidence was insufficient after all.
                tracing::info!("rejected: no probe embedding in any frame");
                return AttemptOutcome {
                    liveness: Some(liveness),
                    ..AttemptOutcome::rejected(RejectReason::LivenessFailed(
                        LivenessFailure::NoFace,
                    ))
                };
            }
            Err(outcome) => return outcome,
        };

        let outcome = match self
            .matcher
            .best_match(&probe, gallery, self.config.match_threshold)
        {
            Ok(outcome) => outcome,
            Err(MatchError::EmptyGallery) => {
                tracing::warn!("rejected: gallery has no enrolled identities");
                return AttemptOutcome {
                    liveness: Some(liveness),
                    ..AttemptOutcome::rejected(RejectReason::EmptyGallery)
                };
            }
            Err(MatchError::DimensionMismatch { expected, got }) => {
                tracing::error!(
                    expected,
                    got,
                    "probe dimension does not match gallery; analyzer and gallery disagree"
                );
                return AttemptOutcome {
                    liveness: Some(liveness),
                    ..AttemptOutcome::rejected(RejectReason::AnalyzerUnavailable)
                };
            }
        };
        let match_summary = MatchSummary {
            distance: outcome.distance,
        };
        if !outcome.is_match {
            tracing::info!(
                closest = %outcome.identity_id,
                distance = outcome.distance,
                threshold = self.config.match_threshold,
                "rejected: below match threshold"
            );
            return AttemptOutcome {
                liveness: Some(liveness),
                match_summary: Some(match_summary),
                ..AttemptOutcome::rejected(RejectReason::NotRecognized)
            };
        }
        let identity_id = outcome.identity_id;

        // GATING
        if started.elapsed() >= self.config.attempt_timeout {
            return AttemptOutcome {
                liveness: Some(liveness),
                match_summary: Some(match_summary),
                ..AttemptOutcome::rejected(RejectReason::Timeout)
            };
        }
        let last = match store.last_event_time(&identity_id) {
            Ok(last) => last,
            Err(e) => {
                tracing::warn!(identity_id = %identity_id, error = %e, "store read failed");
                return AttemptOutcome {
                    liveness: Some(liveness),
                    match_summary: Some(match_summary),
                    identity_id: Some(identity_id),
                    ..AttemptOutcome::rejected(RejectReason::StoreUnavailable)
                };
            }
        };
        if admit(&identity_id, now, last, &self.config.cooldown) == AdmitDecision::DenyAlreadyMarked
        {
            tracing::info!(identity_id = %identity_id, "rejected: duplicate attendance");
            return AttemptOutcome {
                liveness: Some(liveness),
                match_summary: Some(match_summary),
                identity_id: Some(identity_id),
                ..AttemptOutcome::rejected(RejectReason::DuplicateAttendance)
            };
        }

        // ADMITTED — the event carries the attempt's `now`, so the gate
        // decision and the persisted record agree.
        let event = AttendanceEvent {
            identity_id: identity_id.clone(),
            timestamp: now,
        };
        if let Err(e) = store.record_event(&event) {
            tracing::warn!(identity_id = %identity_id, error = %e, "store write failed");
            return AttemptOutcome {
                liveness: Some(liveness),
                match_summary: Some(match_summary),
                identity_id: Some(identity_id),
                ..AttemptOutcome::rejected(RejectReason::StoreUnavailable)
            };
        }

        tracing::info!(
            identity_id = %identity_id,
            blinks = liveness.blinks,
            distance = match_summary.distance,
            "attendance admitted"
        );
        AttemptOutcome {
            admitted: true,
            reason: None,
            identity_id: Some(identity_id),
            liveness: Some(liveness),
            match_summary: Some(match_summary),
            event: Some(event),
        }
    }

    /// Feed the burst through a fresh liveness session, in submission order.
    fn run_liveness(
        &self,
        frames: &[Frame],
        started: Instant,
        eyes: &mut dyn EyeReader,
    ) -> Result<LivenessReport, AttemptOutcome> {
        let mut session = new_session(&self.config.liveness);

        for frame in frames {
            if started.elapsed() >= self.config.attempt_timeout {
                let mut report = session.finalize();
                report.verdict = LivenessVerdict::FailedTimeout;
                return Ok(report);
            }
            let obs = match eyes.read_eyes(frame) {
                Ok(obs) => obs,
                Err(e) => {
                    tracing::error!(error = %e, "eye analyzer failed");
                    return Err(AttemptOutcome::rejected(RejectReason::AnalyzerUnavailable));
                }
            };
            let verdict = session.push(obs.as_ref(), frame.offset);
            if verdict.is_terminal() {
                break;
            }
        }

        Ok(session.finalize())
    }

    /// Extract the probe embedding, starting from the middle frame of the
    /// burst (least motion-blur bias) and scanning outward.
    fn extract_probe(
        &self,
        frames: &[Frame],
        embedder: &mut dyn FaceEmbedder,
    ) -> Result<Option<crate::types::Embedding>, AttemptOutcome> {
        let mid = frames.len() / 2;
        // mid, mid+1, mid-1, mid+2, mid-2, ... until the whole burst is covered
        let mut order = Vec::with_capacity(frames.len());
        order.push(mid);
        for step in 1..frames.len() {
            if mid + step < frames.len() {
                order.push(mid + step);
            }
            if let Some(idx) = mid.checked_sub(step) {
                order.push(idx);
            }
        }

        for idx in order {
            let frame = &frames[idx];
            match embedder.embed(frame) {
                Ok(Some(embedding)) => return Ok(Some(embedding)),
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(error = %e, "embedder failed");
                    return Err(AttemptOutcome::rejected(RejectReason::AnalyzerUnavailable));
                }
            }
        }
        Ok(None)
    }
}

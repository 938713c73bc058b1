//! rollcall-core — Attendance verification pipeline.
//!
//! Matches a probe face embedding against a gallery of enrolled identities,
//! requires blink-based (or movement-based) liveness before any match is
//! trusted, and gates duplicate attendance events behind a cooldown window.
//!
//! Embedding extraction and eye-landmark detection are external concerns,
//! reached through the [`FaceEmbedder`] and [`EyeReader`] traits.

pub mod frame;
pub mod gallery;
pub mod gate;
pub mod liveness;
pub mod matcher;
pub mod pipeline;
pub mod types;

pub use frame::{Frame, FrameError};
pub use gallery::{Gallery, GalleryEntry, GalleryError, GalleryHandle};
pub use gate::{admit, AdmitDecision, CooldownPolicy};
pub use liveness::{
    new_session, LivenessConfig, LivenessMode, LivenessReport, LivenessSession, LivenessVerdict,
};
pub use matcher::{EuclideanMatcher, MatchError, MatchOutcome, Matcher};
pub use pipeline::{
    AttemptOutcome, AttendanceEvent, AttendanceStore, LivenessFailure, LivenessSummary,
    MatchSummary, PipelineConfig, RejectReason, StoreError, Verifier,
};
pub use types::{AnalyzerError, Embedding, EyeReader, FaceEmbedder, FaceObservation};

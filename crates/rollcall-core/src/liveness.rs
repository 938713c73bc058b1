//! Multi-frame liveness verification.
//!
//! Defends the matcher from being fed a static photo or replayed video by
//! requiring observed activity across a short burst of frames. The default
//! variant counts eye blinks with a hysteresis state machine; a
//! movement-based variant checks involuntary eye drift (a printed photo
//! produces near-identical eye positions frame to frame); the composite
//! variant requires both.
//!
//! Sessions are attempt-scoped: construct one per verification attempt with
//! [`new_session`], feed frames in submission order, then consume it with
//! `finalize`. There is no reset — a new attempt gets a new session.

use std::time::Duration;

use crate::types::FaceObservation;

/// Discretized per-frame eye state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EyeState {
    Open,
    Closing,
    Closed,
    Opening,
}

/// Terminal and intermediate verdicts shared by all liveness variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessVerdict {
    /// Budget remains and the activity requirement is unmet. Single-shot
    /// callers treat end-of-batch `Pending` as `FailedInsufficientBlinks`.
    Pending,
    Passed,
    FailedTimeout,
    FailedInsufficientBlinks,
    FailedNoFace,
}

impl LivenessVerdict {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LivenessVerdict::Pending)
    }
}

/// Which liveness variant to run. Chosen by explicit configuration; there is
/// no availability-based fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LivenessMode {
    #[default]
    Blink,
    Movement,
    Composite,
}

#[derive(Debug, Clone)]
pub struct LivenessConfig {
    pub mode: LivenessMode,
    /// Blinks required before the blink variant passes. Minimum 1.
    pub min_blinks: u32,
    /// Openness at or below this is closed-leaning.
    pub closed_threshold: f32,
    /// Openness at or above this is open-leaning. The gap between the two
    /// thresholds is the hysteresis band: oscillation inside it never
    /// registers a blink.
    pub open_threshold: f32,
    /// Attempt time budget; a frame captured past this resolves
    /// `FailedTimeout`.
    pub time_budget: Duration,
    /// Fraction of no-face frames above which the attempt resolves
    /// `FailedNoFace`.
    pub max_no_face_fraction: f32,
    /// Movement variant: minimum mean eye-centre displacement (pixels)
    /// between consecutive observed frames.
    pub min_eye_displacement: f32,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            mode: LivenessMode::Blink,
            min_blinks: 1,
            closed_threshold: 0.21,
            open_threshold: 0.25,
            time_budget: Duration::from_secs(8),
            max_no_face_fraction: 0.5,
            min_eye_displacement: 0.8,
        }
    }
}

/// Final report of a liveness session.
#[derive(Debug, Clone, PartialEq)]
pub struct LivenessReport {
    pub verdict: LivenessVerdict,
    pub blinks: u32,
    /// Diagnostic confidence in [0, 1]. Never part of the admission
    /// decision — the verdict alone decides.
    pub confidence: f32,
    pub frames_seen: usize,
    pub no_face_frames: usize,
}

/// One liveness variant over one attempt.
///
/// `finalize` takes the session by value: a concluded session cannot be fed
/// further frames or reset mid-attempt.
pub trait LivenessSession {
    /// Advance the session by one frame, in submission order. `None` means
    /// no face/landmarks were found in the frame.
    fn push(&mut self, obs: Option<&FaceObservation>, offset: Duration) -> LivenessVerdict;

    /// Resolve the verdict for a finished burst and consume the session.
    fn finalize(self: Box<Self>) -> LivenessReport;
}

/// Construct the configured liveness variant for a fresh attempt.
pub fn new_session(cfg: &LivenessConfig) -> Box<dyn LivenessSession> {
    match cfg.mode {
        LivenessMode::Blink => Box::new(BlinkSession::new(cfg)),
        LivenessMode::Movement => Box::new(MovementSession::new(cfg)),
        LivenessMode::Composite => Box::new(CompositeSession::new(cfg)),
    }
}

/// Which side of the hysteresis band a measurement falls on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bucket {
    Open,
    Transitional,
    Closed,
}

fn bucket(openness: f32, cfg: &LivenessConfig) -> Bucket {
    if openness <= cfg.closed_threshold {
        Bucket::Closed
    } else if openness >= cfg.open_threshold {
        Bucket::Open
    } else {
        Bucket::Transitional
    }
}

// Variance of the openness trace, used only for diagnostic confidence.
fn variance(samples: &[f32]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let n = samples.len() as f32;
    let mean = samples.iter().sum::<f32>() / n;
    samples.iter().map(|&s| (s - mean).powi(2)).sum::<f32>() / n
}

/// Openness variance of a typical live blink sequence; saturates the
/// activity component of the confidence score.
const CONFIDENCE_VARIANCE_REF: f32 = 0.002;

// --- Blink variant ---

/// Blink-counting state machine.
///
/// Cycle: `Open -> Closing -> Closed -> Opening -> Open`. A completed
/// `Open -> Closed -> Open` excursion is one blink. Only forward transitions
/// advance the cycle; a frame that would move backward (`Opening` straight
/// back to closed-leaning) starts a fresh partial blink instead.
pub struct BlinkSession {
    cfg: LivenessConfig,
    state: EyeState,
    verdict: LivenessVerdict,
    blinks: u32,
    frames_seen: usize,
    no_face_frames: usize,
    openness_trace: Vec<f32>,
}

impl BlinkSession {
    fn new(cfg: &LivenessConfig) -> Self {
        let mut cfg = cfg.clone();
        cfg.min_blinks = cfg.min_blinks.max(1);
        Self {
            cfg,
            state: EyeState::Open,
            verdict: LivenessVerdict::Pending,
            blinks: 0,
            frames_seen: 0,
            no_face_frames: 0,
            openness_trace: Vec::new(),
        }
    }

    fn step(&mut self, b: Bucket) {
        use Bucket as B;
        use EyeState as S;

        let (next, completed_blink) = match (self.state, b) {
            (S::Open, B::Open) => (S::Open, false),
            (S::Open, B::Transitional) => (S::Closing, false),
            // Fast blink: eyes fully closed within one frame interval.
            (S::Open, B::Closed) => (S::Closed, false),

            (S::Closing, B::Closed) => (S::Closed, false),
            (S::Closing, B::Transitional) => (S::Closing, false),
            // Aborted descent — never reached Closed, no blink.
            (S::Closing, B::Open) => (S::Open, false),

            (S::Closed, B::Closed) => (S::Closed, false),
            (S::Closed, B::Transitional) => (S::Opening, false),
            (S::Closed, B::Open) => (S::Open, true),

            (S::Opening, B::Open) => (S::Open, true),
            (S::Opening, B::Transitional) => (S::Opening, false),
            // Backward along the cycle: treat as a fresh partial blink.
            (S::Opening, B::Closed) => (S::Closed, false),
        };

        self.state = next;
        if completed_blink {
            self.blinks += 1;
        }
    }

    fn confidence(&self) -> f32 {
        let blink_ratio = (self.blinks as f32 / self.cfg.min_blinks as f32).min(1.0);
        let activity =
            (variance(&self.openness_trace) / CONFIDENCE_VARIANCE_REF).clamp(0.0, 1.0);
        blink_ratio * (0.5 + 0.5 * activity)
    }

    fn resolve(&self) -> LivenessVerdict {
        if self.verdict == LivenessVerdict::Passed {
            return LivenessVerdict::Passed;
        }
        if self.frames_seen > 0 {
            let no_face_fraction = self.no_face_frames as f32 / self.frames_seen as f32;
            if no_face_fraction > self.cfg.max_no_face_fraction {
                return LivenessVerdict::FailedNoFace;
            }
        }
        if self.verdict == LivenessVerdict::FailedTimeout {
            return LivenessVerdict::FailedTimeout;
        }
        // End of batch within budget without meeting the requirement.
        LivenessVerdict::FailedInsufficientBlinks
    }
}

impl LivenessSession for BlinkSession {
    fn push(&mut self, obs: Option<&FaceObservation>, offset: Duration) -> LivenessVerdict {
        if self.verdict.is_terminal() {
            return self.verdict;
        }
        self.frames_seen += 1;

        if offset > self.cfg.time_budget {
            self.verdict = LivenessVerdict::FailedTimeout;
            return self.verdict;
        }

        match obs {
            None => {
                self.no_face_frames += 1;
            }
            Some(o) => {
                self.openness_trace.push(o.openness);
                self.step(bucket(o.openness, &self.cfg));
                if self.blinks >= self.cfg.min_blinks {
                    self.verdict = LivenessVerdict::Passed;
                }
            }
        }

        self.verdict
    }

    fn finalize(self: Box<Self>) -> LivenessReport {
        LivenessReport {
            verdict: self.resolve(),
            blinks: self.blinks,
            confidence: self.confidence(),
            frames_seen: self.frames_seen,
            no_face_frames: self.no_face_frames,
        }
    }
}

// --- Movement variant ---

/// Landmark-stability variant: a live subject exhibits involuntary eye
/// drift between frames, a static photo does not. Resolves only at
/// finalize — a running mean can still drop below the threshold.
pub struct MovementSession {
    cfg: LivenessConfig,
    verdict: LivenessVerdict,
    last_eyes: Option<[(f32, f32); 2]>,
    total_displacement: f32,
    pair_count: usize,
    frames_seen: usize,
    no_face_frames: usize,
}

/// Frame pairs required before the displacement mean is meaningful.
const MOVEMENT_MIN_PAIRS: usize = 2;

impl MovementSession {
    fn new(cfg: &LivenessConfig) -> Self {
        Self {
            cfg: cfg.clone(),
            verdict: LivenessVerdict::Pending,
            last_eyes: None,
            total_displacement: 0.0,
            pair_count: 0,
            frames_seen: 0,
            no_face_frames: 0,
        }
    }

    fn mean_displacement(&self) -> f32 {
        if self.pair_count == 0 {
            0.0
        } else {
            self.total_displacement / self.pair_count as f32
        }
    }

    fn resolve(&self) -> LivenessVerdict {
        if self.frames_seen > 0 {
            let no_face_fraction = self.no_face_frames as f32 / self.frames_seen as f32;
            if no_face_fraction > self.cfg.max_no_face_fraction {
                return LivenessVerdict::FailedNoFace;
            }
        }
        if self.verdict == LivenessVerdict::FailedTimeout {
            return LivenessVerdict::FailedTimeout;
        }
        if self.pair_count >= MOVEMENT_MIN_PAIRS
            && self.mean_displacement() >= self.cfg.min_eye_displacement
        {
            return LivenessVerdict::Passed;
        }
        // Insufficient observed activity — the shared "requirement unmet"
        // verdict, regardless of which activity this variant measures.
        LivenessVerdict::FailedInsufficientBlinks
    }
}

impl LivenessSession for MovementSession {
    fn push(&mut self, obs: Option<&FaceObservation>, offset: Duration) -> LivenessVerdict {
        if self.verdict.is_terminal() {
            return self.verdict;
        }
        self.frames_seen += 1;

        if offset > self.cfg.time_budget {
            self.verdict = LivenessVerdict::FailedTimeout;
            return self.verdict;
        }

        match obs {
            None => {
                self.no_face_frames += 1;
            }
            Some(o) => {
                if let Some(prev) = self.last_eyes {
                    let mut disp = 0.0;
                    for i in 0..2 {
                        let dx = o.eye_centers[i].0 - prev[i].0;
                        let dy = o.eye_centers[i].1 - prev[i].1;
                        disp += (dx * dx + dy * dy).sqrt();
                    }
                    self.total_displacement += disp / 2.0;
                    self.pair_count += 1;
                }
                self.last_eyes = Some(o.eye_centers);
            }
        }

        LivenessVerdict::Pending
    }

    fn finalize(self: Box<Self>) -> LivenessReport {
        let verdict = self.resolve();
        let confidence = (self.mean_displacement() / (2.0 * self.cfg.min_eye_displacement))
            .clamp(0.0, 1.0);
        LivenessReport {
            verdict,
            blinks: 0,
            confidence,
            frames_seen: self.frames_seen,
            no_face_frames: self.no_face_frames,
        }
    }
}

// --- Composite variant ---

/// Runs the blink and movement variants in lockstep; passes only when both
/// pass. Failure precedence: `FailedNoFace` > `FailedTimeout` > rest.
pub struct CompositeSession {
    blink: BlinkSession,
    movement: MovementSession,
}

impl CompositeSession {
    fn new(cfg: &LivenessConfig) -> Self {
        Self {
            blink: BlinkSession::new(cfg),
            movement: MovementSession::new(cfg),
        }
    }
}

impl LivenessSession for CompositeSession {
    fn push(&mut self, obs: Option<&FaceObservation>, offset: Duration) -> LivenessVerdict {
        let b = self.blink.push(obs, offset);
        let m = self.movement.push(obs, offset);

        // The movement half only resolves at finalize, so the composite
        // never passes early; surface sub-failures as they happen.
        for v in [b, m] {
            if v == LivenessVerdict::FailedNoFace {
                return v;
            }
        }
        for v in [b, m] {
            if v == LivenessVerdict::FailedTimeout {
                return v;
            }
        }
        LivenessVerdict::Pending
    }

    fn finalize(self: Box<Self>) -> LivenessReport {
        let blink = Box::new(self.blink).finalize();
        let movement = Box::new(self.movement).finalize();

        let verdict = if blink.verdict == LivenessVerdict::Passed
            && movement.verdict == LivenessVerdict::Passed
        {
            LivenessVerdict::Passed
        } else {
            let failures = [blink.verdict, movement.verdict];
            if failures.contains(&LivenessVerdict::FailedNoFace) {
                LivenessVerdict::FailedNoFace
            } else if failures.contains(&LivenessVerdict::FailedTimeout) {
                LivenessVerdict::FailedTimeout
            } else {
                LivenessVerdict::FailedInsufficientBlinks
            }
        };

        // The blink half stops counting once it passes early; the movement
        // half sees the whole burst.
        LivenessReport {
            verdict,
            blinks: blink.blinks,
            confidence: (blink.confidence + movement.confidence) / 2.0,
            frames_seen: blink.frames_seen.max(movement.frames_seen),
            no_face_frames: blink.no_face_frames.max(movement.no_face_frames),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(openness: f32) -> FaceObservation {
        FaceObservation {
            openness,
            eye_centers: [(100.0, 50.0), (140.0, 50.0)],
        }
    }

    fn obs_at(openness: f32, eyes: [(f32, f32); 2]) -> FaceObservation {
        FaceObservation {
            openness,
            eye_centers: eyes,
        }
    }

    fn cfg(mode: LivenessMode) -> LivenessConfig {
        LivenessConfig {
            mode,
            ..LivenessConfig::default()
        }
    }

    /// Feed a synthetic openness sequence, 100 ms apart, and finalize.
    fn run_blink(openness: &[f32]) -> LivenessReport {
        let mut session = new_session(&cfg(LivenessMode::Blink));
        for (i, &o) in openness.iter().enumerate() {
            session.push(Some(&obs(o)), Duration::from_millis(i as u64 * 100));
        }
        session.finalize()
    }

    #[test]
    fn test_constant_open_never_passes() {
        let report = run_blink(&[0.3; 40]);
        assert_eq!(report.verdict, LivenessVerdict::FailedInsufficientBlinks);
        assert_eq!(report.blinks, 0);
    }

    #[test]
    fn test_single_blink_counted_once() {
        // open -> closed -> open, crossing both thresholds exactly once
        let report = run_blink(&[0.30, 0.28, 0.10, 0.10, 0.30]);
        assert_eq!(report.verdict, LivenessVerdict::Passed);
        assert_eq!(report.blinks, 1);
    }

    #[test]
    fn test_two_crossings_count_two() {
        let mut config = cfg(LivenessMode::Blink);
        config.min_blinks = 2;
        let mut session = new_session(&config);
        let seq = [0.30, 0.10, 0.30, 0.30, 0.10, 0.30];
        let mut last = LivenessVerdict::Pending;
        for (i, &o) in seq.iter().enumerate() {
            last = session.push(Some(&obs(o)), Duration::from_millis(i as u64 * 100));
        }
        assert_eq!(last, LivenessVerdict::Passed);
        let report = session.finalize();
        assert_eq!(report.blinks, 2);
    }

    #[test]
    fn test_hysteresis_band_oscillation_does_not_count() {
        // Oscillation between open and the transitional band never reaches
        // Closed, so no blink registers.
        let report = run_blink(&[0.30, 0.23, 0.30, 0.23, 0.30, 0.23, 0.30]);
        assert_eq!(report.verdict, LivenessVerdict::FailedInsufficientBlinks);
        assert_eq!(report.blinks, 0);
    }

    #[test]
    fn test_gradual_blink_through_all_states() {
        // open -> transitional -> closed -> transitional -> open
        let report = run_blink(&[0.30, 0.23, 0.15, 0.23, 0.30]);
        assert_eq!(report.verdict, LivenessVerdict::Passed);
        assert_eq!(report.blinks, 1);
    }

    #[test]
    fn test_reclose_during_opening_is_fresh_partial_blink() {
        // Descend to Closed, start opening, re-close, then open fully:
        // exactly one blink (the aborted opening does not count).
        let report = run_blink(&[0.30, 0.10, 0.23, 0.10, 0.10, 0.30]);
        assert_eq!(report.blinks, 1);
    }

    #[test]
    fn test_early_exit_on_required_blinks() {
        let mut session = new_session(&cfg(LivenessMode::Blink));
        let verdicts: Vec<LivenessVerdict> = [0.30, 0.10, 0.30, 0.10, 0.30]
            .iter()
            .enumerate()
            .map(|(i, &o)| session.push(Some(&obs(o)), Duration::from_millis(i as u64 * 100)))
            .collect();
        // Passed at the third frame; subsequent frames do not disturb it.
        assert_eq!(verdicts[2], LivenessVerdict::Passed);
        assert_eq!(verdicts[4], LivenessVerdict::Passed);
        assert_eq!(session.finalize().blinks, 1);
    }

    #[test]
    fn test_timeout_before_blink() {
        let mut config = cfg(LivenessMode::Blink);
        config.time_budget = Duration::from_millis(500);
        let mut session = new_session(&config);
        session.push(Some(&obs(0.30)), Duration::from_millis(0));
        session.push(Some(&obs(0.30)), Duration::from_millis(400));
        let v = session.push(Some(&obs(0.10)), Duration::from_millis(600));
        assert_eq!(v, LivenessVerdict::FailedTimeout);
        assert_eq!(session.finalize().verdict, LivenessVerdict::FailedTimeout);
    }

    #[test]
    fn test_pass_before_budget_edge_not_timeout() {
        let mut config = cfg(LivenessMode::Blink);
        config.time_budget = Duration::from_millis(500);
        let mut session = new_session(&config);
        session.push(Some(&obs(0.30)), Duration::from_millis(0));
        session.push(Some(&obs(0.10)), Duration::from_millis(200));
        let v = session.push(Some(&obs(0.30)), Duration::from_millis(400));
        assert_eq!(v, LivenessVerdict::Passed);
        // A late frame after passing does not flip the verdict.
        let v = session.push(Some(&obs(0.30)), Duration::from_millis(900));
        assert_eq!(v, LivenessVerdict::Passed);
    }

    #[test]
    fn test_no_face_majority_fails() {
        let mut session = new_session(&cfg(LivenessMode::Blink));
        for i in 0..6 {
            session.push(None, Duration::from_millis(i * 100));
        }
        session.push(Some(&obs(0.30)), Duration::from_millis(700));
        let report = session.finalize();
        assert_eq!(report.verdict, LivenessVerdict::FailedNoFace);
        assert_eq!(report.no_face_frames, 6);
        assert_eq!(report.frames_seen, 7);
    }

    #[test]
    fn test_occasional_face_loss_tolerated() {
        // One dropped frame out of six stays under the no-face cap.
        let mut session = new_session(&cfg(LivenessMode::Blink));
        let seq = [Some(0.30), None, Some(0.30), Some(0.10), Some(0.30), Some(0.30)];
        let mut last = LivenessVerdict::Pending;
        for (i, o) in seq.iter().enumerate() {
            let o = o.map(obs);
            last = session.push(o.as_ref(), Duration::from_millis(i as u64 * 100));
        }
        assert_eq!(last, LivenessVerdict::Passed);
    }

    #[test]
    fn test_confidence_bounded() {
        let passed = run_blink(&[0.30, 0.10, 0.30]);
        assert!(passed.confidence > 0.0 && passed.confidence <= 1.0);

        let failed = run_blink(&[0.30; 10]);
        assert!((0.0..=1.0).contains(&failed.confidence));
        // Zero blinks -> zero confidence.
        assert_eq!(failed.confidence, 0.0);
    }

    #[test]
    fn test_min_blinks_clamped_to_one() {
        let mut config = cfg(LivenessMode::Blink);
        config.min_blinks = 0;
        let mut session = new_session(&config);
        session.push(Some(&obs(0.30)), Duration::ZERO);
        // No blink yet: a zero requirement must not auto-pass.
        let v = session.push(Some(&obs(0.30)), Duration::from_millis(100));
        assert_eq!(v, LivenessVerdict::Pending);
    }

    #[test]
    fn test_movement_static_photo_fails() {
        let mut session = new_session(&cfg(LivenessMode::Movement));
        let eyes = [(100.0, 50.0), (140.0, 50.0)];
        for i in 0..5 {
            session.push(
                Some(&obs_at(0.3, eyes)),
                Duration::from_millis(i * 100),
            );
        }
        let report = session.finalize();
        assert_eq!(report.verdict, LivenessVerdict::FailedInsufficientBlinks);
        assert_eq!(report.blinks, 0);
    }

    #[test]
    fn test_movement_natural_drift_passes() {
        let mut session = new_session(&cfg(LivenessMode::Movement));
        let frames = [
            [(100.0, 50.0), (140.0, 50.0)],
            [(101.2, 50.8), (141.0, 50.6)],
            [(100.3, 49.6), (140.4, 49.9)],
            [(101.5, 50.4), (141.2, 50.2)],
        ];
        for (i, eyes) in frames.iter().enumerate() {
            session.push(
                Some(&obs_at(0.3, *eyes)),
                Duration::from_millis(i as u64 * 100),
            );
        }
        let report = session.finalize();
        assert_eq!(report.verdict, LivenessVerdict::Passed);
    }

    #[test]
    fn test_movement_single_observation_insufficient() {
        let mut session = new_session(&cfg(LivenessMode::Movement));
        session.push(Some(&obs(0.3)), Duration::ZERO);
        let report = session.finalize();
        assert_eq!(report.verdict, LivenessVerdict::FailedInsufficientBlinks);
    }

    #[test]
    fn test_composite_requires_both() {
        // Blinks present but eyes pixel-identical across frames: blink half
        // passes, movement half does not, so the composite fails.
        let mut session = new_session(&cfg(LivenessMode::Composite));
        let eyes = [(100.0, 50.0), (140.0, 50.0)];
        for (i, &o) in [0.30, 0.10, 0.30, 0.30].iter().enumerate() {
            session.push(
                Some(&obs_at(o, eyes)),
                Duration::from_millis(i as u64 * 100),
            );
        }
        let report = session.finalize();
        assert_eq!(report.verdict, LivenessVerdict::FailedInsufficientBlinks);
        assert_eq!(report.blinks, 1);
    }

    #[test]
    fn test_composite_passes_with_blink_and_drift() {
        let mut session = new_session(&cfg(LivenessMode::Composite));
        let seq = [
            (0.30, [(100.0, 50.0), (140.0, 50.0)]),
            (0.10, [(101.2, 50.9), (141.1, 50.7)]),
            (0.30, [(100.2, 49.8), (140.3, 49.9)]),
            (0.30, [(101.4, 50.5), (141.3, 50.4)]),
        ];
        for (i, (o, eyes)) in seq.iter().enumerate() {
            session.push(
                Some(&obs_at(*o, *eyes)),
                Duration::from_millis(i as u64 * 100),
            );
        }
        let report = session.finalize();
        assert_eq!(report.verdict, LivenessVerdict::Passed);
        assert_eq!(report.blinks, 1);
    }
}

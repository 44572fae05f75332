//! Shared fixtures for session integration tests.

use std::sync::{Arc, Mutex};

use liveness_capture::{
    CameraConstraints, CaptureResourceManager, RecorderEvent, SyntheticCameraBackend,
    SyntheticProbe, acquire_camera,
};
use liveness_core::{
    InstructionStep, InstructionTimeline, SessionConfig, SessionStatus, SubjectId,
    VerificationVerdict,
};
use liveness_session::{
    AttemptId, RecorderRoute, SessionController, SessionEffect, SessionError, SessionInput,
    StartRequest, SubmissionRequest,
};
use liveness_verify::{SubmissionOutcome, VerdictSource};

/// Queues recorder events until the test pumps them into the controller.
#[derive(Default)]
pub struct QueueRoute {
    events: Mutex<Vec<(AttemptId, RecorderEvent)>>,
}

impl QueueRoute {
    fn drain(&self) -> Vec<(AttemptId, RecorderEvent)> {
        std::mem::take(&mut *self.events.lock().expect("route lock should work"))
    }
}

impl RecorderRoute for QueueRoute {
    fn deliver(&self, attempt: AttemptId, event: RecorderEvent) {
        self.events
            .lock()
            .expect("route lock should work")
            .push((attempt, event));
    }
}

/// Controller plus a manual clock and the backend's counters.
pub struct Harness {
    pub controller: SessionController,
    pub backend: Arc<SyntheticCameraBackend>,
    pub probe: Arc<SyntheticProbe>,
    pub now_ms: u64,
    route: Arc<QueueRoute>,
}

#[allow(dead_code)]
impl Harness {
    pub fn new(
        backend: SyntheticCameraBackend,
        config: SessionConfig,
        timeline: InstructionTimeline,
    ) -> Self {
        let probe = backend.probe();
        let backend = Arc::new(backend);
        let route = Arc::new(QueueRoute::default());
        let capture =
            CaptureResourceManager::new(backend.clone(), CameraConstraints::default());
        let controller = SessionController::new(config, timeline, capture, route.clone())
            .expect("controller fixture should build");
        Self {
            controller,
            backend,
            probe,
            now_ms: 0,
            route,
        }
    }

    pub fn standard(backend: SyntheticCameraBackend) -> Self {
        Self::new(
            backend,
            SessionConfig::default(),
            InstructionTimeline::standard(),
        )
    }

    /// Applies one input, then drains any recorder events it triggered.
    pub fn send(&mut self, input: SessionInput) -> Result<Vec<SessionEffect>, SessionError> {
        let mut effects = self.controller.handle(input, self.now_ms)?;
        effects.extend(self.pump());
        Ok(effects)
    }

    pub fn pump(&mut self) -> Vec<SessionEffect> {
        let mut effects = Vec::new();
        loop {
            let queued = self.route.drain();
            if queued.is_empty() {
                return effects;
            }
            for (attempt, event) in queued {
                effects.extend(
                    self.controller
                        .handle(SessionInput::Recorder { attempt, event }, self.now_ms)
                        .expect("recorder events are never rejected"),
                );
            }
        }
    }

    /// Starts an attempt and resolves the camera request synchronously.
    pub fn start(&mut self) -> Vec<SessionEffect> {
        let effects = self
            .send(SessionInput::Start(start_request(true)))
            .expect("start should be accepted");
        let mut resolved = Vec::new();
        for effect in effects {
            match effect {
                SessionEffect::AcquireCamera {
                    attempt,
                    constraints,
                } => {
                    let result = acquire_camera(self.backend.as_ref(), &constraints);
                    resolved.extend(
                        self.send(SessionInput::CameraResolved { attempt, result })
                            .expect("camera results are never rejected"),
                    );
                }
                other => resolved.push(other),
            }
        }
        resolved
    }

    /// Sends one tick at `now_ms`.
    pub fn tick_at(&mut self, now_ms: u64) -> Vec<SessionEffect> {
        self.now_ms = now_ms;
        let attempt = self.controller.attempt();
        self.send(SessionInput::Tick { attempt })
            .expect("ticks are never rejected")
    }

    /// Ticks at the configured interval up to `until_ms` while recording.
    pub fn advance(&mut self, until_ms: u64) -> Vec<SessionEffect> {
        let interval = self.controller.config().tick_ms;
        let mut effects = Vec::new();
        while self.now_ms + interval <= until_ms
            && self.controller.status() == SessionStatus::Recording
        {
            let next = self.now_ms + interval;
            effects.extend(self.tick_at(next));
        }
        effects
    }

    pub fn resolve(&mut self, outcome: SubmissionOutcome) -> Vec<SessionEffect> {
        let attempt = self.controller.attempt();
        self.send(SessionInput::SubmissionResolved { attempt, outcome })
            .expect("verdicts are never rejected")
    }
}

pub fn subject() -> SubjectId {
    SubjectId::new("alice").expect("subject fixture should be valid")
}

pub fn start_request(has_profile_picture: bool) -> StartRequest {
    StartRequest {
        subject: subject(),
        has_profile_picture,
    }
}

/// Two one-second steps.
#[allow(dead_code)]
pub fn two_second_timeline() -> InstructionTimeline {
    InstructionTimeline::new(vec![
        InstructionStep::new("Look straight", "Face the camera", 1_000)
            .expect("step fixture should be valid"),
        InstructionStep::new("Blink", "Blink twice", 1_000).expect("step fixture should be valid"),
    ])
    .expect("timeline fixture should be valid")
}

#[allow(dead_code)]
pub fn submissions(effects: &[SessionEffect]) -> Vec<&SubmissionRequest> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            SessionEffect::Submit(request) => Some(request),
            _ => None,
        })
        .collect()
}

#[allow(dead_code)]
pub fn verifier_outcome(success: bool, message: &str, confidence: f64) -> SubmissionOutcome {
    SubmissionOutcome {
        verdict: VerificationVerdict {
            success,
            message: message.to_string(),
            confidence: Some(confidence),
            details: None,
        },
        source: VerdictSource::Verifier,
    }
}

#[allow(dead_code)]
pub fn fault_outcome(message: &str) -> SubmissionOutcome {
    SubmissionOutcome {
        verdict: VerificationVerdict::synthesized_failure(message),
        source: VerdictSource::Synthesized,
    }
}

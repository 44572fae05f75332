//! Owner-thread runtime for one session controller.
//!
//! Every input reaches the controller through one `mpsc` queue consumed by a
//! single owner thread, so transitions never interleave. Camera acquisition,
//! the timeline ticker, and verifier submission run on worker threads that
//! post their results back into the same queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use liveness_capture::{
    CameraBackend, CameraConstraints, CaptureError, CaptureResourceManager, RecorderEvent,
    acquire_camera,
};
use liveness_core::{InstructionTimeline, SessionConfig, VerificationVerdict};
use liveness_profile::{IdentityStore, ProfileClient, resolve_subject};
use liveness_session::{
    AttemptId, RecorderRoute, SessionController, SessionEffect, SessionError, SessionInput,
    SessionSnapshot, StartRequest, SubmissionRequest,
};
use liveness_verify::{SubmissionOutcome, VerdictSource, VerificationClient};
use tracing::{error, info, warn};

use crate::{AppError, SessionView, project_session};

/// Collaborators and settings for [`SessionRuntime::spawn`].
pub struct RuntimeParts {
    /// Session timing and artifact limits.
    pub config: SessionConfig,
    /// Instruction script.
    pub timeline: InstructionTimeline,
    /// Camera backend.
    pub backend: Arc<dyn CameraBackend>,
    /// Stream constraints.
    pub constraints: CameraConstraints,
    /// Signed-in subject source.
    pub identity: Arc<dyn IdentityStore>,
    /// Profile gate client.
    pub profile: ProfileClient,
    /// Verifier client.
    pub verifier: VerificationClient,
}

enum RuntimeMessage {
    Input(SessionInput),
    Command {
        input: SessionInput,
        reply: Sender<Result<(), SessionError>>,
    },
    Shutdown,
}

struct ChannelRoute {
    tx: Sender<RuntimeMessage>,
}

impl RecorderRoute for ChannelRoute {
    fn deliver(&self, attempt: AttemptId, event: RecorderEvent) {
        let _ = self
            .tx
            .send(RuntimeMessage::Input(SessionInput::Recorder { attempt, event }));
    }
}

struct SharedSnapshot {
    state: Mutex<SessionSnapshot>,
    changed: Condvar,
}

impl SharedSnapshot {
    fn lock(&self) -> MutexGuard<'_, SessionSnapshot> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, snapshot: SessionSnapshot) {
        *self.lock() = snapshot;
        self.changed.notify_all();
    }
}

/// Handle to a running session owner thread.
///
/// Dropping the handle shuts the owner down and releases the camera.
pub struct SessionRuntime {
    tx: Sender<RuntimeMessage>,
    shared: Arc<SharedSnapshot>,
    identity: Arc<dyn IdentityStore>,
    profile: ProfileClient,
    timeline: InstructionTimeline,
    owner: Option<JoinHandle<()>>,
}

impl SessionRuntime {
    /// Builds the controller and starts its owner thread.
    ///
    /// # Errors
    /// Returns [`AppError::Session`] for invalid configuration or
    /// [`AppError::Runtime`] when the thread cannot be spawned.
    pub fn spawn(parts: RuntimeParts) -> Result<Self, AppError> {
        let (tx, rx) = mpsc::channel();
        let capture = CaptureResourceManager::new(Arc::clone(&parts.backend), parts.constraints);
        let route = Arc::new(ChannelRoute { tx: tx.clone() });
        let controller =
            SessionController::new(parts.config, parts.timeline.clone(), capture, route)?;

        let shared = Arc::new(SharedSnapshot {
            state: Mutex::new(controller.snapshot()),
            changed: Condvar::new(),
        });
        let executor = EffectExecutor {
            tx: tx.clone(),
            backend: parts.backend,
            verifier: parts.verifier,
            ticker: None,
        };

        let owner_shared = Arc::clone(&shared);
        let owner = std::thread::Builder::new()
            .name("liveness-session-owner".to_string())
            .spawn(move || run_owner(controller, executor, rx, owner_shared))
            .map_err(|error| {
                AppError::Runtime(format!("failed to spawn session owner thread: {error}"))
            })?;
        info!(stage = "runtime", action = "spawned");

        Ok(Self {
            tx,
            shared,
            identity: parts.identity,
            profile: parts.profile,
            timeline: parts.timeline,
            owner: Some(owner),
        })
    }

    /// Resolves the subject, checks the profile gate, and starts a session.
    ///
    /// # Errors
    /// Returns [`AppError::Profile`] when nobody is signed in or the profile
    /// store cannot answer, and [`AppError::Session`] when the controller
    /// rejects the start.
    pub fn start(&self) -> Result<(), AppError> {
        let subject = resolve_subject(self.identity.as_ref())?;
        let has_profile_picture = self.profile.has_profile_picture(&subject)?;
        self.command(SessionInput::Start(StartRequest {
            subject,
            has_profile_picture,
        }))
    }

    /// Ends recording early.
    ///
    /// # Errors
    /// Returns [`AppError::Session`] when no recording is in progress.
    pub fn stop(&self) -> Result<(), AppError> {
        self.command(SessionInput::Stop)
    }

    /// Abandons the current attempt.
    ///
    /// # Errors
    /// Returns [`AppError::Session`] while a submission is in flight.
    pub fn cancel(&self) -> Result<(), AppError> {
        self.command(SessionInput::Cancel)
    }

    /// Clears a terminal state.
    ///
    /// # Errors
    /// Returns [`AppError::Session`] while a session is active.
    pub fn reset(&self) -> Result<(), AppError> {
        self.command(SessionInput::Reset)
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.lock().clone()
    }

    /// Latest snapshot projected for display.
    pub fn view(&self) -> SessionView {
        project_session(&self.snapshot(), &self.timeline)
    }

    /// Blocks until `predicate` holds for a published snapshot or `timeout`
    /// elapses.
    pub fn wait_until<F>(&self, predicate: F, timeout: Duration) -> Option<SessionSnapshot>
    where
        F: Fn(&SessionSnapshot) -> bool,
    {
        let guard = self.shared.lock();
        let (guard, _) = self
            .shared
            .changed
            .wait_timeout_while(guard, timeout, |snapshot| !predicate(snapshot))
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        predicate(&*guard).then(|| guard.clone())
    }

    /// Stops the owner thread, releasing the camera.
    ///
    /// # Errors
    /// Returns [`AppError::Runtime`] when the owner thread panicked.
    pub fn shutdown(mut self) -> Result<(), AppError> {
        self.stop_owner()
    }

    fn command(&self, input: SessionInput) -> Result<(), AppError> {
        let (reply, response) = mpsc::channel();
        self.tx
            .send(RuntimeMessage::Command { input, reply })
            .map_err(|_| owner_gone())?;
        response.recv().map_err(|_| owner_gone())??;
        Ok(())
    }

    fn stop_owner(&mut self) -> Result<(), AppError> {
        let Some(owner) = self.owner.take() else {
            return Ok(());
        };
        let _ = self.tx.send(RuntimeMessage::Shutdown);
        owner
            .join()
            .map_err(|_| AppError::Runtime("session owner thread panicked".to_string()))
    }
}

impl Drop for SessionRuntime {
    fn drop(&mut self) {
        if let Err(error) = self.stop_owner() {
            error!(stage = "runtime", action = "shutdown", error = %error);
        }
    }
}

fn owner_gone() -> AppError {
    AppError::Runtime("session owner thread is gone".to_string())
}

fn run_owner(
    mut controller: SessionController,
    mut executor: EffectExecutor,
    rx: Receiver<RuntimeMessage>,
    shared: Arc<SharedSnapshot>,
) {
    let clock = Instant::now();
    while let Ok(message) = rx.recv() {
        let now_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
        let reply = match message {
            RuntimeMessage::Input(input) => {
                match controller.handle(input, now_ms) {
                    Ok(effects) => executor.run(effects),
                    Err(error) => warn!(stage = "runtime", action = "input_rejected", error = %error),
                }
                None
            }
            RuntimeMessage::Command { input, reply } => {
                let result = controller
                    .handle(input, now_ms)
                    .map(|effects| executor.run(effects));
                Some((reply, result))
            }
            RuntimeMessage::Shutdown => {
                let effects = controller.shutdown();
                executor.run(effects);
                shared.publish(controller.snapshot());
                break;
            }
        };
        // Publish before replying so callers observe their own command.
        shared.publish(controller.snapshot());
        if let Some((reply, result)) = reply {
            let _ = reply.send(result);
        }
    }
    info!(stage = "runtime", action = "owner_exit");
}

struct EffectExecutor {
    tx: Sender<RuntimeMessage>,
    backend: Arc<dyn CameraBackend>,
    verifier: VerificationClient,
    ticker: Option<Arc<AtomicBool>>,
}

impl EffectExecutor {
    fn run(&mut self, effects: Vec<SessionEffect>) {
        for effect in effects {
            match effect {
                SessionEffect::AcquireCamera {
                    attempt,
                    constraints,
                } => self.acquire(attempt, constraints),
                SessionEffect::StartTicker {
                    attempt,
                    interval_ms,
                } => self.start_ticker(attempt, interval_ms),
                SessionEffect::StopTicker => self.stop_ticker(),
                SessionEffect::Submit(request) => self.submit(request),
            }
        }
    }

    fn post(&self, input: SessionInput) {
        let _ = self.tx.send(RuntimeMessage::Input(input));
    }

    fn acquire(&self, attempt: AttemptId, constraints: CameraConstraints) {
        let backend = Arc::clone(&self.backend);
        let tx = self.tx.clone();
        let spawned = std::thread::Builder::new()
            .name("liveness-camera".to_string())
            .spawn(move || {
                let result = acquire_camera(backend.as_ref(), &constraints);
                // A handle that cannot be delivered is released on drop.
                let _ = tx.send(RuntimeMessage::Input(SessionInput::CameraResolved {
                    attempt,
                    result,
                }));
            });
        if let Err(error) = spawned {
            error!(stage = "runtime", action = "camera_worker", error = %error);
            self.post(SessionInput::CameraResolved {
                attempt,
                result: Err(CaptureError::DeviceUnavailable(format!(
                    "camera worker could not start: {error}"
                ))),
            });
        }
    }

    fn start_ticker(&mut self, attempt: AttemptId, interval_ms: u64) {
        self.stop_ticker();
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let tx = self.tx.clone();
        let interval = Duration::from_millis(interval_ms);
        let spawned = std::thread::Builder::new()
            .name("liveness-ticker".to_string())
            .spawn(move || {
                loop {
                    std::thread::sleep(interval);
                    if flag.load(Ordering::SeqCst) {
                        break;
                    }
                    if tx
                        .send(RuntimeMessage::Input(SessionInput::Tick { attempt }))
                        .is_err()
                    {
                        break;
                    }
                }
            });
        match spawned {
            Ok(_) => self.ticker = Some(stop),
            Err(error) => {
                // Without ticks the timeline cannot advance; end recording now.
                error!(stage = "runtime", action = "ticker", error = %error);
                self.post(SessionInput::Stop);
            }
        }
    }

    fn stop_ticker(&mut self) {
        if let Some(stop) = self.ticker.take() {
            stop.store(true, Ordering::SeqCst);
        }
    }

    fn submit(&self, request: SubmissionRequest) {
        let attempt = request.attempt;
        let client = self.verifier.clone();
        let tx = self.tx.clone();
        let spawned = std::thread::Builder::new()
            .name("liveness-submit".to_string())
            .spawn(move || {
                let outcome = client.submit(&request.upload, &request.subject);
                let _ = tx.send(RuntimeMessage::Input(SessionInput::SubmissionResolved {
                    attempt,
                    outcome,
                }));
            });
        if let Err(error) = spawned {
            error!(stage = "runtime", action = "submit_worker", error = %error);
            self.post(SessionInput::SubmissionResolved {
                attempt,
                outcome: SubmissionOutcome {
                    verdict: VerificationVerdict::synthesized_failure(format!(
                        "Verification could not be started: {error}"
                    )),
                    source: VerdictSource::Synthesized,
                },
            });
        }
    }
}

impl Drop for EffectExecutor {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}

#![warn(missing_docs)]
//! # liveness-app
//!
//! ## Purpose
//! Wires identity, profile gate, capture, session control, and verification
//! into a runnable liveness client.
//!
//! ## Responsibilities
//! - Load endpoint and timing configuration from the environment.
//! - Initialise structured logging once per process.
//! - Drive a [`liveness_session::SessionController`] from one owner thread
//!   ([`runtime::SessionRuntime`]).
//! - Project session snapshots into a flat view for the embedding UI.
//!
//! ## Data flow
//! Identity store -> profile gate -> start -> camera worker -> ticker and
//! recorder events -> artifact -> submission worker -> verdict -> view.
//!
//! ## Ownership and lifetimes
//! The runtime's owner thread holds the controller and therefore the camera.
//! Callers only see cloned [`liveness_session::SessionSnapshot`] values.
//!
//! ## Error model
//! Subsystem failures are wrapped in [`AppError`]. Capture and submission
//! failures never surface here; they end the session in `Failed`.
//!
//! ## Security and privacy notes
//! - Endpoints must be HTTPS except on loopback hosts.
//! - Artifacts are logged by digest and length only.

pub mod runtime;

use std::time::Duration;

use liveness_core::{
    CoreError, DEFAULT_MIN_ARTIFACT_BYTES, DEFAULT_SAFETY_CUTOFF_MS, DEFAULT_TICK_MS,
    InstructionTimeline, SessionConfig, SessionStatus, service_base_url,
};
use liveness_profile::ProfileError;
use liveness_session::{SessionError, SessionSnapshot};
use liveness_verify::VerifyError;
use thiserror::Error;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use url::Url;

/// Build-time application version loaded from root `VERSION` file.
pub const APP_VERSION: &str = env!("LIVENESS_VERSION");

/// Verifier base URL used when `LIVENESS_VERIFIER_URL` is unset.
pub const DEFAULT_VERIFIER_URL: &str = "http://localhost:8080/api";

/// HTTP timeout used when `LIVENESS_HTTP_TIMEOUT_SECS` is unset.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

/// Returns the app version sourced from root `VERSION`.
pub fn app_version() -> &'static str {
    APP_VERSION
}

/// Installs the global `tracing` subscriber.
///
/// Reads `RUST_LOG`, defaulting to `info`. Returns `false` when a subscriber
/// was already installed.
pub fn init_tracing() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok()))
        .try_init()
        .is_ok()
}

fn log_filter(directives: Option<String>) -> EnvFilter {
    directives
        .filter(|raw| !raw.trim().is_empty())
        .and_then(|raw| EnvFilter::try_new(raw).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Process configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Verification service base URL.
    pub verifier_url: Url,
    /// Profile reference store base URL.
    pub profile_url: Url,
    /// Session timing and artifact limits.
    pub session: SessionConfig,
    /// Per-request HTTP timeout.
    pub http_timeout: Duration,
}

impl AppConfig {
    /// Reads configuration from process environment variables.
    ///
    /// # Errors
    /// See [`AppConfig::from_lookup`].
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`.
    ///
    /// Unparseable numbers fall back to their defaults with a warning.
    ///
    /// # Errors
    /// Returns [`AppError::Core`] for an endpoint that violates the transport
    /// policy or for an invalid session configuration.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let verifier_raw =
            lookup("LIVENESS_VERIFIER_URL").unwrap_or_else(|| DEFAULT_VERIFIER_URL.to_string());
        let profile_raw = lookup("LIVENESS_PROFILE_URL").unwrap_or_else(|| verifier_raw.clone());
        let verifier_url = service_base_url(&verifier_raw)?;
        let profile_url = service_base_url(&profile_raw)?;

        let defaults = SessionConfig::default();
        let session = SessionConfig::new(
            parse_or("LIVENESS_TICK_MS", lookup("LIVENESS_TICK_MS"), DEFAULT_TICK_MS),
            parse_or(
                "LIVENESS_SAFETY_CUTOFF_MS",
                lookup("LIVENESS_SAFETY_CUTOFF_MS"),
                DEFAULT_SAFETY_CUTOFF_MS,
            ),
            parse_or(
                "LIVENESS_MIN_ARTIFACT_BYTES",
                lookup("LIVENESS_MIN_ARTIFACT_BYTES"),
                DEFAULT_MIN_ARTIFACT_BYTES,
            ),
            defaults.max_artifact_bytes,
        )?;
        let timeout_secs = parse_or(
            "LIVENESS_HTTP_TIMEOUT_SECS",
            lookup("LIVENESS_HTTP_TIMEOUT_SECS"),
            DEFAULT_HTTP_TIMEOUT_SECS,
        );

        Ok(Self {
            verifier_url,
            profile_url,
            session,
            http_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> T
where
    T: std::str::FromStr + Copy + std::fmt::Display,
{
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => value,
        Err(_) => {
            warn!(
                stage = "config",
                action = "fallback",
                key,
                value = %raw,
                default = %default,
                "unparseable value, using default"
            );
            default
        }
    }
}

/// Flat, display-ready projection of a session snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    /// Short status label.
    pub status_label: String,
    /// Current instruction title while recording.
    pub instruction_title: Option<String>,
    /// Current instruction description while recording.
    pub instruction_description: Option<String>,
    /// `"Step n of m"` while recording.
    pub step_label: Option<String>,
    /// Timeline progress, 0 to 100.
    pub progress_percent: u8,
    /// Result or failure message on terminal states.
    pub message: Option<String>,
    /// Whether a start command would be accepted (profile gate aside).
    pub can_start: bool,
    /// Whether a stop command would end recording.
    pub can_stop: bool,
    /// Whether a cancel command would be accepted.
    pub can_cancel: bool,
    /// Whether a reset command would be accepted.
    pub can_reset: bool,
}

/// Projects `snapshot` against the script it is running.
pub fn project_session(snapshot: &SessionSnapshot, timeline: &InstructionTimeline) -> SessionView {
    let step = snapshot
        .current_step_index
        .and_then(|index| timeline.step(index).map(|step| (index, step)));
    let progress_percent = (snapshot.progress_fraction.clamp(0.0, 1.0) * 100.0).round() as u8;

    SessionView {
        status_label: status_label(snapshot.status).to_string(),
        instruction_title: step.map(|(_, step)| step.title.clone()),
        instruction_description: step.map(|(_, step)| step.description.clone()),
        step_label: step.map(|(index, _)| format!("Step {} of {}", index + 1, timeline.len())),
        progress_percent,
        message: snapshot.result_message.clone(),
        can_start: snapshot.status == SessionStatus::Idle,
        can_stop: snapshot.status == SessionStatus::Recording,
        can_cancel: snapshot.status.is_cancellable(),
        can_reset: snapshot.status.is_terminal(),
    }
}

/// Human-readable label for `status`.
pub fn status_label(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Idle => "Ready",
        SessionStatus::AwaitingPermission => "Waiting for camera",
        SessionStatus::Recording => "Recording",
        SessionStatus::Stopping => "Finishing recording",
        SessionStatus::Submitting => "Verifying",
        SessionStatus::Succeeded => "Verified",
        SessionStatus::Failed => "Verification failed",
    }
}

/// App integration error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration or endpoint policy error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),
    /// Identity or profile store error.
    #[error("profile error: {0}")]
    Profile(#[from] ProfileError),
    /// Verifier client construction error.
    #[error("verify error: {0}")]
    Verify(#[from] VerifyError),
    /// Command rejected by the session controller.
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    /// Owner thread is gone or could not be spawned.
    #[error("runtime error: {0}")]
    Runtime(String),
}

#[cfg(test)]
mod tests {
    //! Unit tests for configuration parsing.

    use super::*;

    #[test]
    fn parse_or_falls_back_on_garbage() {
        assert_eq!(parse_or("K", Some("250".to_string()), 100_u64), 250);
        assert_eq!(parse_or("K", Some(" 42 ".to_string()), 100_u64), 42);
        assert_eq!(parse_or("K", Some("fast".to_string()), 100_u64), 100);
        assert_eq!(parse_or("K", None, 7_usize), 7);
    }

    #[test]
    fn log_filter_honours_rust_log_level() {
        use tracing_subscriber::filter::LevelFilter;

        assert_eq!(
            log_filter(Some("debug".to_string())).max_level_hint(),
            Some(LevelFilter::DEBUG)
        );
        assert_eq!(
            log_filter(Some("warn".to_string())).max_level_hint(),
            Some(LevelFilter::WARN)
        );
        assert_eq!(log_filter(None).max_level_hint(), Some(LevelFilter::INFO));
        assert_eq!(
            log_filter(Some("  ".to_string())).max_level_hint(),
            Some(LevelFilter::INFO)
        );
    }

    #[test]
    fn status_labels_are_distinct() {
        let labels = [
            SessionStatus::Idle,
            SessionStatus::AwaitingPermission,
            SessionStatus::Recording,
            SessionStatus::Stopping,
            SessionStatus::Submitting,
            SessionStatus::Succeeded,
            SessionStatus::Failed,
        ]
        .map(status_label);
        for (index, label) in labels.iter().enumerate() {
            assert!(!labels[index + 1..].contains(label));
        }
    }
}

#![warn(missing_docs)]
//! # liveness-app binary
//!
//! Prints version and configuration. With `--synthetic`, runs one session
//! against the synthetic camera and the configured services.

use std::sync::Arc;
use std::time::Duration;

use liveness_app::runtime::{RuntimeParts, SessionRuntime};
use liveness_app::{AppConfig, AppError, app_version, init_tracing};
use liveness_capture::{CameraConstraints, SyntheticCameraBackend};
use liveness_core::{InstructionTimeline, SubjectId};
use liveness_profile::{HttpProfileTransport, InMemoryIdentityStore, ProfileClient};
use liveness_verify::{HttpVerifierTransport, VerificationClient};

/// CLI entry point.
fn main() {
    init_tracing();
    println!("liveness-app {}", app_version());

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("invalid configuration: {error}");
            std::process::exit(1);
        }
    };
    println!("verifier_url={} (LIVENESS_VERIFIER_URL)", config.verifier_url);
    println!("profile_url={} (LIVENESS_PROFILE_URL)", config.profile_url);
    println!(
        "tick_ms={} safety_cutoff_ms={} min_artifact_bytes={}",
        config.session.tick_ms, config.session.safety_cutoff_ms, config.session.min_artifact_bytes
    );
    if config.session.truncates(&InstructionTimeline::standard()) {
        println!(
            "warning: safety cutoff {}ms ends recording before the {}ms script completes",
            config.session.safety_cutoff_ms,
            InstructionTimeline::standard().total_duration_ms()
        );
    }

    if std::env::args().any(|arg| arg == "--synthetic") {
        if let Err(error) = run_synthetic(&config) {
            eprintln!("synthetic session failed: {error}");
            std::process::exit(1);
        }
    }
}

fn run_synthetic(config: &AppConfig) -> Result<(), AppError> {
    let subject = std::env::var("LIVENESS_SUBJECT").unwrap_or_else(|_| "demo".to_string());
    let identity = Arc::new(InMemoryIdentityStore::new());
    identity.sign_in(SubjectId::new(subject)?);

    let profile = ProfileClient::new(
        config.profile_url.as_str(),
        Arc::new(HttpProfileTransport::new(config.http_timeout)?),
    )?;
    let verifier = VerificationClient::new(
        config.verifier_url.as_str(),
        Arc::new(HttpVerifierTransport::new(config.http_timeout)?),
    )?;

    let runtime = SessionRuntime::spawn(RuntimeParts {
        config: config.session,
        timeline: InstructionTimeline::standard(),
        backend: Arc::new(SyntheticCameraBackend::new()),
        constraints: CameraConstraints::default(),
        identity,
        profile,
        verifier,
    })?;
    runtime.start()?;

    let deadline = Duration::from_millis(config.session.safety_cutoff_ms)
        + config.http_timeout
        + Duration::from_secs(5);
    if runtime
        .wait_until(|snapshot| snapshot.status.is_terminal(), deadline)
        .is_none()
    {
        eprintln!("session did not finish within {}s", deadline.as_secs());
    }

    let view = runtime.view();
    println!(
        "status={} message={}",
        view.status_label,
        view.message.unwrap_or_default()
    );
    runtime.shutdown()
}

//! End-to-end session over HTTP against mock profile and verifier services.

use std::sync::Arc;
use std::time::Duration;

use liveness_app::runtime::{RuntimeParts, SessionRuntime};
use liveness_app::{AppConfig, AppError};
use liveness_capture::{CameraConstraints, SyntheticCameraBackend};
use liveness_core::{FailureKind, InstructionStep, InstructionTimeline, SessionStatus, SubjectId};
use liveness_profile::{HttpProfileTransport, InMemoryIdentityStore, ProfileClient, ProfileError};
use liveness_verify::{HttpVerifierTransport, VerificationClient};
use mockito::Matcher;

fn runtime_for(server_url: &str) -> (SessionRuntime, Arc<liveness_capture::SyntheticProbe>) {
    let base = format!("{server_url}/api");
    let config = AppConfig::from_lookup(|key| match key {
        "LIVENESS_VERIFIER_URL" => Some(base.clone()),
        "LIVENESS_TICK_MS" => Some("10".to_string()),
        "LIVENESS_HTTP_TIMEOUT_SECS" => Some("5".to_string()),
        _ => None,
    })
    .expect("config should be valid");

    let identity = Arc::new(InMemoryIdentityStore::new());
    identity.sign_in(SubjectId::new("alice").expect("subject should be valid"));
    let profile = ProfileClient::new(
        config.profile_url.as_str(),
        Arc::new(HttpProfileTransport::new(config.http_timeout).expect("transport should build")),
    )
    .expect("profile client should build");
    let verifier = VerificationClient::new(
        config.verifier_url.as_str(),
        Arc::new(HttpVerifierTransport::new(config.http_timeout).expect("transport should build")),
    )
    .expect("verification client should build");

    let backend = SyntheticCameraBackend::new();
    let probe = backend.probe();
    let runtime = SessionRuntime::spawn(RuntimeParts {
        config: config.session,
        timeline: InstructionTimeline::new(vec![
            InstructionStep::new("Look straight", "Face the camera", 50)
                .expect("step should be valid"),
        ])
        .expect("timeline should be valid"),
        backend: Arc::new(backend),
        constraints: CameraConstraints::default(),
        identity,
        profile,
        verifier,
    })
    .expect("runtime should spawn");
    (runtime, probe)
}

#[test]
fn runtime_http_tests_verifies_against_services() {
    let mut server = mockito::Server::new();
    let status = server
        .mock("GET", "/api/verification-status/alice")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"username":"alice","hasProfilePicture":true,"verificationRequired":true}"#)
        .expect(1)
        .create();
    let verify = server
        .mock("POST", "/api/verify/alice")
        .match_header(
            "content-type",
            Matcher::Regex("^multipart/form-data".to_string()),
        )
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"success":true,"message":"Identity verified","confidence":0.9}"#)
        .expect(1)
        .create();

    let (runtime, probe) = runtime_for(&server.url());
    runtime.start().expect("start should be accepted");
    let snapshot = runtime
        .wait_until(
            |snapshot| snapshot.status.is_terminal(),
            Duration::from_secs(10),
        )
        .expect("session should finish");

    status.assert();
    verify.assert();
    assert_eq!(snapshot.status, SessionStatus::Succeeded);
    assert_eq!(snapshot.result_message.as_deref(), Some("Identity verified"));
    assert_eq!(probe.live(), 0);
}

#[test]
fn runtime_http_tests_server_error_becomes_transport_fault() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/api/verification-status/alice")
        .with_status(200)
        .with_body(r#"{"hasProfilePicture":true}"#)
        .create();
    server
        .mock("POST", "/api/verify/alice")
        .with_status(502)
        .with_body("bad gateway")
        .create();

    let (runtime, _probe) = runtime_for(&server.url());
    runtime.start().expect("start should be accepted");
    let snapshot = runtime
        .wait_until(
            |snapshot| snapshot.status.is_terminal(),
            Duration::from_secs(10),
        )
        .expect("session should finish");

    assert_eq!(snapshot.failure, Some(FailureKind::TransportFault));
    assert_eq!(
        snapshot.result_message.as_deref(),
        Some("Verification service error (HTTP 502)")
    );
}

#[test]
fn runtime_http_tests_profile_store_outage_blocks_start() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/api/verification-status/alice")
        .with_status(503)
        .with_body(r#"{"message":"maintenance"}"#)
        .create();

    let (runtime, probe) = runtime_for(&server.url());
    let error = runtime
        .start()
        .expect_err("start must fail when the profile store is down");

    assert!(matches!(
        error,
        AppError::Profile(ProfileError::Status { status: 503, .. })
    ));
    assert_eq!(runtime.snapshot().status, SessionStatus::Idle);
    assert_eq!(probe.opened(), 0);
}

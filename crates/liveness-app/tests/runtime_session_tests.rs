//! Integration tests for the threaded session runtime.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use liveness_app::AppError;
use liveness_app::runtime::{RuntimeParts, SessionRuntime};
use liveness_capture::{
    CameraConstraints, SyntheticCameraBackend, SyntheticProbe, SyntheticRecorder,
};
use liveness_core::{
    DEFAULT_MAX_ARTIFACT_BYTES, FailureKind, InstructionStep, InstructionTimeline, SessionConfig,
    SessionStatus, SubjectId,
};
use liveness_profile::{
    InMemoryIdentityStore, ProfileClient, ProfileError, ProfileStatus, ProfileTransport,
    ReferenceImage, UploadReceipt,
};
use liveness_session::{SessionError, SessionSnapshot};
use liveness_verify::{
    ArtifactUpload, VerificationClient, VerifierResponse, VerifierTransport, VerifyError,
};
use url::Url;

const WAIT: Duration = Duration::from_secs(5);

struct StaticProfile {
    has_picture: bool,
}

impl ProfileTransport for StaticProfile {
    fn fetch_status(&self, _url: &Url) -> Result<ProfileStatus, ProfileError> {
        Ok(ProfileStatus {
            subject: Some("alice".to_string()),
            has_profile_picture: self.has_picture,
            verification_required: true,
            last_verification_date: None,
        })
    }

    fn upload_image(
        &self,
        _url: &Url,
        _image: &ReferenceImage,
    ) -> Result<UploadReceipt, ProfileError> {
        Err(ProfileError::Transport("uploads are not scripted".to_string()))
    }
}

struct ScriptedVerifier {
    response: Result<VerifierResponse, VerifyError>,
    calls: AtomicUsize,
}

impl VerifierTransport for ScriptedVerifier {
    fn post_artifact(
        &self,
        _url: &Url,
        upload: &ArtifactUpload,
    ) -> Result<VerifierResponse, VerifyError> {
        assert!(!upload.is_empty());
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response.clone()
    }
}

struct Fixture {
    runtime: SessionRuntime,
    probe: Arc<SyntheticProbe>,
    verifier: Arc<ScriptedVerifier>,
}

fn verified() -> Result<VerifierResponse, VerifyError> {
    Ok(VerifierResponse {
        status: 200,
        body: r#"{"success":true,"message":"match","confidence":0.97}"#.to_string(),
    })
}

fn fixture(
    backend: SyntheticCameraBackend,
    has_picture: bool,
    signed_in: bool,
    response: Result<VerifierResponse, VerifyError>,
) -> Fixture {
    let probe = backend.probe();
    let identity = Arc::new(InMemoryIdentityStore::new());
    if signed_in {
        identity.sign_in(SubjectId::new("alice").expect("subject should be valid"));
    }
    let profile = ProfileClient::new(
        "http://127.0.0.1:9/api",
        Arc::new(StaticProfile { has_picture }),
    )
    .expect("profile client should build");
    let verifier = Arc::new(ScriptedVerifier {
        response,
        calls: AtomicUsize::new(0),
    });
    let client = VerificationClient::new("http://127.0.0.1:9/api", verifier.clone())
        .expect("verification client should build");
    let timeline = InstructionTimeline::new(vec![
        InstructionStep::new("Look straight", "Face the camera", 60).expect("step should be valid"),
        InstructionStep::new("Blink", "Blink twice", 60).expect("step should be valid"),
    ])
    .expect("timeline should be valid");

    let runtime = SessionRuntime::spawn(RuntimeParts {
        config: SessionConfig::new(10, 2_000, 1_024, DEFAULT_MAX_ARTIFACT_BYTES)
            .expect("config should be valid"),
        timeline,
        backend: Arc::new(backend),
        constraints: CameraConstraints::default(),
        identity,
        profile,
        verifier: client,
    })
    .expect("runtime should spawn");

    Fixture {
        runtime,
        probe,
        verifier,
    }
}

fn wait_for_terminal(runtime: &SessionRuntime) -> SessionSnapshot {
    runtime
        .wait_until(|snapshot| snapshot.status.is_terminal(), WAIT)
        .expect("session should reach a terminal state")
}

#[test]
fn runtime_session_tests_completes_successful_verification() {
    let fixture = fixture(SyntheticCameraBackend::new(), true, true, verified());

    fixture.runtime.start().expect("start should be accepted");
    let snapshot = wait_for_terminal(&fixture.runtime);

    assert_eq!(snapshot.status, SessionStatus::Succeeded);
    assert_eq!(snapshot.result_message.as_deref(), Some("match"));
    assert_eq!(
        snapshot.result_details.and_then(|verdict| verdict.confidence),
        Some(0.97)
    );
    assert!(!snapshot.holding_camera);
    assert_eq!(fixture.probe.live(), 0);
    assert_eq!(fixture.verifier.calls.load(Ordering::SeqCst), 1);

    let view = fixture.runtime.view();
    assert_eq!(view.status_label, "Verified");
    assert!(view.can_reset);
}

#[test]
fn runtime_session_tests_profile_gate_rejects_start() {
    let fixture = fixture(SyntheticCameraBackend::new(), false, true, verified());

    let error = fixture
        .runtime
        .start()
        .expect_err("start without a profile picture must be rejected");

    assert!(matches!(
        error,
        AppError::Session(SessionError::ProfilePictureMissing)
    ));
    assert_eq!(fixture.runtime.snapshot().status, SessionStatus::Idle);
    assert_eq!(fixture.probe.opened(), 0);
}

#[test]
fn runtime_session_tests_requires_signed_in_subject() {
    let fixture = fixture(SyntheticCameraBackend::new(), true, false, verified());

    let error = fixture
        .runtime
        .start()
        .expect_err("start without a subject must be rejected");

    assert!(matches!(error, AppError::Profile(ProfileError::NotSignedIn)));
    assert_eq!(fixture.probe.opened(), 0);
}

#[test]
fn runtime_session_tests_transport_fault_fails_session() {
    let fixture = fixture(
        SyntheticCameraBackend::new(),
        true,
        true,
        Err(VerifyError::Transport("connection refused".to_string())),
    );

    fixture.runtime.start().expect("start should be accepted");
    let snapshot = wait_for_terminal(&fixture.runtime);

    assert_eq!(snapshot.status, SessionStatus::Failed);
    assert_eq!(snapshot.failure, Some(FailureKind::TransportFault));
    assert!(snapshot.result_message.is_some());
    assert_eq!(fixture.probe.live(), 0);
}

#[test]
fn runtime_session_tests_cancel_releases_stalled_recorder() {
    let fixture = fixture(
        SyntheticCameraBackend::new().with_recorder(SyntheticRecorder::Stall),
        true,
        true,
        verified(),
    );

    fixture.runtime.start().expect("start should be accepted");
    fixture
        .runtime
        .wait_until(|snapshot| snapshot.status == SessionStatus::Stopping, WAIT)
        .expect("stalled recorder should leave the session stopping");
    assert_eq!(fixture.probe.live(), 1);

    fixture.runtime.cancel().expect("cancel should be accepted");

    assert_eq!(fixture.runtime.snapshot().status, SessionStatus::Idle);
    assert_eq!(fixture.probe.live(), 0);
    assert_eq!(fixture.verifier.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn runtime_session_tests_reset_allows_second_attempt() {
    let fixture = fixture(SyntheticCameraBackend::new(), true, true, verified());

    fixture.runtime.start().expect("first start should be accepted");
    wait_for_terminal(&fixture.runtime);
    fixture.runtime.reset().expect("reset should be accepted");
    assert_eq!(fixture.runtime.snapshot().status, SessionStatus::Idle);

    fixture.runtime.start().expect("second start should be accepted");
    let snapshot = wait_for_terminal(&fixture.runtime);

    assert_eq!(snapshot.attempt, 2);
    assert_eq!(snapshot.status, SessionStatus::Succeeded);
    assert_eq!(fixture.probe.opened(), 2);
    assert_eq!(fixture.probe.live(), 0);
}

#[test]
fn runtime_session_tests_shutdown_releases_camera() {
    let fixture = fixture(
        SyntheticCameraBackend::new().with_recorder(SyntheticRecorder::Stall),
        true,
        true,
        verified(),
    );

    fixture.runtime.start().expect("start should be accepted");
    fixture
        .runtime
        .wait_until(|snapshot| snapshot.holding_camera, WAIT)
        .expect("camera should be acquired");

    let probe = fixture.probe.clone();
    fixture
        .runtime
        .shutdown()
        .expect("shutdown should join the owner thread");
    assert_eq!(probe.live(), 0);
}

//! Integration tests for projecting session snapshots into display views.

use liveness_app::project_session;
use liveness_core::{FailureKind, InstructionTimeline, SessionStatus};
use liveness_session::SessionSnapshot;

fn snapshot(status: SessionStatus) -> SessionSnapshot {
    SessionSnapshot {
        attempt: 1,
        status,
        subject: None,
        current_step_index: None,
        elapsed_ms: 0,
        progress_fraction: 0.0,
        chunk_count: 0,
        buffered_bytes: 0,
        holding_camera: false,
        stop_reason: None,
        failure: None,
        result_message: None,
        result_details: None,
    }
}

#[test]
fn status_projection_tests_recording_shows_current_instruction() {
    let timeline = InstructionTimeline::standard();
    let mut recording = snapshot(SessionStatus::Recording);
    recording.current_step_index = Some(1);
    recording.elapsed_ms = 4_500;
    recording.progress_fraction = 0.25;
    recording.holding_camera = true;

    let view = project_session(&recording, &timeline);

    assert_eq!(view.status_label, "Recording");
    assert_eq!(view.instruction_title.as_deref(), Some("Blink twice"));
    assert!(
        view.instruction_description
            .as_deref()
            .is_some_and(|text| text.starts_with("Please blink"))
    );
    assert_eq!(view.step_label.as_deref(), Some("Step 2 of 5"));
    assert_eq!(view.progress_percent, 25);
    assert!(!view.can_start);
    assert!(view.can_stop);
    assert!(view.can_cancel);
    assert!(!view.can_reset);
}

#[test]
fn status_projection_tests_failure_surfaces_message() {
    let timeline = InstructionTimeline::standard();
    let mut failed = snapshot(SessionStatus::Failed);
    failed.failure = Some(FailureKind::EmptyArtifact);
    failed.result_message = Some("No video data recorded".to_string());
    failed.progress_fraction = 0.4;

    let view = project_session(&failed, &timeline);

    assert_eq!(view.status_label, "Verification failed");
    assert_eq!(view.instruction_title, None);
    assert_eq!(view.step_label, None);
    assert_eq!(view.message.as_deref(), Some("No video data recorded"));
    assert!(!view.can_start);
    assert!(!view.can_cancel);
    assert!(view.can_reset);
}

#[test]
fn status_projection_tests_idle_and_submitting_gates() {
    let timeline = InstructionTimeline::standard();

    let idle = project_session(&snapshot(SessionStatus::Idle), &timeline);
    assert_eq!(idle.status_label, "Ready");
    assert!(idle.can_start);
    assert!(!idle.can_stop);
    assert_eq!(idle.progress_percent, 0);

    let mut submitting = snapshot(SessionStatus::Submitting);
    submitting.progress_fraction = 1.0;
    let view = project_session(&submitting, &timeline);
    assert_eq!(view.status_label, "Verifying");
    assert_eq!(view.progress_percent, 100);
    assert!(!view.can_cancel);
    assert!(!view.can_start);
}

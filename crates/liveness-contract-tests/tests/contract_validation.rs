//! Validates contract fixtures against frozen JSON schemas and the decoders
//! that consume them.

use jsonschema::JSONSchema;
use liveness_core::VerdictDetails;
use liveness_profile::{ProfileStatus, UploadReceipt};
use liveness_verify::{VerdictSource, VerifierResponse, map_verifier_response, parse_verdict_body};
use liveness_contract_tests::contract_path;
use serde_json::Value;

fn read_contract(name: &str) -> String {
    std::fs::read_to_string(contract_path(name)).expect("contract file should be readable")
}

fn load_json(name: &str) -> Value {
    serde_json::from_str(&read_contract(name)).expect("contract file should be valid json")
}

fn compile_validator(name: &str) -> JSONSchema {
    let schema = load_json(name);
    JSONSchema::compile(&schema).expect("schema should compile")
}

#[test]
fn verdict_fixtures_match_schema() {
    let validator = compile_validator("verification-verdict.schema.json");
    for fixture in [
        "fixtures/verification-verdict.success.json",
        "fixtures/verification-verdict.rejected.json",
    ] {
        assert!(
            validator.is_valid(&load_json(fixture)),
            "{fixture} should validate against schema"
        );
    }
    assert!(
        !validator.is_valid(&load_json("fixtures/verification-verdict.invalid.json")),
        "invalid verdict fixture must be rejected"
    );
}

#[test]
fn verdict_fixtures_decode_into_verdicts() {
    let success = parse_verdict_body(&read_contract("fixtures/verification-verdict.success.json"))
        .expect("success fixture should decode");
    assert!(success.success);
    assert_eq!(success.message, "Identity verified");
    assert_eq!(success.confidence, Some(0.97));
    let Some(VerdictDetails::Verification(payload)) = success.details else {
        panic!("success fixture should carry verification details");
    };
    assert_eq!(payload["framesAnalyzed"], 42);

    let rejected = parse_verdict_body(&read_contract("fixtures/verification-verdict.rejected.json"))
        .expect("rejected fixture should decode");
    assert!(!rejected.success);
    assert!(matches!(
        rejected.details,
        Some(VerdictDetails::Diagnostics(_))
    ));
}

#[test]
fn rejected_fixture_passes_through_client_error_status() {
    let outcome = map_verifier_response(&VerifierResponse {
        status: 400,
        body: read_contract("fixtures/verification-verdict.rejected.json"),
    });

    assert_eq!(outcome.source, VerdictSource::Verifier);
    assert_eq!(
        outcome.verdict.message,
        "Face does not match the profile picture"
    );
}

#[test]
fn profile_fixtures_match_schema_and_decode() {
    let status_validator = compile_validator("profile-status.schema.json");
    let status_fixture = load_json("fixtures/profile-status.valid.json");
    assert!(status_validator.is_valid(&status_fixture));
    let status: ProfileStatus =
        serde_json::from_value(status_fixture).expect("profile status should decode");
    assert_eq!(status.subject.as_deref(), Some("alice"));
    assert!(status.has_profile_picture);
    assert!(!status.verification_required);

    let receipt_validator = compile_validator("upload-receipt.schema.json");
    let receipt_fixture = load_json("fixtures/upload-receipt.valid.json");
    assert!(receipt_validator.is_valid(&receipt_fixture));
    let receipt: UploadReceipt =
        serde_json::from_value(receipt_fixture).expect("upload receipt should decode");
    assert!(receipt.success);
    assert_eq!(
        receipt.profile_picture_path.as_deref(),
        Some("profiles/alice.png")
    );
}

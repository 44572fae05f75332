#![warn(missing_docs)]
//! # liveness-verify
//!
//! ## Purpose
//! Submits a recorded artifact to the remote verifier and maps the answer
//! into a [`VerificationVerdict`].
//!
//! ## Responsibilities
//! - Package the artifact as a multipart upload keyed by subject.
//! - Enforce endpoint transport policy (`{base}/verify/{subject}`).
//! - Decode structured verdict bodies into one tagged details payload.
//! - Convert every transport or decode fault into a synthesized failure.
//!
//! ## Data flow
//! Artifact bytes -> [`ArtifactUpload`] -> [`VerificationClient::submit`] ->
//! [`VerifierTransport::post_artifact`] -> [`parse_verdict_body`] ->
//! [`SubmissionOutcome`].
//!
//! ## Ownership and lifetimes
//! Uploads own their bytes so a submission can run on a worker thread while
//! the session owner keeps processing input.
//!
//! ## Error model
//! [`VerificationClient::submit`] never fails: faults surface as a
//! synthesized verdict tagged [`VerdictSource::Synthesized`]. Lower-level
//! helpers return [`VerifyError`].
//!
//! ## Security and privacy notes
//! Artifacts are identified in logs by SHA-256 digest and length only.
//! No retries are attempted; each user action maps to one upload.

use std::sync::Arc;
use std::time::Duration;

use liveness_core::{
    CoreError, SubjectId, VerdictDetails, VerificationVerdict, service_base_url, subject_url,
};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

/// Multipart field carrying the recorded video.
pub const ARTIFACT_FIELD: &str = "video";

/// Path segment of the verifier endpoint.
pub const VERIFY_ACTION: &str = "verify";

/// Returns the lowercase hex SHA-256 digest of an artifact.
pub fn artifact_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Upload-ready recorded artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactUpload {
    /// Upload file name (`verification.<ext>`).
    pub file_name: String,
    /// Container MIME type.
    pub mime_type: String,
    /// Artifact bytes.
    pub bytes: Vec<u8>,
    /// Hex SHA-256 of `bytes`.
    pub digest: String,
}

impl ArtifactUpload {
    /// Packages artifact bytes for upload.
    pub fn new(bytes: Vec<u8>, mime_type: &str, extension: &str) -> Self {
        Self {
            file_name: format!("verification.{extension}"),
            mime_type: mime_type.to_string(),
            digest: artifact_digest(&bytes),
            bytes,
        }
    }

    /// Artifact length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` for a zero-length artifact.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Raw HTTP answer from the verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body text.
    pub body: String,
}

/// Transport used by [`VerificationClient`].
pub trait VerifierTransport: Send + Sync {
    /// Posts one artifact to `url`.
    ///
    /// # Errors
    /// Returns [`VerifyError::Transport`] for network failures. Non-2xx
    /// answers are returned as a normal [`VerifierResponse`].
    fn post_artifact(&self, url: &Url, upload: &ArtifactUpload)
    -> Result<VerifierResponse, VerifyError>;
}

/// Where a verdict came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictSource {
    /// Decoded from a structured verifier answer.
    Verifier,
    /// Built locally from a transport or decode fault.
    Synthesized,
}

/// Result of one submission attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionOutcome {
    /// Verdict to surface to the user.
    pub verdict: VerificationVerdict,
    /// Origin of the verdict.
    pub source: VerdictSource,
}

impl SubmissionOutcome {
    fn from_verifier(verdict: VerificationVerdict) -> Self {
        Self {
            verdict,
            source: VerdictSource::Verifier,
        }
    }

    fn fault(message: String) -> Self {
        Self {
            verdict: VerificationVerdict::synthesized_failure(message),
            source: VerdictSource::Synthesized,
        }
    }

    /// Returns `true` when the outcome was synthesized from a fault.
    pub fn is_transport_fault(&self) -> bool {
        self.source == VerdictSource::Synthesized
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerdictBody {
    success: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    verification_details: Option<serde_json::Value>,
    #[serde(default)]
    diagnostics: Option<serde_json::Value>,
    #[serde(default)]
    details: Option<serde_json::Value>,
}

/// Decodes a verifier response body.
///
/// `verificationDetails`, `diagnostics` and `details` collapse into a single
/// [`VerdictDetails`]; an untagged `details` field is tagged by `success`.
///
/// # Errors
/// Returns [`VerifyError::Decode`] when the body is not a verdict document.
pub fn parse_verdict_body(raw: &str) -> Result<VerificationVerdict, VerifyError> {
    let body: VerdictBody =
        serde_json::from_str(raw).map_err(|error| VerifyError::Decode(error.to_string()))?;

    let details = match (body.verification_details, body.diagnostics, body.details) {
        (Some(payload), _, _) => Some(VerdictDetails::Verification(payload)),
        (None, Some(payload), _) => Some(VerdictDetails::Diagnostics(payload)),
        (None, None, Some(payload)) if body.success => Some(VerdictDetails::Verification(payload)),
        (None, None, Some(payload)) => Some(VerdictDetails::Diagnostics(payload)),
        (None, None, None) => None,
    };

    Ok(VerificationVerdict {
        success: body.success,
        message: body.message,
        confidence: body.confidence,
        details,
    })
}

/// Maps one raw verifier answer into an outcome.
///
/// # Semantics
/// - 2xx with a verdict body: passed through.
/// - 4xx with a `success: false` verdict body: passed through as a rejection.
/// - anything else: synthesized failure.
pub fn map_verifier_response(response: &VerifierResponse) -> SubmissionOutcome {
    let parsed = parse_verdict_body(&response.body);
    let status = response.status;

    match parsed {
        Ok(verdict) if (200..300).contains(&status) => SubmissionOutcome::from_verifier(verdict),
        Ok(verdict) if (400..500).contains(&status) && !verdict.success => {
            SubmissionOutcome::from_verifier(verdict)
        }
        Ok(verdict) if !verdict.message.trim().is_empty() => SubmissionOutcome::fault(format!(
            "Verification service error (HTTP {status}): {}",
            verdict.message
        )),
        Ok(_) => SubmissionOutcome::fault(format!("Verification service error (HTTP {status})")),
        Err(error) if (200..300).contains(&status) => SubmissionOutcome::fault(format!(
            "Verification response could not be read: {error}"
        )),
        Err(_) => SubmissionOutcome::fault(format!("Verification service error (HTTP {status})")),
    }
}

/// Verifier client bound to one base URL.
#[derive(Clone)]
pub struct VerificationClient {
    base: Url,
    transport: Arc<dyn VerifierTransport>,
}

impl VerificationClient {
    /// Creates a validated client.
    ///
    /// # Errors
    /// Returns [`VerifyError::InvalidEndpoint`] when `base_url` violates the
    /// transport policy.
    pub fn new(
        base_url: &str,
        transport: Arc<dyn VerifierTransport>,
    ) -> Result<Self, VerifyError> {
        let base = service_base_url(base_url)?;
        Ok(Self { base, transport })
    }

    /// Returns the upload URL for `subject`.
    pub fn endpoint_for(&self, subject: &SubjectId) -> Url {
        subject_url(&self.base, VERIFY_ACTION, subject)
    }

    /// Submits one artifact. Single attempt, no retries.
    pub fn submit(&self, upload: &ArtifactUpload, subject: &SubjectId) -> SubmissionOutcome {
        let url = self.endpoint_for(subject);
        info!(
            stage = "verify",
            action = "submit",
            bytes = upload.len(),
            digest = %upload.digest,
            mime = %upload.mime_type
        );

        let outcome = match self.transport.post_artifact(&url, upload) {
            Ok(response) => map_verifier_response(&response),
            Err(error) => SubmissionOutcome::fault(format!(
                "Verification service unreachable: {error}"
            )),
        };

        if outcome.is_transport_fault() {
            warn!(
                stage = "verify",
                action = "fault",
                message = %outcome.verdict.message
            );
        } else {
            info!(
                stage = "verify",
                action = "verdict",
                success = outcome.verdict.success,
                confidence = outcome.verdict.confidence
            );
        }
        outcome
    }
}

/// Blocking HTTP transport for the verifier endpoint.
#[derive(Debug, Clone)]
pub struct HttpVerifierTransport {
    client: reqwest::blocking::Client,
}

impl HttpVerifierTransport {
    /// Builds a transport with the given request timeout.
    ///
    /// # Errors
    /// Returns [`VerifyError::Transport`] when the HTTP client cannot be
    /// initialized.
    pub fn new(timeout: Duration) -> Result<Self, VerifyError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(timeout)
            .build()
            .map_err(|error| VerifyError::Transport(error.to_string()))?;
        Ok(Self { client })
    }
}

impl VerifierTransport for HttpVerifierTransport {
    fn post_artifact(
        &self,
        url: &Url,
        upload: &ArtifactUpload,
    ) -> Result<VerifierResponse, VerifyError> {
        let part = reqwest::blocking::multipart::Part::bytes(upload.bytes.clone())
            .file_name(upload.file_name.clone())
            .mime_str(&upload.mime_type)
            .map_err(|error| VerifyError::Transport(error.to_string()))?;
        let form = reqwest::blocking::multipart::Form::new().part(ARTIFACT_FIELD, part);

        let response = self
            .client
            .post(url.clone())
            .multipart(form)
            .send()
            .map_err(|error| VerifyError::Transport(error.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|error| VerifyError::Transport(error.to_string()))?;

        Ok(VerifierResponse { status, body })
    }
}

/// Verification client errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// Endpoint violates transport policy.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    /// Network failure.
    #[error("verifier transport failure: {0}")]
    Transport(String),
    /// Body is not a verdict document.
    #[error("verdict decode failure: {0}")]
    Decode(String),
}

impl From<CoreError> for VerifyError {
    fn from(error: CoreError) -> Self {
        Self::InvalidEndpoint(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for verdict decoding and response mapping.

    use super::*;

    #[test]
    fn collapses_detail_fields_into_tagged_payload() {
        let accepted = parse_verdict_body(
            r#"{"success":true,"message":"ok","confidence":0.9,"verificationDetails":{"blinks":2}}"#,
        )
        .expect("body should decode");
        assert!(matches!(
            accepted.details,
            Some(VerdictDetails::Verification(_))
        ));

        let rejected = parse_verdict_body(r#"{"success":false,"message":"no","details":{"x":1}}"#)
            .expect("body should decode");
        assert!(matches!(
            rejected.details,
            Some(VerdictDetails::Diagnostics(_))
        ));
    }

    #[test]
    fn server_errors_are_synthesized_faults() {
        let outcome = map_verifier_response(&VerifierResponse {
            status: 500,
            body: r#"{"success":false,"message":"Verification service unavailable"}"#.to_string(),
        });
        assert!(outcome.is_transport_fault());
        assert!(outcome.verdict.message.contains("HTTP 500"));

        let garbage = map_verifier_response(&VerifierResponse {
            status: 200,
            body: "<html>".to_string(),
        });
        assert!(garbage.is_transport_fault());
        assert!(!garbage.verdict.success);
    }

    #[test]
    fn digest_is_stable_hex() {
        let digest = artifact_digest(b"abc");
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}

#![warn(missing_docs)]
//! # liveness-profile
//!
//! ## Purpose
//! Client-side view of the identity store and the profile reference store.
//!
//! ## Responsibilities
//! - Hold the signed-in subject for the process ([`IdentityStore`]).
//! - Query whether a subject has a reference picture on record.
//! - Upload a reference picture after client-side validation.
//!
//! ## Data flow
//! Login flow -> [`InMemoryIdentityStore::sign_in`] -> session start reads
//! [`IdentityStore::current_subject`] once -> [`ProfileClient::status`] gates
//! the capture session.
//!
//! ## Ownership and lifetimes
//! Status and receipt values are owned and decoupled from transport buffers.
//! The identity store hands out clones so a session keeps its subject even if
//! the store changes mid-session.
//!
//! ## Error model
//! Endpoint policy violations, invalid images, HTTP status failures and
//! transport faults are reported as [`ProfileError`].
//!
//! ## Security and privacy notes
//! Reference image bytes are never logged; only length and content type are.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use liveness_core::{CoreError, SubjectId, service_base_url, subject_url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

/// Largest reference image accepted by the profile store.
pub const MAX_REFERENCE_IMAGE_BYTES: usize = 10 * 1_024 * 1_024;

/// Multipart field carrying the reference image.
pub const REFERENCE_IMAGE_FIELD: &str = "image";

/// Process-wide record of the signed-in subject.
pub trait IdentityStore: Send + Sync {
    /// Returns the current subject, if any.
    fn current_subject(&self) -> Option<SubjectId>;
}

/// Thread-safe in-memory identity store.
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    subject: RwLock<Option<SubjectId>>,
}

impl InMemoryIdentityStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `subject` as signed in.
    pub fn sign_in(&self, subject: SubjectId) {
        if let Ok(mut slot) = self.subject.write() {
            *slot = Some(subject);
        }
    }

    /// Clears the signed-in subject.
    pub fn sign_out(&self) {
        if let Ok(mut slot) = self.subject.write() {
            *slot = None;
        }
    }
}

impl IdentityStore for InMemoryIdentityStore {
    fn current_subject(&self) -> Option<SubjectId> {
        self.subject.read().ok().and_then(|slot| slot.clone())
    }
}

/// Reads the current subject or fails.
///
/// # Errors
/// Returns [`ProfileError::NotSignedIn`] when the store is empty.
pub fn resolve_subject(store: &dyn IdentityStore) -> Result<SubjectId, ProfileError> {
    store.current_subject().ok_or(ProfileError::NotSignedIn)
}

/// Verification status reported by the profile store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileStatus {
    /// Subject echoed by the store.
    #[serde(default, rename = "username")]
    pub subject: Option<String>,
    /// Whether a reference picture is on record.
    pub has_profile_picture: bool,
    /// Whether the subject is due for a new verification.
    #[serde(default)]
    pub verification_required: bool,
    /// Last successful verification, as reported by the store.
    #[serde(default)]
    pub last_verification_date: Option<serde_json::Value>,
}

/// Reference picture to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceImage {
    /// Original file name.
    pub file_name: String,
    /// MIME type (must be `image/*`).
    pub content_type: String,
    /// Encoded image bytes.
    pub bytes: Vec<u8>,
}

impl ReferenceImage {
    /// Checks content type, emptiness and size.
    ///
    /// # Errors
    /// Returns [`ProfileError::InvalidImage`] describing the first violation.
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.bytes.is_empty() {
            return Err(ProfileError::InvalidImage(
                "No image file provided".to_string(),
            ));
        }
        if !self.content_type.starts_with("image/") {
            return Err(ProfileError::InvalidImage(
                "Invalid file type. Please upload an image.".to_string(),
            ));
        }
        if self.bytes.len() > MAX_REFERENCE_IMAGE_BYTES {
            return Err(ProfileError::InvalidImage(
                "Image file too large. Maximum size is 10MB.".to_string(),
            ));
        }
        Ok(())
    }
}

/// Profile store answer to an image upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    /// Whether the store accepted the picture.
    pub success: bool,
    /// Store message.
    #[serde(default)]
    pub message: String,
    /// Stored picture reference, when returned.
    #[serde(default)]
    pub profile_picture_path: Option<String>,
}

/// Transport used by [`ProfileClient`].
pub trait ProfileTransport: Send + Sync {
    /// Fetches the verification status document at `url`.
    fn fetch_status(&self, url: &Url) -> Result<ProfileStatus, ProfileError>;

    /// Uploads `image` to `url`.
    fn upload_image(&self, url: &Url, image: &ReferenceImage)
    -> Result<UploadReceipt, ProfileError>;
}

/// Profile store client with endpoint policy enforcement.
#[derive(Clone)]
pub struct ProfileClient {
    base: Url,
    transport: Arc<dyn ProfileTransport>,
}

impl ProfileClient {
    /// Creates a validated client.
    ///
    /// # Errors
    /// Returns [`ProfileError::InvalidEndpoint`] when `base_url` violates the
    /// transport policy.
    pub fn new(
        base_url: &str,
        transport: Arc<dyn ProfileTransport>,
    ) -> Result<Self, ProfileError> {
        let base = service_base_url(base_url)?;
        Ok(Self { base, transport })
    }

    /// Returns the configured base URL.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Fetches the verification status for `subject`.
    ///
    /// # Errors
    /// Propagates transport and status errors.
    pub fn status(&self, subject: &SubjectId) -> Result<ProfileStatus, ProfileError> {
        let url = subject_url(&self.base, "verification-status", subject);
        let status = self.transport.fetch_status(&url)?;
        info!(
            stage = "profile",
            action = "status",
            has_profile_picture = status.has_profile_picture,
            verification_required = status.verification_required
        );
        Ok(status)
    }

    /// Returns whether `subject` has a reference picture on record.
    ///
    /// # Errors
    /// Propagates [`ProfileClient::status`] failures.
    pub fn has_profile_picture(&self, subject: &SubjectId) -> Result<bool, ProfileError> {
        self.status(subject).map(|status| status.has_profile_picture)
    }

    /// Uploads a reference picture for `subject`.
    ///
    /// # Errors
    /// Returns [`ProfileError::InvalidImage`] before any network call when the
    /// image fails validation, [`ProfileError::Rejected`] when the store
    /// answers `success: false`, and transport errors otherwise.
    pub fn upload_reference_image(
        &self,
        subject: &SubjectId,
        image: &ReferenceImage,
    ) -> Result<UploadReceipt, ProfileError> {
        image.validate()?;
        let url = subject_url(&self.base, "upload-profile-picture", subject);
        let receipt = self.transport.upload_image(&url, image)?;
        if !receipt.success {
            warn!(stage = "profile", action = "upload_rejected", message = %receipt.message);
            return Err(ProfileError::Rejected(receipt.message));
        }
        info!(
            stage = "profile",
            action = "upload",
            bytes = image.bytes.len(),
            content_type = %image.content_type
        );
        Ok(receipt)
    }
}

/// Blocking HTTP transport for the profile store.
#[derive(Debug, Clone)]
pub struct HttpProfileTransport {
    client: reqwest::blocking::Client,
}

impl HttpProfileTransport {
    /// Builds a transport with the given request timeout.
    ///
    /// # Errors
    /// Returns [`ProfileError::Transport`] when the HTTP client cannot be
    /// initialized.
    pub fn new(timeout: Duration) -> Result<Self, ProfileError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(timeout)
            .build()
            .map_err(|error| ProfileError::Transport(error.to_string()))?;
        Ok(Self { client })
    }
}

impl ProfileTransport for HttpProfileTransport {
    fn fetch_status(&self, url: &Url) -> Result<ProfileStatus, ProfileError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|error| ProfileError::Transport(error.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|error| ProfileError::Transport(error.to_string()))?;

        if !status.is_success() {
            return Err(status_error(status.as_u16(), &body));
        }
        serde_json::from_str(&body).map_err(|error| ProfileError::Decode(error.to_string()))
    }

    fn upload_image(
        &self,
        url: &Url,
        image: &ReferenceImage,
    ) -> Result<UploadReceipt, ProfileError> {
        let part = reqwest::blocking::multipart::Part::bytes(image.bytes.clone())
            .file_name(image.file_name.clone())
            .mime_str(&image.content_type)
            .map_err(|error| ProfileError::InvalidImage(error.to_string()))?;
        let form = reqwest::blocking::multipart::Form::new().part(REFERENCE_IMAGE_FIELD, part);

        let response = self
            .client
            .post(url.clone())
            .multipart(form)
            .send()
            .map_err(|error| ProfileError::Transport(error.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|error| ProfileError::Transport(error.to_string()))?;

        if !status.is_success() {
            return Err(status_error(status.as_u16(), &body));
        }
        serde_json::from_str(&body).map_err(|error| ProfileError::Decode(error.to_string()))
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

fn status_error(status: u16, body: &str) -> ProfileError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|parsed| parsed.message)
        .unwrap_or_default();
    ProfileError::Status { status, message }
}

/// Profile and identity errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProfileError {
    /// Endpoint violates transport policy.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    /// No subject is signed in.
    #[error("no subject is signed in")]
    NotSignedIn,
    /// Image failed client-side validation.
    #[error("invalid reference image: {0}")]
    InvalidImage(String),
    /// The store answered with a non-success HTTP status.
    #[error("profile store returned HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Store-provided message, possibly empty.
        message: String,
    },
    /// The store explicitly refused the upload.
    #[error("profile store rejected upload: {0}")]
    Rejected(String),
    /// Body could not be decoded.
    #[error("profile response decode failure: {0}")]
    Decode(String),
    /// Network failure.
    #[error("profile transport failure: {0}")]
    Transport(String),
}

impl From<CoreError> for ProfileError {
    fn from(error: CoreError) -> Self {
        Self::InvalidEndpoint(error.to_string())
    }
}

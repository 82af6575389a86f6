//! Contracts the engine needs from the outside world.
//!
//! Browser automation, SVG post-processing, the upload API and identity
//! lookups all live behind these traits so the engine can be driven by
//! real clients in production and by fakes in tests.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;

use crate::model::{Job, LeafFill, UnitKey};

/// Failure reported by a collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// Worth retrying (timeouts, flaky pages, rate limits).
    #[error("transient failure: {0}")]
    Transient(String),

    /// Retrying cannot help.
    #[error("fatal failure: {0}")]
    Fatal(String),
}

impl CollaboratorError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CollaboratorError::Transient(_))
    }
}

/// The user on whose behalf a job uploads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub username: String,
}

/// One outer unit of fan-out: a region or a country.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub key: String,
    /// Human-readable name substituted for `$REGION` / `$COUNTRY`.
    pub label: String,
    /// Ordered inner sweep (years). Empty means a single step.
    pub steps: Vec<String>,
    /// Step that receives the partition's aggregated metadata once the
    /// sweep is done.
    pub metadata_anchor: Option<String>,
}

impl Partition {
    /// A partition without an inner sweep.
    pub fn single(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            steps: Vec::new(),
            metadata_anchor: None,
        }
    }
}

/// Facts discovered once per run and shared by every unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharedContext {
    pub title: String,
    pub start_year: Option<String>,
    pub end_year: Option<String>,
}

/// Result of resolving a job's work.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub primary: Vec<Partition>,
    /// Per-country partitions for the optional secondary phase. Empty
    /// when the chart has none.
    pub secondary: Vec<Partition>,
    pub context: SharedContext,
}

/// One invocation of the unit processor.
#[derive(Debug, Clone)]
pub struct UnitRequest {
    pub key: UnitKey,
    pub label: String,
    pub attempt: u32,
    pub timeout: Duration,
    /// Metadata block to embed in the artifact (forced refresh only).
    pub attachment: Option<String>,
}

/// A rendered artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub fills: Vec<LeafFill>,
}

/// What an existing remote file looks like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Hex SHA-1 of the stored content.
    pub sha1: String,
    pub description: String,
}

#[async_trait]
pub trait PartitionResolver: Send + Sync {
    async fn resolve_partitions(&self, job: &Job) -> Result<Resolution, CollaboratorError>;
}

#[async_trait]
pub trait UnitProcessor: Send + Sync {
    async fn process(
        &self,
        job: &Job,
        request: &UnitRequest,
        context: &SharedContext,
    ) -> Result<Artifact, CollaboratorError>;
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn acquire_token(&self, principal: &Principal) -> Result<SecretString, CollaboratorError>;
}

#[async_trait]
pub trait PrincipalResolver: Send + Sync {
    /// `Ok(None)` when the user no longer exists.
    async fn resolve(&self, user_id: &str) -> Result<Option<Principal>, CollaboratorError>;
}

/// Raw operations of the remote media repository.
#[async_trait]
pub trait MediaRepository: Send + Sync {
    async fn lookup(
        &self,
        token: &SecretString,
        name: &str,
    ) -> Result<Option<RemoteFile>, CollaboratorError>;

    async fn upload(
        &self,
        token: &SecretString,
        name: &str,
        bytes: &[u8],
        description: &str,
        comment: &str,
    ) -> Result<(), CollaboratorError>;

    async fn update_description(
        &self,
        token: &SecretString,
        name: &str,
        description: &str,
        comment: &str,
    ) -> Result<(), CollaboratorError>;

    /// Saves a wiki page and returns its final title.
    async fn save_page(
        &self,
        token: &SecretString,
        title: &str,
        text: &str,
        comment: &str,
    ) -> Result<String, CollaboratorError>;
}

/// The upload token of a running job, swapped by the refresh loop.
#[derive(Clone)]
pub struct TokenCell {
    inner: Arc<RwLock<Arc<SecretString>>>,
}

impl TokenCell {
    pub fn new(token: SecretString) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(token))),
        }
    }

    pub fn current(&self) -> Arc<SecretString> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    pub fn replace(&self, token: SecretString) {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::new(token);
    }
}

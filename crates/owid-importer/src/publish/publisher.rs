use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::decision::{content_sha1, decide, UploadAction};
use super::description::merge_description;
use crate::collab::{CollaboratorError, MediaRepository};
use crate::model::{OverwritePolicy, UnitStatus};

/// Result of publishing one artifact.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PublishOutcome {
    Uploaded,
    Overwritten,
    Skipped,
    DescriptionUpdated,
}

impl From<PublishOutcome> for UnitStatus {
    fn from(outcome: PublishOutcome) -> Self {
        match outcome {
            PublishOutcome::Uploaded => UnitStatus::Uploaded,
            PublishOutcome::Overwritten => UnitStatus::Overwritten,
            PublishOutcome::Skipped => UnitStatus::Skipped,
            PublishOutcome::DescriptionUpdated => UnitStatus::DescriptionUpdated,
        }
    }
}

/// A network step of publishing failed. Never mutates the ledger.
#[derive(Error, Debug, Clone)]
#[error("{step} of '{name}' failed: {source}")]
pub struct PublishError {
    pub step: &'static str,
    pub name: String,
    #[source]
    pub source: CollaboratorError,
}

impl PublishError {
    pub fn is_retryable(&self) -> bool {
        self.source.is_retryable()
    }
}

/// One artifact to publish.
#[derive(Debug, Clone, Copy)]
pub struct PublishRequest<'a> {
    pub name: &'a str,
    pub bytes: &'a [u8],
    pub description: &'a str,
    pub policy: OverwritePolicy,
    pub comment: &'a str,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        token: &SecretString,
        request: &PublishRequest<'_>,
    ) -> Result<PublishOutcome, PublishError>;

    /// Publishes a wiki page and returns its final title.
    async fn publish_page(
        &self,
        token: &SecretString,
        title: &str,
        text: &str,
        comment: &str,
    ) -> Result<String, PublishError>;
}

/// Publisher that compares content hashes before touching the repository.
pub struct HashingPublisher {
    repository: Arc<dyn MediaRepository>,
}

impl HashingPublisher {
    pub fn new(repository: Arc<dyn MediaRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl Publisher for HashingPublisher {
    async fn publish(
        &self,
        token: &SecretString,
        request: &PublishRequest<'_>,
    ) -> Result<PublishOutcome, PublishError> {
        let fail = |step: &'static str| {
            let name = request.name.to_string();
            move |source: CollaboratorError| PublishError { step, name, source }
        };

        let remote = self
            .repository
            .lookup(token, request.name)
            .await
            .map_err(fail("lookup"))?;

        let description = merge_description(
            request.policy,
            request.description,
            remote.as_ref().map(|r| r.description.as_str()),
        );
        let local_sha1 = content_sha1(request.bytes);

        match decide(remote.as_ref(), &local_sha1, &description) {
            UploadAction::Upload => {
                self.repository
                    .upload(token, request.name, request.bytes, &description, request.comment)
                    .await
                    .map_err(fail("upload"))?;
                Ok(PublishOutcome::Uploaded)
            }
            UploadAction::Overwrite => {
                self.repository
                    .upload(token, request.name, request.bytes, &description, request.comment)
                    .await
                    .map_err(fail("overwrite"))?;
                if remote.is_some_and(|r| r.description.trim() != description.trim()) {
                    self.repository
                        .update_description(token, request.name, &description, request.comment)
                        .await
                        .map_err(fail("description update"))?;
                }
                Ok(PublishOutcome::Overwritten)
            }
            UploadAction::UpdateDescription => {
                self.repository
                    .update_description(token, request.name, &description, request.comment)
                    .await
                    .map_err(fail("description update"))?;
                Ok(PublishOutcome::DescriptionUpdated)
            }
            UploadAction::Skip => Ok(PublishOutcome::Skipped),
        }
    }

    async fn publish_page(
        &self,
        token: &SecretString,
        title: &str,
        text: &str,
        comment: &str,
    ) -> Result<String, PublishError> {
        self.repository
            .save_page(token, title, text, comment)
            .await
            .map_err(|source| PublishError {
                step: "page save",
                name: title.to_string(),
                source,
            })
    }
}

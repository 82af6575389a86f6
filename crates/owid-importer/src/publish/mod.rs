//! Content-addressed publishing of artifacts to the media repository.

pub mod decision;
pub mod description;
pub mod publisher;

pub use decision::{content_sha1, decide, UploadAction};
pub use description::merge_description;
pub use publisher::{HashingPublisher, PublishError, PublishOutcome, PublishRequest, Publisher};

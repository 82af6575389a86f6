use sha1::{Digest, Sha1};

use crate::collab::RemoteFile;

/// What to do with a freshly rendered artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadAction {
    /// Nothing exists under the name yet.
    Upload,
    /// Different content exists; replace it.
    Overwrite,
    /// Same content, only the description changed.
    UpdateDescription,
    /// Same content and description.
    Skip,
}

/// Hex SHA-1 of artifact bytes, the hash the repository reports.
pub fn content_sha1(bytes: &[u8]) -> String {
    hex::encode(Sha1::digest(bytes))
}

/// Decides the upload action from the remote state.
///
/// `description` is the text that would be written now, after the
/// overwrite policy has been applied to the remote description.
pub fn decide(remote: Option<&RemoteFile>, local_sha1: &str, description: &str) -> UploadAction {
    match remote {
        None => UploadAction::Upload,
        Some(remote) if !remote.sha1.eq_ignore_ascii_case(local_sha1) => UploadAction::Overwrite,
        Some(remote) if remote.description.trim() != description.trim() => {
            UploadAction::UpdateDescription
        }
        Some(_) => UploadAction::Skip,
    }
}

//! Scripted collaborators.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;

use owid_importer::collab::{
    Artifact, CollaboratorError, MediaRepository, Partition, PartitionResolver, Principal,
    PrincipalResolver, RemoteFile, Resolution, SharedContext, TokenProvider, UnitProcessor,
    UnitRequest,
};
use owid_importer::model::{Job, LeafFill};
use owid_importer::publish::content_sha1;

/// Returns a fixed resolution, or a fixed error.
#[derive(Default)]
pub struct FakeResolver {
    resolution: Mutex<Resolution>,
    error: Mutex<Option<CollaboratorError>>,
}

impl FakeResolver {
    pub fn set(&self, resolution: Resolution) {
        *self.resolution.lock().unwrap() = resolution;
    }

    pub fn fail_with(&self, error: CollaboratorError) {
        *self.error.lock().unwrap() = Some(error);
    }
}

#[async_trait]
impl PartitionResolver for FakeResolver {
    async fn resolve_partitions(&self, _job: &Job) -> Result<Resolution, CollaboratorError> {
        if let Some(error) = self.error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self.resolution.lock().unwrap().clone())
    }
}

/// Partitions without an inner sweep, labelled by their key.
pub fn single_partitions(keys: &[&str]) -> Vec<Partition> {
    keys.iter().map(|k| Partition::single(*k, *k)).collect()
}

/// A region swept over `years`, anchored on the first one.
pub fn region(key: &str, years: &[&str]) -> Partition {
    Partition {
        key: key.to_string(),
        label: key.to_string(),
        steps: years.iter().map(|y| y.to_string()).collect(),
        metadata_anchor: years.first().map(|y| y.to_string()),
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Renders deterministic artifacts, with scripted failures per unit key
/// (`UnitKey`'s display form, e.g. `country:B` or `map:World/2000`).
#[derive(Default)]
pub struct FakeProcessor {
    delay: Mutex<Duration>,
    failures: Mutex<HashMap<String, (u32, CollaboratorError)>>,
    calls: Mutex<Vec<UnitRequest>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeProcessor {
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Makes the next `times` invocations for `key` fail with `error`.
    pub fn fail(&self, key: &str, times: u32, error: CollaboratorError) {
        self.failures
            .lock()
            .unwrap()
            .insert(key.to_string(), (times, error));
    }

    pub fn calls(&self) -> Vec<UnitRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, key: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.key.to_string() == key)
            .count()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UnitProcessor for FakeProcessor {
    async fn process(
        &self,
        _job: &Job,
        request: &UnitRequest,
        _context: &SharedContext,
    ) -> Result<Artifact, CollaboratorError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.in_flight);
        self.peak.fetch_max(current, Ordering::SeqCst);
        self.calls.lock().unwrap().push(request.clone());

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let key = request.key.to_string();
        if let Some((remaining, error)) = self.failures.lock().unwrap().get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(error.clone());
            }
        }

        let fills = match &request.key.step {
            Some(year) => vec![LeafFill {
                country: "France".to_string(),
                fill: format!("#{}", year),
            }],
            None => Vec::new(),
        };
        let bytes = format!(
            "<svg data-unit=\"{}\">{}</svg>",
            key,
            request.attachment.as_deref().unwrap_or("")
        )
        .into_bytes();
        Ok(Artifact { bytes, fills })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub bytes: Vec<u8>,
    pub description: String,
}

/// Media repository held in memory.
#[derive(Default)]
pub struct MemoryRepository {
    files: Mutex<HashMap<String, StoredFile>>,
    pages: Mutex<HashMap<String, String>>,
    uploads: Mutex<Vec<String>>,
    description_updates: Mutex<Vec<String>>,
}

impl MemoryRepository {
    pub fn put(&self, name: &str, bytes: &[u8], description: &str) {
        self.files.lock().unwrap().insert(
            name.to_string(),
            StoredFile {
                bytes: bytes.to_vec(),
                description: description.to_string(),
            },
        );
    }

    pub fn file(&self, name: &str) -> Option<StoredFile> {
        self.files.lock().unwrap().get(name).cloned()
    }

    pub fn page(&self, title: &str) -> Option<String> {
        self.pages.lock().unwrap().get(title).cloned()
    }

    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn description_updates(&self) -> Vec<String> {
        self.description_updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaRepository for MemoryRepository {
    async fn lookup(
        &self,
        _token: &SecretString,
        name: &str,
    ) -> Result<Option<RemoteFile>, CollaboratorError> {
        Ok(self.file(name).map(|f| RemoteFile {
            sha1: content_sha1(&f.bytes),
            description: f.description,
        }))
    }

    async fn upload(
        &self,
        _token: &SecretString,
        name: &str,
        bytes: &[u8],
        description: &str,
        _comment: &str,
    ) -> Result<(), CollaboratorError> {
        self.put(name, bytes, description);
        self.uploads.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn update_description(
        &self,
        _token: &SecretString,
        name: &str,
        description: &str,
        _comment: &str,
    ) -> Result<(), CollaboratorError> {
        let mut files = self.files.lock().unwrap();
        let file = files
            .get_mut(name)
            .ok_or_else(|| CollaboratorError::Fatal(format!("no such file: {}", name)))?;
        file.description = description.to_string();
        self.description_updates.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn save_page(
        &self,
        _token: &SecretString,
        title: &str,
        text: &str,
        _comment: &str,
    ) -> Result<String, CollaboratorError> {
        self.pages
            .lock()
            .unwrap()
            .insert(title.to_string(), text.to_string());
        Ok(title.to_string())
    }
}

/// Hands out numbered tokens.
#[derive(Default)]
pub struct FakeTokens {
    issued: AtomicUsize,
    failing: AtomicBool,
}

impl FakeTokens {
    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl TokenProvider for FakeTokens {
    async fn acquire_token(&self, principal: &Principal) -> Result<SecretString, CollaboratorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Fatal(format!(
                "no credentials for {}",
                principal.username
            )));
        }
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        Ok(SecretString::from(format!("token-{}", n)))
    }
}

/// Knows a fixed set of users.
#[derive(Default)]
pub struct FakePrincipals {
    known: Mutex<HashSet<String>>,
}

impl FakePrincipals {
    pub fn add(&self, user_id: &str) {
        self.known.lock().unwrap().insert(user_id.to_string());
    }
}

#[async_trait]
impl PrincipalResolver for FakePrincipals {
    async fn resolve(&self, user_id: &str) -> Result<Option<Principal>, CollaboratorError> {
        Ok(self
            .known
            .lock()
            .unwrap()
            .contains(user_id)
            .then(|| principal(user_id)))
    }
}

pub fn principal(user_id: &str) -> Principal {
    Principal {
        user_id: user_id.to_string(),
        username: format!("{}-name", user_id),
    }
}

//! Time-to-live artifact store backed by a local directory.
//!
//! Every artifact is a file directly inside the store root plus an index
//! entry holding its last-touched instant. An artifact is retrievable while
//! `now - last_touched <= ttl`; a successful retrieval resets
//! `last_touched`. Expired files are removed by [`ArtifactStore::sweep_expired`],
//! which the API server runs periodically on a background task.
//!
//! Structural operations (register, touch, delete) are serialized by one
//! store-wide lock. Retrieval opens the file while holding that lock, and a
//! sweep re-checks expiry under the lock before each deletion, so a sweep
//! can never delete a file between the expiry check and the open.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::CoreError;
use crate::naming::validate_artifact_name;

/// Default artifact lifetime: one hour.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Error type for artifact store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("Invalid artifact name: {0}")]
    InvalidName(String),

    #[error("Artifact store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(name) => CoreError::NotFound {
                entity: "Artifact",
                name,
            },
            StoreError::InvalidName(name) => {
                CoreError::Validation(format!("Invalid artifact name '{name}'"))
            }
            StoreError::Io(e) => CoreError::Internal(e.to_string()),
        }
    }
}

/// Snapshot of a stored artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub last_touched: Instant,
    pub ttl: Duration,
}

impl Artifact {
    /// Time since the artifact was created or last retrieved.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_touched)
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.age(now) > self.ttl
    }
}

/// Outcome of one sweep cycle.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SweepReport {
    /// Files examined in the store directory.
    pub scanned: usize,
    /// Names removed because they outlived the TTL.
    pub deleted: Vec<String>,
    /// Expired files that could not be removed.
    pub failed: usize,
}

/// A file found past its TTL during the scan phase of a sweep.
#[derive(Debug)]
struct SweepCandidate {
    name: String,
    path: PathBuf,
    age: Duration,
    /// Whether the file had an index entry when scanned.
    tracked: bool,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    size_bytes: u64,
    last_touched: Instant,
}

#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl ArtifactStore {
    /// Open (creating if needed) the store directory.
    ///
    /// Files left by a previous run are adopted with their modification
    /// time as last-touched, so they expire on the same schedule they would
    /// have had.
    pub async fn open(root: impl Into<PathBuf>, ttl: Duration) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;

        let now = Instant::now();
        let wall_now = SystemTime::now();
        let mut entries = HashMap::new();

        let mut dir = tokio::fs::read_dir(&root).await?;
        while let Some(dir_entry) = dir.next_entry().await? {
            let name = dir_entry.file_name().to_string_lossy().into_owned();
            if validate_artifact_name(&name).is_err() {
                continue;
            }
            let metadata = dir_entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let age = file_age(&metadata, wall_now);
            // Files older than the monotonic clock origin stay untracked;
            // the sweep removes them by modification time.
            if let Some(last_touched) = now.checked_sub(age) {
                entries.insert(
                    name,
                    Entry {
                        size_bytes: metadata.len(),
                        last_touched,
                    },
                );
            }
        }

        tracing::info!(
            root = %root.display(),
            ttl_secs = ttl.as_secs(),
            adopted = entries.len(),
            "Artifact store opened"
        );

        Ok(Self {
            root,
            ttl,
            entries: Mutex::new(entries),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Location inside the store where an artifact called `name` lives.
    ///
    /// Producers may write there directly and then call [`Self::register`];
    /// until registered the file is not retrievable.
    pub fn path_for(&self, name: &str) -> Result<PathBuf, StoreError> {
        validate_artifact_name(name).map_err(|_| StoreError::InvalidName(name.to_string()))?;
        Ok(self.root.join(name))
    }

    /// Store `content` under `name`, replacing any previous artifact.
    pub async fn put(&self, name: &str, content: &[u8]) -> Result<Artifact, StoreError> {
        let path = self.path_for(name)?;
        let staging = self.root.join(format!(".{name}.partial"));
        if let Err(e) = tokio::fs::write(&staging, content).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }

        let mut entries = self.entries.lock().await;
        if let Err(e) = tokio::fs::rename(&staging, &path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }
        let entry = Entry {
            size_bytes: content.len() as u64,
            last_touched: Instant::now(),
        };
        entries.insert(name.to_string(), entry);
        tracing::debug!(name, size_bytes = entry.size_bytes, "Artifact stored");
        Ok(self.artifact(name, entry))
    }

    /// Make the file already written at [`Self::path_for`] retrievable,
    /// with last-touched set to now.
    pub async fn register(&self, name: &str) -> Result<Artifact, StoreError> {
        let path = self.path_for(name)?;
        let mut entries = self.entries.lock().await;
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Err(StoreError::NotFound(name.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let entry = Entry {
            size_bytes: metadata.len(),
            last_touched: Instant::now(),
        };
        entries.insert(name.to_string(), entry);
        tracing::debug!(name, size_bytes = entry.size_bytes, "Artifact registered");
        Ok(self.artifact(name, entry))
    }

    /// Renew `name` and return an open handle to its content.
    ///
    /// Fails with [`StoreError::NotFound`] when the artifact is unknown or
    /// logically expired, even if no sweep has removed the file yet.
    pub async fn touch_and_open(
        &self,
        name: &str,
    ) -> Result<(Artifact, tokio::fs::File), StoreError> {
        let path = self.path_for(name)?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        let entry = match entries.get(name) {
            Some(entry) if now.saturating_duration_since(entry.last_touched) <= self.ttl => *entry,
            Some(_) => {
                tracing::debug!(name, "Artifact expired, awaiting sweep");
                return Err(StoreError::NotFound(name.to_string()));
            }
            None => return Err(StoreError::NotFound(name.to_string())),
        };

        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(name, "Artifact file missing on disk, dropping entry");
                entries.remove(name);
                return Err(StoreError::NotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let touched = Entry {
            last_touched: now,
            ..entry
        };
        entries.insert(name.to_string(), touched);
        tracing::debug!(name, "Artifact touched");
        Ok((self.artifact(name, touched), file))
    }

    /// Renew `name` and read its whole content.
    pub async fn touch_and_get(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        let (artifact, mut file) = self.touch_and_open(name).await?;
        let mut content = Vec::with_capacity(artifact.size_bytes as usize);
        file.read_to_end(&mut content).await?;
        Ok(content)
    }

    /// Look up an artifact without renewing it. Expired entries are
    /// reported as absent.
    pub async fn get(&self, name: &str) -> Option<Artifact> {
        let entries = self.entries.lock().await;
        let entry = *entries.get(name)?;
        let artifact = self.artifact(name, entry);
        (!artifact.is_expired_at(Instant::now())).then_some(artifact)
    }

    /// Delete the file and index entry for `name`, whether registered or
    /// not. Returns `true` if a file was removed.
    pub async fn remove(&self, name: &str) -> Result<bool, StoreError> {
        let path = self.path_for(name)?;
        let mut entries = self.entries.lock().await;
        entries.remove(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(name, "Artifact removed");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Number of registered artifacts, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Run one sweep cycle: delete every file whose age exceeds the TTL.
    ///
    /// Registered files age from their last touch, untracked files from
    /// their modification time. A failure to delete one file is logged and
    /// counted; only a failure to scan the directory fails the cycle.
    ///
    /// The store lock is held for the directory scan and then once per
    /// deletion, so retrievals interleave with a long sweep.
    pub async fn sweep_expired(&self) -> Result<SweepReport, StoreError> {
        let (scanned, candidates) = self.expired_candidates().await?;
        let mut report = SweepReport {
            scanned,
            ..SweepReport::default()
        };

        for candidate in candidates {
            match self.delete_if_expired(&candidate).await {
                Ok(true) => {
                    tracing::info!(
                        name = %candidate.name,
                        age_secs = candidate.age.as_secs(),
                        "Deleted expired artifact"
                    );
                    report.deleted.push(candidate.name);
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(name = %candidate.name, error = %e, "Failed to delete expired artifact");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Scan the store directory for files past their TTL and drop index
    /// entries whose file has disappeared. Returns the number of files
    /// scanned alongside the candidates.
    async fn expired_candidates(&self) -> Result<(usize, Vec<SweepCandidate>), StoreError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let wall_now = SystemTime::now();
        let mut scanned = 0;
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(dir_entry) = dir.next_entry().await? {
            let name = dir_entry.file_name().to_string_lossy().into_owned();
            let metadata = match dir_entry.metadata().await {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(name = %name, error = %e, "Sweep: cannot stat file, skipping");
                    continue;
                }
            };
            scanned += 1;
            seen.insert(name.clone());

            let (age, tracked) = match entries.get(&name) {
                Some(entry) => (now.saturating_duration_since(entry.last_touched), true),
                None => (file_age(&metadata, wall_now), false),
            };
            if age > self.ttl {
                candidates.push(SweepCandidate {
                    path: dir_entry.path(),
                    name,
                    age,
                    tracked,
                });
            }
        }

        // Entries whose file disappeared behind the store's back.
        entries.retain(|name, _| seen.contains(name));

        Ok((scanned, candidates))
    }

    /// Delete `candidate` unless it was renewed, registered or removed
    /// since the scan. Returns `true` if the file was deleted.
    async fn delete_if_expired(&self, candidate: &SweepCandidate) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        let still_expired = match entries.get(&candidate.name) {
            Some(entry) => Instant::now().saturating_duration_since(entry.last_touched) > self.ttl,
            None => !candidate.tracked,
        };
        if !still_expired {
            return Ok(false);
        }

        match tokio::fs::remove_file(&candidate.path).await {
            Ok(()) => {
                entries.remove(&candidate.name);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                entries.remove(&candidate.name);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn artifact(&self, name: &str, entry: Entry) -> Artifact {
        Artifact {
            name: name.to_string(),
            path: self.root.join(name),
            size_bytes: entry.size_bytes,
            last_touched: entry.last_touched,
            ttl: self.ttl,
        }
    }
}

fn file_age(metadata: &std::fs::Metadata, wall_now: SystemTime) -> Duration {
    metadata
        .modified()
        .ok()
        .and_then(|mtime| wall_now.duration_since(mtime).ok())
        .unwrap_or_default()
}

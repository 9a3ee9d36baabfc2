//! Staging area for completed downloads awaiting retrieval
//!
//! Layout:
//! - `<dir>/<identifier>.<ext>`: completed, registered files
//! - `<dir>/.incoming/`: transfers in progress
//!
//! Nothing here survives a restart: [`StagingArea::open`] removes staged
//! files and `.incoming/` left by a previous run, which also clears
//! half-written transfers from a crash. Anything else in the directory is
//! left alone.

mod sweeper;

pub use sweeper::{SweepPolicy, run_sweeper};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::session::ConversationId;

const INCOMING_DIR: &str = ".incoming";

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("staged file is gone")]
    Gone,

    #[error("staging area unavailable: {0}")]
    Unavailable(#[from] io::Error),
}

/// Failure of [`StagingArea::stage`]: either the caller's transfer or the
/// staging area itself
#[derive(Debug, Error)]
pub enum StageError<E> {
    #[error("transfer failed: {0}")]
    Fetch(E),

    #[error(transparent)]
    Staging(#[from] StagingError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagedFile {
    pub identifier: String,
    pub owner: ConversationId,
    #[serde(skip)]
    pub path: PathBuf,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

impl StagedFile {
    fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.created_at)
            .to_std()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgePolicy {
    /// Everything staged for one conversation
    Owner(ConversationId),
    /// Files at least this old
    OlderThan(Duration),
    /// Oldest files first until the total size fits
    OverBudget(u64),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeStats {
    pub files_removed: u64,
    pub bytes_freed: u64,
}

#[derive(Debug)]
pub struct StagingArea {
    root: PathBuf,
    incoming: PathBuf,
    extension: String,
    files: RwLock<HashMap<String, StagedFile>>,
    /// Identifiers with a transfer in flight
    active: Mutex<HashSet<String>>,
}

impl StagingArea {
    /// Create the staging directory and clear what a previous run left in it.
    ///
    /// The root is made absolute so paths in logs and backend output never
    /// depend on the working directory.
    pub async fn open(root: impl Into<PathBuf>, extension: impl Into<String>) -> Result<Self, StagingError> {
        let root = std::path::absolute(root.into())?;
        fs::create_dir_all(&root).await?;

        let incoming = root.join(INCOMING_DIR);
        let mut cleared = 0usize;
        let mut entries = fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let result = if path == incoming {
                fs::remove_dir_all(&path).await
            } else if entry.file_type().await?.is_file()
                && is_staged_name(&entry.file_name().to_string_lossy())
            {
                fs::remove_file(&path).await
            } else {
                continue;
            };
            match result {
                Ok(()) => cleared += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to clear leftover entry"),
            }
        }

        fs::create_dir_all(&incoming).await?;

        info!(root = %root.display(), cleared, "Staging area ready");

        Ok(Self {
            root,
            incoming,
            extension: extension.into(),
            files: RwLock::new(HashMap::new()),
            active: Mutex::new(HashSet::new()),
        })
    }

    /// Fresh collision-resistant identifier (UUIDv7, simple hex form)
    pub fn new_identifier() -> String {
        Uuid::now_v7().simple().to_string()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run `fetch` against a private incoming path and register the result.
    ///
    /// The file only becomes resolvable once `fetch` succeeds and the file is
    /// moved into place. On failure every incoming file for `identifier` is
    /// removed.
    pub async fn stage<F, Fut, E>(
        &self,
        owner: ConversationId,
        identifier: &str,
        fetch: F,
    ) -> Result<StagedFile, StageError<E>>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        fs::create_dir_all(&self.incoming)
            .await
            .map_err(StagingError::from)?;

        let mut guard = TransferGuard::start(self, identifier);

        let file_name = format!("{identifier}.{}", self.extension);
        let incoming_path = self.incoming.join(&file_name);

        if let Err(e) = fetch(incoming_path.clone()).await {
            self.discard_incoming(identifier).await;
            guard.settle();
            return Err(StageError::Fetch(e));
        }

        let final_path = self.root.join(&file_name);
        let placed = async {
            let meta = fs::metadata(&incoming_path).await?;
            fs::rename(&incoming_path, &final_path).await?;
            Ok::<_, io::Error>(meta.len())
        }
        .await;

        let size = match placed {
            Ok(size) => size,
            Err(e) => {
                warn!(identifier, error = %e, "Failed to move transfer into place");
                self.discard_incoming(identifier).await;
                guard.settle();
                return Err(StagingError::Unavailable(e).into());
            }
        };
        self.discard_incoming(identifier).await;
        guard.settle();

        let staged = StagedFile {
            identifier: identifier.to_string(),
            owner,
            path: final_path,
            size,
            created_at: Utc::now(),
        };
        self.files
            .write()
            .await
            .insert(staged.identifier.clone(), staged.clone());

        info!(identifier, conversation = %owner, size, "File staged");
        Ok(staged)
    }

    /// Remove incoming files belonging to `identifier` (partials, per-stream fragments).
    pub async fn discard_incoming(&self, identifier: &str) -> usize {
        let mut removed = 0;
        let mut entries = match fs::read_dir(&self.incoming).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!(error = %e, "Failed to list incoming transfers");
                return 0;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            if !entry.file_name().to_string_lossy().starts_with(identifier) {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(identifier, error = %e, "Failed to remove partial transfer"),
            }
        }

        if removed > 0 {
            debug!(identifier, removed, "Discarded partial transfer");
        }
        removed
    }

    /// Remove incoming files that belong to no running transfer.
    ///
    /// Catches output a killed backend process wrote after its transfer was
    /// abandoned.
    pub async fn discard_orphans(&self) -> usize {
        let mut removed = 0;
        let mut entries = match fs::read_dir(&self.incoming).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!(error = %e, "Failed to list incoming transfers");
                return 0;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let identifier = name.split('.').next().unwrap_or_default();
            // Registered before the transfer writes anything, released after cleanup
            if self.active_transfers().contains(identifier) {
                continue;
            }
            let path = entry.path();
            let result = match entry.file_type().await {
                Ok(kind) if kind.is_dir() => fs::remove_dir_all(&path).await,
                _ => fs::remove_file(&path).await,
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove orphaned transfer"),
            }
        }

        if removed > 0 {
            info!(removed, "Removed orphaned incoming files");
        }
        removed
    }

    fn active_transfers(&self) -> MutexGuard<'_, HashSet<String>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a staged file. Unknown, purged and vanished files are all [`StagingError::Gone`].
    pub async fn resolve(&self, identifier: &str) -> Result<StagedFile, StagingError> {
        let staged = self
            .files
            .read()
            .await
            .get(identifier)
            .cloned()
            .ok_or(StagingError::Gone)?;

        match fs::metadata(&staged.path).await {
            Ok(meta) if meta.is_file() => Ok(staged),
            _ => {
                warn!(identifier, "Staged file vanished from disk");
                self.files.write().await.remove(identifier);
                Err(StagingError::Gone)
            }
        }
    }

    /// Unregister and delete the files selected by `policy`.
    ///
    /// Files leave the index before they leave the disk, so a concurrent
    /// `resolve` sees `Gone` rather than a half-deleted file.
    pub async fn purge(&self, policy: PurgePolicy) -> PurgeStats {
        let victims = {
            let mut files = self.files.write().await;
            let selected = select_victims(files.values(), policy, Utc::now());
            selected
                .into_iter()
                .filter_map(|id| files.remove(&id))
                .collect::<Vec<_>>()
        };

        let mut stats = PurgeStats::default();
        for staged in victims {
            match fs::remove_file(&staged.path).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(identifier = %staged.identifier, error = %e, "Failed to delete staged file");
                }
            }
            stats.files_removed += 1;
            stats.bytes_freed += staged.size;
        }

        if stats.files_removed > 0 {
            info!(
                ?policy,
                files_removed = stats.files_removed,
                bytes_freed = stats.bytes_freed,
                "Purge complete"
            );
        }
        stats
    }

    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.files.read().await.is_empty()
    }

    pub async fn total_bytes(&self) -> u64 {
        self.files.read().await.values().map(|f| f.size).sum()
    }

    /// Staging directory still exists and is a directory
    pub async fn is_healthy(&self) -> bool {
        fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }
}

/// Marks a transfer as in flight. Dropped before [`TransferGuard::settle`]
/// (timeout, cancellation), it removes the transfer's incoming files itself.
struct TransferGuard<'a> {
    area: &'a StagingArea,
    identifier: &'a str,
    settled: bool,
}

impl<'a> TransferGuard<'a> {
    fn start(area: &'a StagingArea, identifier: &'a str) -> Self {
        area.active_transfers().insert(identifier.to_string());
        Self {
            area,
            identifier,
            settled: false,
        }
    }

    fn settle(&mut self) {
        self.settled = true;
    }
}

impl Drop for TransferGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let removed = remove_incoming_blocking(&self.area.incoming, self.identifier);
            warn!(identifier = self.identifier, removed, "Transfer abandoned");
        }
        self.area.active_transfers().remove(self.identifier);
    }
}

/// Synchronous variant of [`StagingArea::discard_incoming`] for use in `Drop`
fn remove_incoming_blocking(incoming: &Path, identifier: &str) -> usize {
    let Ok(entries) = std::fs::read_dir(incoming) else {
        return 0;
    };
    entries
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().starts_with(identifier))
        .filter(|e| std::fs::remove_file(e.path()).is_ok())
        .count()
}

/// `<32 hex digits>.<ext>`, the only file names the staging area creates
fn is_staged_name(name: &str) -> bool {
    match name.split_once('.') {
        Some((stem, ext)) => {
            stem.len() == 32
                && stem.chars().all(|c| c.is_ascii_hexdigit())
                && !ext.is_empty()
                && !ext.contains('.')
        }
        None => false,
    }
}

fn select_victims<'a>(
    files: impl Iterator<Item = &'a StagedFile>,
    policy: PurgePolicy,
    now: DateTime<Utc>,
) -> Vec<String> {
    match policy {
        PurgePolicy::Owner(owner) => files
            .filter(|f| f.owner == owner)
            .map(|f| f.identifier.clone())
            .collect(),
        PurgePolicy::OlderThan(max_age) => files
            .filter(|f| f.age(now) >= max_age)
            .map(|f| f.identifier.clone())
            .collect(),
        PurgePolicy::OverBudget(budget) => {
            let mut by_age: Vec<&StagedFile> = files.collect();
            by_age.sort_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.identifier.cmp(&b.identifier))
            });

            let mut total: u64 = by_age.iter().map(|f| f.size).sum();
            let mut victims = Vec::new();
            for file in by_age {
                if total <= budget {
                    break;
                }
                total -= file.size;
                victims.push(file.identifier.clone());
            }
            victims
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ALICE: ConversationId = ConversationId { chat: 1, user: 1 };
    const BOB: ConversationId = ConversationId { chat: 2, user: 2 };

    async fn area(dir: &TempDir) -> StagingArea {
        StagingArea::open(dir.path().join("static"), "mp4").await.unwrap()
    }

    async fn stage_bytes(area: &StagingArea, owner: ConversationId, bytes: &[u8]) -> StagedFile {
        let id = StagingArea::new_identifier();
        let bytes = bytes.to_vec();
        area.stage(owner, &id, |path| async move {
            fs::write(path, bytes).await.map_err(|e| e.to_string())
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_open_clears_leftovers() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("static");
        let old = format!("{}.mp4", StagingArea::new_identifier());
        std::fs::create_dir_all(root.join(".incoming")).unwrap();
        std::fs::write(root.join(&old), b"old").unwrap();
        std::fs::write(root.join(".incoming").join("half.mp4.part"), b"half").unwrap();

        let area = StagingArea::open(&root, "mp4").await.unwrap();

        assert!(!root.join(&old).exists());
        assert!(!root.join(".incoming").join("half.mp4.part").exists());
        assert!(root.join(".incoming").is_dir());
        assert!(area.is_empty().await);
        assert!(area.is_healthy().await);
        assert!(area.root().is_absolute());
    }

    #[tokio::test]
    async fn test_open_leaves_foreign_files_alone() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("config")).unwrap();
        std::fs::write(root.join("config").join("reelbox.toml"), b"[formats]").unwrap();
        std::fs::write(root.join("Cargo.toml"), b"[package]").unwrap();
        std::fs::write(root.join("notes.mp4"), b"mine").unwrap();
        std::fs::write(root.join("0123456789abcdef0123456789abcdef"), b"no extension").unwrap();

        StagingArea::open(root, "mp4").await.unwrap();

        assert!(root.join("config").join("reelbox.toml").exists());
        assert!(root.join("Cargo.toml").exists());
        assert!(root.join("notes.mp4").exists());
        assert!(root.join("0123456789abcdef0123456789abcdef").exists());
    }

    #[test]
    fn test_staged_name_pattern() {
        assert!(is_staged_name(&format!("{}.mp4", StagingArea::new_identifier())));
        assert!(is_staged_name("0123456789abcdef0123456789ABCDEF.webm"));
        assert!(!is_staged_name("0123456789abcdef0123456789abcdef"));
        assert!(!is_staged_name("0123456789abcdef0123456789abcdef.mp4.part"));
        assert!(!is_staged_name("Cargo.toml"));
        assert!(!is_staged_name(".incoming"));
    }

    #[tokio::test]
    async fn test_abandoned_transfer_removes_partials() {
        let dir = TempDir::new().unwrap();
        let area = area(&dir).await;
        let id = StagingArea::new_identifier();

        let stalled = area.stage(ALICE, &id, |path| async move {
            let mut partial = path.into_os_string();
            partial.push(".part");
            fs::write(&partial, b"half").await.unwrap();
            std::future::pending::<Result<(), String>>().await
        });
        let result = tokio::time::timeout(Duration::from_millis(50), stalled).await;

        assert!(result.is_err());
        let leftovers = std::fs::read_dir(area.root().join(INCOMING_DIR)).unwrap().count();
        assert_eq!(leftovers, 0);
        assert!(area.active_transfers().is_empty());
        assert!(matches!(area.resolve(&id).await, Err(StagingError::Gone)));
    }

    #[tokio::test]
    async fn test_discard_orphans_spares_running_transfers() {
        let dir = TempDir::new().unwrap();
        let area = std::sync::Arc::new(area(&dir).await);
        let incoming = area.root().join(INCOMING_DIR);
        let id = StagingArea::new_identifier();
        let (written_tx, written_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let running = {
            let area = area.clone();
            let id = id.clone();
            tokio::spawn(async move {
                area.stage(ALICE, &id, |path| async move {
                    fs::write(&path, b"video").await.map_err(|e| e.to_string())?;
                    let _ = written_tx.send(());
                    release_rx.await.map_err(|e| e.to_string())
                })
                .await
            })
        };
        written_rx.await.unwrap();
        std::fs::write(incoming.join("0190e8a5c0de7000800000000000dead.mp4.part"), b"x").unwrap();

        assert_eq!(area.discard_orphans().await, 1);
        assert!(incoming.join(format!("{id}.mp4")).exists());

        release_tx.send(()).unwrap();
        let staged = running.await.unwrap().unwrap();
        assert_eq!(std::fs::read(&staged.path).unwrap(), b"video");
        assert_eq!(area.discard_orphans().await, 0);
    }

    #[tokio::test]
    async fn test_stage_and_resolve() {
        let dir = TempDir::new().unwrap();
        let area = area(&dir).await;

        let staged = stage_bytes(&area, ALICE, b"video").await;

        assert_eq!(staged.size, 5);
        assert_eq!(staged.path, area.root().join(format!("{}.mp4", staged.identifier)));
        assert_eq!(std::fs::read(&staged.path).unwrap(), b"video");

        let resolved = area.resolve(&staged.identifier).await.unwrap();
        assert_eq!(resolved, staged);
        assert_eq!(area.total_bytes().await, 5);
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let area = area(&dir).await;
        let id = StagingArea::new_identifier();

        let result = area
            .stage(ALICE, &id, |path| async move {
                let mut partial = path.into_os_string();
                partial.push(".part");
                fs::write(&partial, b"half").await.unwrap();
                Err::<(), _>("connection reset")
            })
            .await;

        assert!(matches!(result, Err(StageError::Fetch("connection reset"))));
        assert!(matches!(area.resolve(&id).await, Err(StagingError::Gone)));
        let leftovers = std::fs::read_dir(area.root().join(INCOMING_DIR)).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_fetch_without_output_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let area = area(&dir).await;
        let id = StagingArea::new_identifier();

        let result = area
            .stage(ALICE, &id, |_| async { Ok::<(), String>(()) })
            .await;

        assert!(matches!(
            result,
            Err(StageError::Staging(StagingError::Unavailable(_)))
        ));
        assert!(area.is_empty().await);
    }

    #[tokio::test]
    async fn test_unknown_identifier_is_gone() {
        let dir = TempDir::new().unwrap();
        let area = area(&dir).await;

        assert!(matches!(area.resolve("nope").await, Err(StagingError::Gone)));
        assert!(matches!(
            area.resolve("../../etc/passwd").await,
            Err(StagingError::Gone)
        ));
    }

    #[tokio::test]
    async fn test_purge_owner_only_touches_that_conversation() {
        let dir = TempDir::new().unwrap();
        let area = area(&dir).await;

        let a1 = stage_bytes(&area, ALICE, b"aa").await;
        let a2 = stage_bytes(&area, ALICE, b"aaa").await;
        let b1 = stage_bytes(&area, BOB, b"b").await;

        let stats = area.purge(PurgePolicy::Owner(ALICE)).await;

        assert_eq!(stats, PurgeStats { files_removed: 2, bytes_freed: 5 });
        assert!(matches!(area.resolve(&a1.identifier).await, Err(StagingError::Gone)));
        assert!(matches!(area.resolve(&a2.identifier).await, Err(StagingError::Gone)));
        assert!(!a1.path.exists());
        assert!(area.resolve(&b1.identifier).await.is_ok());
    }

    #[tokio::test]
    async fn test_purge_older_than() {
        let dir = TempDir::new().unwrap();
        let area = area(&dir).await;
        let staged = stage_bytes(&area, ALICE, b"x").await;

        let stats = area.purge(PurgePolicy::OlderThan(Duration::from_secs(3600))).await;
        assert_eq!(stats.files_removed, 0);

        let stats = area.purge(PurgePolicy::OlderThan(Duration::ZERO)).await;
        assert_eq!(stats.files_removed, 1);
        assert!(matches!(area.resolve(&staged.identifier).await, Err(StagingError::Gone)));
    }

    #[tokio::test]
    async fn test_purge_over_budget_evicts_oldest() {
        let dir = TempDir::new().unwrap();
        let area = area(&dir).await;

        let oldest = stage_bytes(&area, ALICE, &[0; 10]).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let middle = stage_bytes(&area, BOB, &[0; 10]).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let newest = stage_bytes(&area, ALICE, &[0; 10]).await;

        let stats = area.purge(PurgePolicy::OverBudget(20)).await;

        assert_eq!(stats, PurgeStats { files_removed: 1, bytes_freed: 10 });
        assert!(area.resolve(&oldest.identifier).await.is_err());
        assert!(area.resolve(&middle.identifier).await.is_ok());
        assert!(area.resolve(&newest.identifier).await.is_ok());
    }

    #[tokio::test]
    async fn test_vanished_file_is_gone() {
        let dir = TempDir::new().unwrap();
        let area = area(&dir).await;
        let staged = stage_bytes(&area, ALICE, b"x").await;

        std::fs::remove_file(&staged.path).unwrap();

        assert!(matches!(area.resolve(&staged.identifier).await, Err(StagingError::Gone)));
        assert!(area.is_empty().await);
    }

    #[test]
    fn test_identifiers_are_unique_hex() {
        let a = StagingArea::new_identifier();
        let b = StagingArea::new_identifier();

        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}

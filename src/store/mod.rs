//! Durable, directory-backed store of update records and their archives.
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/<id>/info.json   serialized UpdateRecord
//! <root>/<id>/<id>.zip    archive, removed once the update is applied
//! ```
//!
//! The in-memory index is rebuilt from disk by [`UpdateStore::load`]. The
//! presence of an archive file, not the persisted flag, decides whether an
//! unapplied record counts as retrieved.

mod archive;
mod hash;

pub use archive::ArchiveFile;
pub use hash::{compute_hash, hash_bytes, hashes_match};

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use crate::error::{OtaError, OtaResult};
use crate::models::{archive_file_name, UpdateRecord};

/// Name of the store directory under the agent's data root.
pub const STORE_DIR_NAME: &str = "update-store";

/// Metadata file name inside each record directory.
const METADATA_FILE: &str = "info.json";

/// Repository of known updates, persisted one directory per record.
#[derive(Debug)]
pub struct UpdateStore {
    root: PathBuf,
    records: RwLock<BTreeMap<String, UpdateRecord>>,
}

impl UpdateStore {
    /// Open the store at `root`, creating the directory if needed, and
    /// rebuild the index from disk.
    ///
    /// Subdirectories without readable metadata are skipped and left in
    /// place for manual recovery.
    pub fn load(root: impl Into<PathBuf>) -> OtaResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| OtaError::io("create store directory", &root, e))?;

        let store = Self {
            root,
            records: RwLock::new(BTreeMap::new()),
        };

        let entries =
            fs::read_dir(&store.root).map_err(|e| OtaError::io("scan store", &store.root, e))?;
        let mut index = BTreeMap::new();

        for entry in entries {
            let entry = entry.map_err(|e| OtaError::io("scan store", &store.root, e))?;
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }

            let dir_name = entry.file_name().to_string_lossy().to_string();
            match store.load_record(&dir, &dir_name) {
                Ok(Some(record)) => {
                    index.insert(record.id.clone(), record);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        "Skipping corrupt update directory {}: {}",
                        dir.display(),
                        e
                    );
                }
            }
        }

        info!(
            "Loaded {} update record(s) from {}",
            index.len(),
            store.root.display()
        );
        *store.write_index() = index;
        Ok(store)
    }

    /// Read one record directory and reconcile its flags with the archive on disk.
    fn load_record(&self, dir: &Path, dir_name: &str) -> OtaResult<Option<UpdateRecord>> {
        let metadata_path = dir.join(METADATA_FILE);
        if !metadata_path.is_file() {
            warn!(
                "Update directory {} has no {}, skipping",
                dir.display(),
                METADATA_FILE
            );
            return Ok(None);
        }

        let mut record = read_metadata(&metadata_path)?;
        if record.id != dir_name {
            warn!(
                "Update directory {} holds record '{}', skipping",
                dir.display(),
                record.id
            );
            return Ok(None);
        }

        let archive = dir.join(record.archive_file_name());
        let archive_exists = archive.is_file();

        if record.applied {
            if archive_exists {
                info!(
                    "Removing leftover archive of applied update '{}'",
                    record.id
                );
                fs::remove_file(&archive)
                    .map_err(|e| OtaError::io("remove applied archive", &archive, e))?;
            }
        } else if archive_exists && !record.retrieved {
            debug!(
                "Archive present for '{}', marking retrieved",
                record.id
            );
            record.retrieved = true;
            write_metadata(&metadata_path, &record)?;
        } else if !archive_exists && record.retrieved {
            warn!(
                "Archive of '{}' is missing, clearing retrieved flag",
                record.id
            );
            record.retrieved = false;
            write_metadata(&metadata_path, &record)?;
        }

        Ok(Some(record))
    }

    /// Directory the store lives in.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read_index(&self) -> RwLockReadGuard<'_, BTreeMap<String, UpdateRecord>> {
        self.records.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, BTreeMap<String, UpdateRecord>> {
        self.records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    fn metadata_path(&self, id: &str) -> PathBuf {
        self.record_dir(id).join(METADATA_FILE)
    }

    fn archive_location(&self, id: &str) -> PathBuf {
        self.record_dir(id).join(archive_file_name(id))
    }

    /// Add a newly announced update.
    ///
    /// The flags are reset before persisting. An id that is already known
    /// fails with [`OtaError::DuplicateRecord`] and leaves the store untouched.
    /// A directory skipped by [`load`](Self::load) is never written into;
    /// adding its id fails with [`OtaError::InvalidRecord`].
    pub fn add(&self, mut record: UpdateRecord) -> OtaResult<UpdateRecord> {
        validate_id(&record.id)?;

        let mut index = self.write_index();
        if index.contains_key(&record.id) {
            return Err(OtaError::DuplicateRecord { id: record.id });
        }

        let dir = self.record_dir(&record.id);
        if dir.exists() {
            warn!(
                "Update directory {} exists but was not loaded, refusing to overwrite it",
                dir.display()
            );
            return Err(OtaError::InvalidRecord {
                id: record.id,
                reason: format!(
                    "unreadable directory {} is in the way; recover or remove it",
                    dir.display()
                ),
            });
        }

        record.retrieved = false;
        record.applied = false;

        fs::create_dir_all(&dir).map_err(|e| OtaError::io("create record directory", &dir, e))?;
        write_metadata(&self.metadata_path(&record.id), &record)?;

        debug!("Added update record '{}' ({})", record.id, record.version);
        index.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    /// Look up a record by id.
    pub fn get(&self, id: &str) -> Option<UpdateRecord> {
        self.read_index().get(id).cloned()
    }

    /// Whether a record with this id is known.
    pub fn contains(&self, id: &str) -> bool {
        self.read_index().contains_key(id)
    }

    /// Snapshot of all records, oldest publication first.
    pub fn records(&self) -> Vec<UpdateRecord> {
        let mut records: Vec<UpdateRecord> = self.read_index().values().cloned().collect();
        records.sort_by(|a, b| {
            a.published_on
                .cmp(&b.published_on)
                .then_with(|| a.id.cmp(&b.id))
        });
        records
    }

    /// Number of known records.
    pub fn len(&self) -> usize {
        self.read_index().len()
    }

    /// Whether the store has no records.
    pub fn is_empty(&self) -> bool {
        self.read_index().is_empty()
    }

    /// Open the record's archive for writing.
    ///
    /// An existing partial file is opened in append mode so a download can
    /// resume; otherwise a new empty file is created.
    pub fn open_archive_for_write(&self, id: &str) -> OtaResult<ArchiveFile> {
        if !self.contains(id) {
            return Err(OtaError::NotFound { id: id.to_string() });
        }

        let path = self.archive_location(id);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| OtaError::io("open archive", &path, e))?;
        let resume_from = file
            .metadata()
            .map_err(|e| OtaError::io("stat archive", &path, e))?
            .len();

        if resume_from > 0 {
            debug!("Resuming archive of '{}' at byte {}", id, resume_from);
        }
        Ok(ArchiveFile::new(file, path, resume_from))
    }

    /// Path of the record's archive, or [`OtaError::NotFound`] if there is none.
    pub fn archive_path(&self, id: &str) -> OtaResult<PathBuf> {
        let path = self.archive_location(id);
        if self.contains(id) && path.is_file() {
            Ok(path)
        } else {
            Err(OtaError::NotFound { id: id.to_string() })
        }
    }

    /// Delete the record's archive if present. The record itself is kept.
    pub fn discard_archive(&self, id: &str) -> OtaResult<()> {
        let mut index = self.write_index();
        let path = self.archive_location(id);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(OtaError::io("remove archive", &path, e)),
        }
        if let Some(record) = index.get_mut(id) {
            if record.retrieved {
                record.retrieved = false;
                write_metadata(&self.metadata_path(id), record)?;
            }
        }
        Ok(())
    }

    /// Hash a file the way the store reports archive hashes.
    pub fn compute_hash(path: &Path) -> OtaResult<String> {
        compute_hash(path)
    }

    /// Flag the record as downloaded and persist it.
    pub fn mark_retrieved(&self, id: &str) -> OtaResult<UpdateRecord> {
        let mut index = self.write_index();
        let record = index
            .get_mut(id)
            .ok_or_else(|| OtaError::NotFound { id: id.to_string() })?;

        record.retrieved = true;
        write_metadata(&self.metadata_path(id), record)?;
        Ok(record.clone())
    }

    /// Flag the record as applied, persist it and reclaim the archive.
    pub fn mark_applied(&self, id: &str) -> OtaResult<UpdateRecord> {
        let mut index = self.write_index();
        let record = index
            .get_mut(id)
            .ok_or_else(|| OtaError::NotFound { id: id.to_string() })?;

        record.retrieved = true;
        record.applied = true;
        write_metadata(&self.metadata_path(id), record)?;

        let archive = self.archive_location(id);
        match fs::remove_file(&archive) {
            Ok(()) => debug!("Removed archive of applied update '{}'", id),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            // The flag is persisted; the next load removes the stray archive.
            Err(e) => warn!("Failed to remove archive {}: {}", archive.display(), e),
        }
        Ok(record.clone())
    }

    /// Remove every record directory and empty the index.
    pub fn clear(&self) -> OtaResult<()> {
        let mut index = self.write_index();
        let entries = fs::read_dir(&self.root).map_err(|e| OtaError::io("scan store", &self.root, e))?;

        for entry in entries {
            let entry = entry.map_err(|e| OtaError::io("scan store", &self.root, e))?;
            let path = entry.path();
            if path.is_dir() {
                fs::remove_dir_all(&path)
                    .map_err(|e| OtaError::io("remove record directory", &path, e))?;
            }
        }

        info!("Cleared {} update record(s)", index.len());
        index.clear();
        Ok(())
    }
}

/// Record ids become directory names, so they must be a single plain path component.
fn validate_id(id: &str) -> OtaResult<()> {
    let reason = if id.trim().is_empty() {
        Some("id is empty")
    } else if id == "." || id == ".." {
        Some("id is a relative path component")
    } else if id.contains(['/', '\\', '\0']) {
        Some("id contains a path separator")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(OtaError::InvalidRecord {
            id: id.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

fn read_metadata(path: &Path) -> OtaResult<UpdateRecord> {
    let file = File::open(path).map_err(|e| OtaError::io("read metadata", path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| OtaError::Metadata {
        path: path.to_path_buf(),
        source,
    })
}

/// Write metadata to a temporary file and rename it into place.
fn write_metadata(path: &Path, record: &UpdateRecord) -> OtaResult<()> {
    let tmp_path = path.with_extension("json.tmp");
    let file = File::create(&tmp_path).map_err(|e| OtaError::io("write metadata", &tmp_path, e))?;

    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, record).map_err(|source| OtaError::Metadata {
        path: tmp_path.clone(),
        source,
    })?;
    writer
        .flush()
        .map_err(|e| OtaError::io("write metadata", &tmp_path, e))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| OtaError::io("sync metadata", &tmp_path, e))?;
    drop(writer);

    fs::rename(&tmp_path, path).map_err(|e| OtaError::io("replace metadata", path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn record(id: &str) -> UpdateRecord {
        UpdateRecord::new(
            id,
            "1.0.0",
            format!("https://updates.example.com/{}.zip", id),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )
        .with_hash("ABC123")
    }

    fn write_archive(store: &UpdateStore, id: &str, data: &[u8]) {
        let mut archive = store.open_archive_for_write(id).unwrap();
        archive.write_all(data).unwrap();
        archive.flush().unwrap();
    }

    #[test]
    fn test_load_creates_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("nested").join(STORE_DIR_NAME);
        let store = UpdateStore::load(&root).unwrap();
        assert!(root.is_dir());
        assert!(store.is_empty());
    }

    #[test]
    fn test_add_persists_and_resets_flags() {
        let temp_dir = TempDir::new().unwrap();
        let store = UpdateStore::load(temp_dir.path()).unwrap();

        let mut incoming = record("u1");
        incoming.retrieved = true;
        incoming.applied = true;
        let added = store.add(incoming).unwrap();

        assert!(!added.retrieved);
        assert!(!added.applied);
        assert!(temp_dir.path().join("u1").join(METADATA_FILE).is_file());

        let reloaded = UpdateStore::load(temp_dir.path()).unwrap();
        assert_eq!(reloaded.get("u1"), Some(added));
    }

    #[test]
    fn test_add_duplicate_leaves_store_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        let store = UpdateStore::load(temp_dir.path()).unwrap();
        store.add(record("u1")).unwrap();

        let mut other = record("u1");
        other.version = "9.9.9".to_string();
        let result = store.add(other);

        assert!(matches!(result, Err(OtaError::DuplicateRecord { .. })));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("u1").unwrap().version, "1.0.0");
    }

    #[test]
    fn test_add_rejects_path_like_ids() {
        let temp_dir = TempDir::new().unwrap();
        let store = UpdateStore::load(temp_dir.path()).unwrap();

        for id in ["", "..", "a/b", "a\\b"] {
            let result = store.add(record(id));
            assert!(
                matches!(result, Err(OtaError::InvalidRecord { .. })),
                "id {:?} should be rejected",
                id
            );
        }
        assert!(store.is_empty());
    }

    #[test]
    fn test_open_archive_for_unknown_id() {
        let temp_dir = TempDir::new().unwrap();
        let store = UpdateStore::load(temp_dir.path()).unwrap();
        assert!(matches!(
            store.open_archive_for_write("nope"),
            Err(OtaError::NotFound { .. })
        ));
    }

    #[test]
    fn test_resume_produces_identical_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = UpdateStore::load(temp_dir.path()).unwrap();
        store.add(record("u1")).unwrap();
        store.add(record("u2")).unwrap();

        let payload: Vec<u8> = (0..10_000u32).map(|i| (i * 7 % 256) as u8).collect();

        // One pass
        write_archive(&store, "u1", &payload);

        // Interrupted after 3_333 bytes, then resumed
        write_archive(&store, "u2", &payload[..3_333]);
        let archive = store.open_archive_for_write("u2").unwrap();
        assert_eq!(archive.resume_from(), 3_333);
        drop(archive);
        write_archive(&store, "u2", &payload[3_333..]);

        let one_pass = fs::read(store.archive_path("u1").unwrap()).unwrap();
        let resumed = fs::read(store.archive_path("u2").unwrap()).unwrap();
        assert_eq!(one_pass, payload);
        assert_eq!(resumed, one_pass);
    }

    #[test]
    fn test_truncate_restarts_archive() {
        let temp_dir = TempDir::new().unwrap();
        let store = UpdateStore::load(temp_dir.path()).unwrap();
        store.add(record("u1")).unwrap();
        write_archive(&store, "u1", b"stale partial");

        let mut archive = store.open_archive_for_write("u1").unwrap();
        assert_eq!(archive.resume_from(), 13);
        archive.truncate().unwrap();
        assert_eq!(archive.resume_from(), 0);
        archive.write_all(b"fresh").unwrap();
        drop(archive);

        assert_eq!(fs::read(store.archive_path("u1").unwrap()).unwrap(), b"fresh");
    }

    #[test]
    fn test_archive_path_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let store = UpdateStore::load(temp_dir.path()).unwrap();
        store.add(record("u1")).unwrap();
        assert!(matches!(
            store.archive_path("u1"),
            Err(OtaError::NotFound { .. })
        ));
        assert!(matches!(
            store.archive_path("unknown"),
            Err(OtaError::NotFound { .. })
        ));
    }

    #[test]
    fn test_reload_marks_retrieved_when_archive_present() {
        let temp_dir = TempDir::new().unwrap();
        let store = UpdateStore::load(temp_dir.path()).unwrap();
        store.add(record("u1")).unwrap();
        write_archive(&store, "u1", &[0u8; 100]);
        assert!(!store.get("u1").unwrap().retrieved);
        drop(store);

        let reloaded = UpdateStore::load(temp_dir.path()).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.get("u1").unwrap().retrieved);

        // The corrected flag is persisted too
        let on_disk = read_metadata(&temp_dir.path().join("u1").join(METADATA_FILE)).unwrap();
        assert!(on_disk.retrieved);
    }

    #[test]
    fn test_reload_clears_retrieved_when_archive_missing() {
        let temp_dir = TempDir::new().unwrap();
        let store = UpdateStore::load(temp_dir.path()).unwrap();
        store.add(record("u1")).unwrap();
        write_archive(&store, "u1", b"data");
        store.mark_retrieved("u1").unwrap();
        fs::remove_file(store.archive_path("u1").unwrap()).unwrap();
        drop(store);

        let reloaded = UpdateStore::load(temp_dir.path()).unwrap();
        assert!(!reloaded.get("u1").unwrap().retrieved);
    }

    #[test]
    fn test_reload_removes_stray_archive_of_applied_record() {
        let temp_dir = TempDir::new().unwrap();
        let store = UpdateStore::load(temp_dir.path()).unwrap();
        store.add(record("u1")).unwrap();

        // Simulate a crash between persisting `applied` and deleting the archive
        let mut applied = store.get("u1").unwrap();
        applied.retrieved = true;
        applied.applied = true;
        write_metadata(&temp_dir.path().join("u1").join(METADATA_FILE), &applied).unwrap();
        fs::write(temp_dir.path().join("u1").join("u1.zip"), b"stale").unwrap();
        drop(store);

        let reloaded = UpdateStore::load(temp_dir.path()).unwrap();
        assert!(reloaded.get("u1").unwrap().applied);
        assert!(!temp_dir.path().join("u1").join("u1.zip").exists());
    }

    #[test]
    fn test_reload_skips_directory_without_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let store = UpdateStore::load(temp_dir.path()).unwrap();
        store.add(record("good")).unwrap();
        fs::create_dir_all(temp_dir.path().join("orphan")).unwrap();
        fs::write(temp_dir.path().join("orphan").join("orphan.zip"), b"x").unwrap();
        fs::create_dir_all(temp_dir.path().join("broken")).unwrap();
        fs::write(temp_dir.path().join("broken").join(METADATA_FILE), b"{not json").unwrap();
        drop(store);

        let reloaded = UpdateStore::load(temp_dir.path()).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.contains("good"));
        // Corrupt directories are left for manual recovery
        assert!(temp_dir.path().join("orphan").join("orphan.zip").exists());
        assert!(temp_dir.path().join("broken").exists());
    }

    #[test]
    fn test_add_refuses_skipped_directory() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("u1");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(METADATA_FILE), b"{ not json").unwrap();
        fs::write(dir.join("u1.zip"), b"stale").unwrap();

        let store = UpdateStore::load(temp_dir.path()).unwrap();
        assert!(store.is_empty());

        let result = store.add(record("u1"));

        assert!(matches!(result, Err(OtaError::InvalidRecord { .. })));
        assert!(!store.contains("u1"));
        assert!(store.archive_path("u1").is_err());
        assert_eq!(fs::read(dir.join(METADATA_FILE)).unwrap(), b"{ not json");
        assert_eq!(fs::read(dir.join("u1.zip")).unwrap(), b"stale");
    }

    #[test]
    fn test_mark_applied_deletes_archive() {
        let temp_dir = TempDir::new().unwrap();
        let store = UpdateStore::load(temp_dir.path()).unwrap();
        store.add(record("u1")).unwrap();
        write_archive(&store, "u1", &[1u8; 100]);

        let reloaded = UpdateStore::load(temp_dir.path()).unwrap();
        assert!(reloaded.get("u1").unwrap().retrieved);

        let applied = reloaded.mark_applied("u1").unwrap();
        assert!(applied.applied);
        assert!(!temp_dir.path().join("u1").join("u1.zip").exists());

        let again = UpdateStore::load(temp_dir.path()).unwrap();
        let record = again.get("u1").unwrap();
        assert!(record.applied);
        assert!(record.retrieved);
    }

    #[test]
    fn test_mark_unknown_record() {
        let temp_dir = TempDir::new().unwrap();
        let store = UpdateStore::load(temp_dir.path()).unwrap();
        assert!(matches!(
            store.mark_retrieved("x"),
            Err(OtaError::NotFound { .. })
        ));
        assert!(matches!(
            store.mark_applied("x"),
            Err(OtaError::NotFound { .. })
        ));
    }

    #[test]
    fn test_discard_archive_resets_retrieved() {
        let temp_dir = TempDir::new().unwrap();
        let store = UpdateStore::load(temp_dir.path()).unwrap();
        store.add(record("u1")).unwrap();
        write_archive(&store, "u1", b"bad bytes");
        store.mark_retrieved("u1").unwrap();

        store.discard_archive("u1").unwrap();
        assert!(!store.get("u1").unwrap().retrieved);
        assert!(store.archive_path("u1").is_err());
        // Discarding twice is fine
        store.discard_archive("u1").unwrap();
    }

    #[test]
    fn test_clear_removes_everything() {
        let temp_dir = TempDir::new().unwrap();
        let store = UpdateStore::load(temp_dir.path()).unwrap();
        store.add(record("u1")).unwrap();
        store.add(record("u2")).unwrap();
        write_archive(&store, "u2", b"partial");
        fs::create_dir_all(temp_dir.path().join("orphan")).unwrap();

        store.clear().unwrap();
        assert!(store.is_empty());
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);

        // The store is still usable afterwards
        store.add(record("u3")).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_records_ordered_by_publication() {
        let temp_dir = TempDir::new().unwrap();
        let store = UpdateStore::load(temp_dir.path()).unwrap();

        let mut late = record("a-late");
        late.published_on = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let mut early = record("z-early");
        early.published_on = Utc.with_ymd_and_hms(2023, 3, 1, 0, 0, 0).unwrap();
        store.add(late).unwrap();
        store.add(early).unwrap();

        let ids: Vec<String> = store.records().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["z-early", "a-late"]);
    }
}

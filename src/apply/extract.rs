//! Staging directory preparation, archive extraction and payload checks.

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::Path;

use crate::error::{OtaError, OtaResult};

/// Payload directories an update package may carry.
pub const PAYLOAD_DIRS: [&str; 2] = ["app", "os"];

/// Empty `dir`, creating it if it does not exist.
pub(crate) fn reset_dir(dir: &Path) -> OtaResult<()> {
    if !dir.exists() {
        return fs::create_dir_all(dir).map_err(|e| OtaError::io("create staging directory", dir, e));
    }

    let entries = fs::read_dir(dir).map_err(|e| OtaError::io("scan staging directory", dir, e))?;
    for entry in entries {
        let path = entry
            .map_err(|e| OtaError::io("scan staging directory", dir, e))?
            .path();
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(|e| OtaError::io("clear staging directory", &path, e))?;
    }
    Ok(())
}

/// Extract every entry of the zip at `archive` into `dest`.
///
/// Returns the number of entries. Entries whose names would land outside
/// `dest` fail the whole extraction.
pub(crate) fn extract_archive(archive: &Path, dest: &Path) -> OtaResult<usize> {
    let file = File::open(archive).map_err(|e| OtaError::io("open archive", archive, e))?;
    let mut zip = zip::ZipArchive::new(BufReader::new(file))?;

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        let relative = entry
            .enclosed_name()
            .map(|name| name.to_path_buf())
            .ok_or_else(|| OtaError::InvalidPackage {
                reason: format!("entry '{}' escapes the staging directory", entry.name()),
            })?;
        let target = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|e| OtaError::io("create directory", &target, e))?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| OtaError::io("create directory", parent, e))?;
        }
        let mut out = File::create(&target).map_err(|e| OtaError::io("extract file", &target, e))?;
        io::copy(&mut entry, &mut out).map_err(|e| OtaError::io("extract file", &target, e))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o7777))
                .map_err(|e| OtaError::io("set permissions", &target, e))?;
        }
    }

    Ok(zip.len())
}

/// Payload directories present in `staging` that hold at least one file.
///
/// Fails with [`OtaError::InvalidPackage`] when there are none.
pub(crate) fn validate_payload(staging: &Path) -> OtaResult<Vec<&'static str>> {
    let found: Vec<&'static str> = PAYLOAD_DIRS
        .iter()
        .copied()
        .filter(|name| contains_file(&staging.join(name)))
        .collect();

    if found.is_empty() {
        return Err(OtaError::InvalidPackage {
            reason: "no 'app' or 'os' payload with files".to_string(),
        });
    }
    Ok(found)
}

fn contains_file(dir: &Path) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };
    entries.flatten().any(|entry| {
        let path = entry.path();
        if path.is_dir() {
            contains_file(&path)
        } else {
            path.is_file()
        }
    })
}

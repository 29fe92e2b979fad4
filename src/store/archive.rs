use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Writable handle on a record's archive, positioned at its end.
///
/// Opening an existing partial file continues it; `resume_from` tells the
/// caller how many bytes are already on disk. Validating the final length
/// against the expected total is the caller's job.
#[derive(Debug)]
pub struct ArchiveFile {
    file: File,
    path: PathBuf,
    resume_from: u64,
}

impl ArchiveFile {
    pub(crate) fn new(file: File, path: PathBuf, resume_from: u64) -> Self {
        Self {
            file,
            path,
            resume_from,
        }
    }

    /// Bytes already present when the file was opened.
    pub fn resume_from(&self) -> u64 {
        self.resume_from
    }

    /// Location of the archive on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Discard everything written so far and continue from byte 0.
    pub fn truncate(&mut self) -> std::io::Result<()> {
        self.file.set_len(0)?;
        self.resume_from = 0;
        Ok(())
    }

    /// Give up the wrapper and return the underlying append-mode file.
    pub fn into_file(self) -> File {
        self.file
    }
}

impl Write for ArchiveFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

//! Append-only trace log

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Session-scoped handle on the trace log
///
/// The file is opened once in append mode when a session starts and closed
/// when it stops. With `flush_per_entry` every entry reaches the file as soon
/// as it is written, which keeps the log usable if the traced process dies
/// mid-session.
#[derive(Debug)]
pub struct LogSink {
    path: PathBuf,
    writer: BufWriter<File>,
    flush_per_entry: bool,
    entries: u64,
}

impl LogSink {
    /// Open (or create) the log for appending
    pub fn open(path: &Path, flush_per_entry: bool) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        debug!("opened trace log {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            flush_per_entry,
            entries: 0,
        })
    }

    /// Append one entry
    pub fn append(&mut self, entry: &str) -> std::io::Result<()> {
        self.writer.write_all(entry.as_bytes())?;
        if self.flush_per_entry {
            self.writer.flush()?;
        }
        self.entries += 1;
        Ok(())
    }

    /// Flush and close the log
    pub fn close(mut self) -> std::io::Result<()> {
        self.writer.flush()?;
        debug!(
            "closed trace log {} after {} entries",
            self.path.display(),
            self.entries
        );
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries appended through this handle
    pub fn entries(&self) -> u64 {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_across_sessions() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("trace.txt");

        let mut sink = LogSink::open(&path, false).unwrap();
        sink.append("first\n\n").unwrap();
        assert_eq!(sink.entries(), 1);
        sink.close().unwrap();

        let mut sink = LogSink::open(&path, true).unwrap();
        sink.append("second\n\n").unwrap();
        // Flushed per entry, visible before close
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\n\nsecond\n\n");
        sink.close().unwrap();
    }

    #[test]
    fn test_open_missing_directory_fails() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("missing").join("trace.txt");
        assert!(LogSink::open(&path, true).is_err());
    }
}

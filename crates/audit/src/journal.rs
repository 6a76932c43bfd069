//! JSONL audit journal - append-only writer
//!
//! One file per UTC day (`YYYY-MM-DD.jsonl`). Used to export the chain for
//! offline forensic replay.

use crate::error::AuditError;
use crate::record::AuditRecord;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Append-only JSONL audit journal
pub struct AuditJournal {
    base_path: PathBuf,
    current_file: Option<BufWriter<File>>,
    current_date: Option<String>,
}

impl AuditJournal {
    /// Open (or create) a journal directory
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;

        Ok(Self {
            base_path,
            current_file: None,
            current_date: None,
        })
    }

    /// Append a sealed record
    pub fn append(&mut self, record: &AuditRecord) -> Result<(), AuditError> {
        let date = record.timestamp.format("%Y-%m-%d").to_string();

        if self.current_date.as_ref() != Some(&date) {
            self.rotate_file(&date)?;
        }

        if let Some(ref mut writer) = self.current_file {
            let json = serde_json::to_string(record)?;
            writeln!(writer, "{}", json)?;
            writer.flush()?;
        }

        Ok(())
    }

    /// Append many records, returning how many were written
    pub fn append_all<'a>(
        &mut self,
        records: impl IntoIterator<Item = &'a AuditRecord>,
    ) -> Result<usize, AuditError> {
        let mut written = 0;
        for record in records {
            self.append(record)?;
            written += 1;
        }
        Ok(written)
    }

    fn rotate_file(&mut self, date: &str) -> Result<(), AuditError> {
        if let Some(ref mut writer) = self.current_file {
            writer.flush()?;
        }

        let file_path = self.base_path.join(format!("{}.jsonl", date));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)?;

        tracing::debug!(path = %file_path.display(), "audit journal rotated");

        self.current_file = Some(BufWriter::new(file));
        self.current_date = Some(date.to_string());

        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Flush and close the current file
    pub fn close(&mut self) -> Result<(), AuditError> {
        if let Some(ref mut writer) = self.current_file {
            writer.flush()?;
        }
        self.current_file = None;
        self.current_date = None;
        Ok(())
    }
}

impl Drop for AuditJournal {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

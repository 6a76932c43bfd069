//! JSONL audit reader - sequential reader for forensic replay

use crate::error::AuditError;
use crate::hash::verify_chain;
use crate::record::AuditRecord;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

pub struct AuditReader {
    files: Vec<PathBuf>,
}

impl AuditReader {
    /// Collect the journal files of a directory in date order
    pub fn from_directory(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref();
        let mut files = Vec::new();

        if path.exists() {
            for entry in std::fs::read_dir(path)? {
                let entry = entry?;
                let file_path = entry.path();
                if file_path.extension().map_or(false, |ext| ext == "jsonl") {
                    files.push(file_path);
                }
            }
        }

        files.sort();

        Ok(Self { files })
    }

    /// Read all records from all files in order
    pub fn read_all(&self) -> Result<Vec<AuditRecord>, AuditError> {
        let mut records = Vec::new();

        for file_path in &self.files {
            let reader = BufReader::new(File::open(file_path)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                records.push(serde_json::from_str(&line)?);
            }
        }

        Ok(records)
    }

    /// Read everything and check the hash chain
    pub fn read_verified(&self) -> Result<Vec<AuditRecord>, AuditError> {
        let records = self.read_all()?;
        verify_chain(&records)?;
        Ok(records)
    }

    pub fn count(&self) -> Result<usize, AuditError> {
        Ok(self.read_all()?.len())
    }

    pub fn last_sequence(&self) -> Result<Option<u64>, AuditError> {
        Ok(self.read_all()?.last().map(|r| r.sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::GENESIS_HASH;
    use crate::journal::AuditJournal;
    use crate::record::{AuditDraft, AuditKind};
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn sealed(n: u64) -> Vec<AuditRecord> {
        let start = Utc::now() - Duration::days(2);
        let mut prev = GENESIS_HASH.to_string();
        (1..=n)
            .map(|seq| {
                // Spread over days to exercise rotation
                let at = start + Duration::hours(20 * seq as i64);
                let record = AuditDraft::success(AuditKind::ChallengeIssued).seal(seq, &prev, at);
                prev = record.hash.clone();
                record
            })
            .collect()
    }

    #[test]
    fn test_export_and_replay() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let records = sealed(4);

        {
            let mut journal = AuditJournal::new(dir.path())?;
            assert_eq!(journal.append_all(&records)?, 4);
        }

        let reader = AuditReader::from_directory(dir.path())?;
        let replayed = reader.read_verified()?;
        assert_eq!(replayed, records);
        assert_eq!(reader.count()?, 4);
        assert_eq!(reader.last_sequence()?, Some(4));
        Ok(())
    }

    #[test]
    fn test_tampered_journal_fails_verification() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut records = sealed(2);
        records[0].guardian_id = Some(custody_core::GuardianId::new("MALLORY")?);

        let mut journal = AuditJournal::new(dir.path())?;
        journal.append_all(&records)?;
        journal.close()?;

        let reader = AuditReader::from_directory(dir.path())?;
        assert!(matches!(reader.read_verified(), Err(AuditError::Chain(_))));
        Ok(())
    }

    #[test]
    fn test_missing_directory_is_empty() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let reader = AuditReader::from_directory(dir.path().join("nope"))?;
        assert_eq!(reader.count()?, 0);
        assert_eq!(reader.last_sequence()?, None);
        Ok(())
    }
}

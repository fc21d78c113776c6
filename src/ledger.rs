//! Persistence of the verified-scene set between runs.
//!
//! The pipeline only ever reads a [`VerifiedIdSet`]; the binary owns this
//! file and records what each run made available.

use std::collections::BTreeSet;
use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::domain::VerifiedIdSet;
use crate::error::LandsatError;
use crate::store::Store;

pub const LEDGER_FILE: &str = ".verified-scenes.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    verified: BTreeSet<String>,
}

#[derive(Debug)]
pub struct VerifiedLedger {
    path: Utf8PathBuf,
    ids: VerifiedIdSet,
}

impl VerifiedLedger {
    /// Loads the ledger at `path`; a missing file is an empty ledger.
    pub fn load(path: &Utf8Path) -> Result<Self, LandsatError> {
        let ids = match fs::read_to_string(path.as_std_path()) {
            Ok(content) => {
                let file: LedgerFile = serde_json::from_str(&content).map_err(|err| {
                    LandsatError::Filesystem(format!("parse ledger {path}: {err}"))
                })?;
                file.verified.into_iter().collect()
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => VerifiedIdSet::new(),
            Err(err) => return Err(LandsatError::Filesystem(format!("read {path}: {err}"))),
        };
        tracing::debug!(path = %path, count = ids.len(), "loaded verified ledger");
        Ok(Self {
            path: path.to_path_buf(),
            ids,
        })
    }

    pub fn ids(&self) -> &VerifiedIdSet {
        &self.ids
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Adds ids; returns how many were new.
    pub fn record<I, S>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ids.into_iter()
            .map(Into::into)
            .filter(|id| self.ids.insert(id.clone()))
            .count()
    }

    pub fn save(&self) -> Result<(), LandsatError> {
        let file = LedgerFile {
            verified: self.ids.iter().cloned().collect(),
        };
        Store::write_json_atomic(&self.path, &file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty_and_saves_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let path = root.join(LEDGER_FILE);

        let mut ledger = VerifiedLedger::load(&path).unwrap();
        assert!(ledger.ids().is_empty());
        assert_eq!(ledger.record(["b", "a", "b"]), 2);
        ledger.save().unwrap();

        let content = fs::read_to_string(path.as_std_path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["verified"], serde_json::json!(["a", "b"]));

        let reloaded = VerifiedLedger::load(&path).unwrap();
        assert!(reloaded.ids().contains("a"));
        assert_eq!(reloaded.ids().len(), 2);
    }
}

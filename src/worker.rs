//! Per-scene download state machine.
//!
//! `needs_download` ends in `in_storage` when the scene is already on disk,
//! otherwise it moves through `downloading` and `downloaded` to `extracted`.
//! Any failure on the way ends the item in `error` without touching the
//! rest of the run.

use crate::app::ProgressObserver;
use crate::domain::{ItemStatus, SceneRecord, WorkItem};
use crate::earthexplorer::DownloadSession;
use crate::error::LandsatError;
use crate::fallback::{FirstSuccess, first_success};
use crate::fs_util;
use crate::store::Store;

pub struct DownloadWorker<'a> {
    store: &'a Store,
    product_ids: &'a [String],
}

impl<'a> DownloadWorker<'a> {
    pub fn new(store: &'a Store, product_ids: &'a [String]) -> Self {
        Self { store, product_ids }
    }

    /// Drives `item` to a terminal status and returns it. Never fails: errors
    /// are reported to `observer` and recorded as [`ItemStatus::Error`].
    pub fn process<S: DownloadSession>(
        &self,
        item: &mut WorkItem,
        scene: &SceneRecord,
        session: &S,
        observer: &dyn ProgressObserver,
    ) -> ItemStatus {
        if let Err(err) = self.advance(item, scene, session, observer) {
            tracing::warn!(display_id = %item.display_id, error = %err, "item failed");
            observer.on_diagnostic(&format!("{}: {err}", item.display_id));
            transition(item, ItemStatus::Error, observer);
        }
        item.status
    }

    fn advance<S: DownloadSession>(
        &self,
        item: &mut WorkItem,
        scene: &SceneRecord,
        session: &S,
        observer: &dyn ProgressObserver,
    ) -> Result<(), LandsatError> {
        let display_id = item.display_id.clone();
        if self.store.contains(&display_id) {
            tracing::info!(display_id = %display_id, "already in storage");
            transition(item, ItemStatus::InStorage, observer);
            return Ok(());
        }
        self.store.ensure_root()?;
        self.store.remove_stale_archive(&display_id)?;

        transition(item, ItemStatus::Downloading, observer);
        let (preferred, size) = self.probe_size(scene, session);
        let archive = self.store.archive_path(&display_id);
        let candidates = preferred_first(self.product_ids, preferred);
        let outcome = first_success(&candidates, |product_id| {
            let result = session.download(
                product_id,
                &scene.entity_id,
                archive.as_std_path(),
                &mut |done, total| observer.on_bytes_progress(&display_id, done, total.or(size)),
            );
            if result.is_err() {
                let _ = self.store.remove_stale_archive(&display_id);
            }
            result
        });
        let bytes = match outcome {
            FirstSuccess::Found { value, .. } => value,
            FirstSuccess::AllFailed(failures) => return Err(summarize(failures)),
        };
        tracing::info!(display_id = %display_id, bytes, "downloaded");
        transition(item, ItemStatus::Downloaded, observer);

        let staging = self.store.staging_dir(&display_id)?;
        let entries = fs_util::extract_tar(archive.as_std_path(), staging.path())?;
        self.store.commit_item(staging, &display_id)?;
        self.store.remove_stale_archive(&display_id)?;
        tracing::info!(display_id = %display_id, entries, "extracted");
        transition(item, ItemStatus::Extracted, observer);
        Ok(())
    }

    /// Best effort: an unknown size never blocks the download.
    fn probe_size<'p, S: DownloadSession>(
        &'p self,
        scene: &SceneRecord,
        session: &S,
    ) -> (Option<&'p str>, Option<u64>) {
        match first_success(self.product_ids, |product_id| {
            session.probe_size(product_id, &scene.entity_id)
        }) {
            FirstSuccess::Found { candidate, value } => {
                tracing::debug!(display_id = %scene.display_id, product_id = candidate, size = value, "size resolved");
                (Some(candidate), Some(value))
            }
            FirstSuccess::AllFailed(failures) => {
                tracing::warn!(
                    display_id = %scene.display_id,
                    attempts = failures.len(),
                    "archive size unknown"
                );
                (None, None)
            }
        }
    }
}

fn transition(item: &mut WorkItem, status: ItemStatus, observer: &dyn ProgressObserver) {
    item.status = status;
    observer.on_status_changed(&item.display_id, status);
}

/// Product ids with the one that answered the probe moved to the front.
fn preferred_first(product_ids: &[String], preferred: Option<&str>) -> Vec<String> {
    let mut ordered = Vec::with_capacity(product_ids.len());
    if let Some(preferred) = preferred {
        ordered.push(preferred.to_string());
    }
    ordered.extend(
        product_ids
            .iter()
            .filter(|id| Some(id.as_str()) != preferred)
            .cloned(),
    );
    ordered
}

fn summarize(failures: Vec<(&str, LandsatError)>) -> LandsatError {
    match failures.into_iter().last() {
        Some((_, err)) => err,
        None => LandsatError::Download("no product ids configured".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> Vec<String> {
        vec!["A".to_string(), "B".to_string(), "C".to_string()]
    }

    #[test]
    fn probed_product_is_tried_first() {
        assert_eq!(preferred_first(&ids(), Some("C")), vec!["C", "A", "B"]);
        assert_eq!(preferred_first(&ids(), None), vec!["A", "B", "C"]);
    }

    #[test]
    fn summary_keeps_last_failure() {
        let failures = vec![
            ("A", LandsatError::Download("first".to_string())),
            ("B", LandsatError::Download("second".to_string())),
        ];
        assert_eq!(summarize(failures).to_string(), "download failed: second");
        assert!(matches!(summarize(Vec::new()), LandsatError::Download(_)));
    }
}

//! Turns catalog search results into the ordered list of scenes to fetch.

use std::collections::{BTreeSet, HashSet};

use crate::domain::{SceneRecord, VerifiedIdSet, WorkItem};

const TILE_CODE_OFFSET: usize = 10;
const TILE_CODE_LEN: usize = 6;

/// Path/row code embedded in a display id, e.g. `181025` in
/// `LC09_L2SP_181025_20240101_20240102_02_T1`.
pub fn tile_code(display_id: &str) -> Option<&str> {
    display_id.get(TILE_CODE_OFFSET..TILE_CODE_OFFSET + TILE_CODE_LEN)
}

/// Drops repeated display ids, keeping the first occurrence in place.
pub fn dedup_scenes(scenes: Vec<SceneRecord>) -> Vec<SceneRecord> {
    let mut seen = HashSet::with_capacity(scenes.len());
    let before = scenes.len();
    let unique: Vec<_> = scenes
        .into_iter()
        .filter(|scene| seen.insert(scene.display_id.clone()))
        .collect();
    if unique.len() != before {
        tracing::debug!(dropped = before - unique.len(), "duplicate scenes dropped");
    }
    unique
}

/// Scenes whose tile code is in `cells` and which are not already verified,
/// in catalog order.
pub fn build_worklist(
    scenes: &[SceneRecord],
    cells: &BTreeSet<String>,
    verified: &VerifiedIdSet,
) -> Vec<WorkItem> {
    let items: Vec<WorkItem> = scenes
        .iter()
        .filter(|scene| tile_code(&scene.display_id).is_some_and(|code| cells.contains(code)))
        .filter(|scene| !verified.contains(&scene.display_id))
        .map(|scene| WorkItem::new(scene.display_id.clone()))
        .collect();

    if items.is_empty() {
        tracing::info!(found = scenes.len(), "no scenes left after filtering");
    } else {
        tracing::info!(found = scenes.len(), filtered = items.len(), "scenes selected");
    }
    items
}

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::area::{AreaOfInterest, Crs};
use crate::catalog::{self, CatalogService};
use crate::domain::{BoundingBox, Credentials, ItemStatus, QueryParameters, VerifiedIdSet, WorkItem};
use crate::earthexplorer::{DownloadService, DownloadSession};
use crate::error::LandsatError;
use crate::grid::{self, Grid};
use crate::reconcile;
use crate::store::Store;
use crate::worker::DownloadWorker;

/// Receives pipeline progress. Calls for one item never interleave with
/// calls for the next.
pub trait ProgressObserver {
    fn on_item_listed(&self, display_id: &str);
    fn on_status_changed(&self, display_id: &str, status: ItemStatus);
    fn on_bytes_progress(&self, display_id: &str, done: u64, total: Option<u64>);

    /// Human-readable notes: failures and running totals.
    fn on_diagnostic(&self, _message: &str) {}
}

pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_item_listed(&self, _display_id: &str) {}
    fn on_status_changed(&self, _display_id: &str, _status: ItemStatus) {}
    fn on_bytes_progress(&self, _display_id: &str, _done: u64, _total: Option<u64>) {}
}

pub struct RunRequest<'a> {
    pub credentials: &'a Credentials,
    pub query: &'a QueryParameters,
    pub grid: &'a Grid,
    pub area: &'a AreaOfInterest,
    pub storage: &'a Store,
    pub verified: &'a VerifiedIdSet,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// Tile codes covering the area.
    pub zones: Vec<String>,
    /// Scenes returned by the catalog.
    pub found: usize,
    /// Scenes left after grid and ledger filtering.
    pub filtered: usize,
    pub items: Vec<WorkItem>,
    /// Display ids available locally at the end of the run.
    pub downloaded: Vec<String>,
}

#[derive(Clone)]
pub struct App<C: CatalogService, D: DownloadService> {
    catalog: C,
    downloads: D,
    product_ids: Vec<String>,
}

impl<C: CatalogService, D: DownloadService> App<C, D> {
    pub fn new(catalog: C, downloads: D, product_ids: Vec<String>) -> Self {
        Self {
            catalog,
            downloads,
            product_ids,
        }
    }

    pub fn run(
        &self,
        request: &RunRequest<'_>,
        observer: &dyn ProgressObserver,
    ) -> Result<RunReport, LandsatError> {
        let zones = grid::intersecting_cells(request.grid, request.area)?;
        tracing::info!(zones = %join(&zones), "zones covering the area");

        let scenes = catalog::search_scenes(&self.catalog, request.credentials, request.query)?;
        let scenes = reconcile::dedup_scenes(scenes);
        observer.on_diagnostic(&format!("found {} scenes", scenes.len()));

        let mut items = reconcile::build_worklist(&scenes, &zones, request.verified);
        observer.on_diagnostic(&format!("{} scenes after filtering", items.len()));
        let mut report = RunReport {
            zones: zones.into_iter().collect(),
            found: scenes.len(),
            filtered: items.len(),
            ..RunReport::default()
        };
        if items.is_empty() {
            return Ok(report);
        }

        for item in &items {
            observer.on_item_listed(&item.display_id);
        }

        let session = self.downloads.login(request.credentials)?;
        let by_id: HashMap<&str, _> = scenes
            .iter()
            .map(|scene| (scene.display_id.as_str(), scene))
            .collect();
        let worker = DownloadWorker::new(request.storage, &self.product_ids);
        let mut downloaded = Vec::new();
        for item in &mut items {
            let Some(scene) = by_id.get(item.display_id.as_str()) else {
                item.status = ItemStatus::Error;
                observer.on_status_changed(&item.display_id, ItemStatus::Error);
                continue;
            };
            if worker.process(item, scene, &session, observer).is_success() {
                downloaded.push(item.display_id.clone());
            }
        }
        if let Err(err) = session.logout() {
            tracing::warn!(error = %err, "download logout failed");
        }

        tracing::info!(downloaded = downloaded.len(), total = items.len(), "run finished");
        observer.on_diagnostic(&format!("downloaded {} scenes", downloaded.len()));
        report.items = items;
        report.downloaded = downloaded;
        Ok(report)
    }
}

/// Search box for an area, always in geographic coordinates.
pub fn query_bbox(area: &AreaOfInterest) -> Result<BoundingBox, LandsatError> {
    Ok(area.to_crs(Crs::WGS84)?.bbox())
}

fn join(zones: &BTreeSet<String>) -> String {
    zones.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

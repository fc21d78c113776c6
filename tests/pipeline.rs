use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use geo::{Geometry, polygon};

use landsat_fetch::app::{App, ProgressObserver, RunReport, RunRequest};
use landsat_fetch::area::{AreaOfInterest, Crs};
use landsat_fetch::catalog::{CatalogService, CatalogSession};
use landsat_fetch::domain::{
    BoundingBox, Credentials, ItemStatus, QueryParameters, SceneRecord, VerifiedIdSet,
};
use landsat_fetch::earthexplorer::{DownloadService, DownloadSession};
use landsat_fetch::error::LandsatError;
use landsat_fetch::grid::{Grid, GridCell};
use landsat_fetch::store::Store;

const SCENE_A: &str = "LC09_L2SP_001002_20240101_20240102_02_T1";
const SCENE_B: &str = "LC09_L2SP_003004_20240101_20240102_02_T1";
const SCENE_C: &str = "LC08_L2SP_001002_20240109_20240110_02_T1";
const ARCHIVE_SIZE: u64 = 4096;

#[derive(Default)]
struct Calls {
    logins: usize,
    logouts: usize,
    probes: Vec<String>,
    downloads: Vec<String>,
    /// Whether the destination already existed when each download started.
    preexisting: Vec<bool>,
}

struct MockCatalog {
    scenes: Vec<SceneRecord>,
    fail_search: bool,
    calls: Arc<Mutex<Calls>>,
}

struct MockCatalogSession {
    scenes: Vec<SceneRecord>,
    fail_search: bool,
    calls: Arc<Mutex<Calls>>,
}

impl CatalogService for MockCatalog {
    type Session = MockCatalogSession;

    fn login(&self, _credentials: &Credentials) -> Result<MockCatalogSession, LandsatError> {
        self.calls.lock().unwrap().logins += 1;
        Ok(MockCatalogSession {
            scenes: self.scenes.clone(),
            fail_search: self.fail_search,
            calls: Arc::clone(&self.calls),
        })
    }
}

impl CatalogSession for MockCatalogSession {
    fn search(
        &self,
        _query: &QueryParameters,
        _max_results: usize,
    ) -> Result<Vec<SceneRecord>, LandsatError> {
        if self.fail_search {
            return Err(LandsatError::CatalogQuery("rate limited".to_string()));
        }
        Ok(self.scenes.clone())
    }

    fn logout(self) -> Result<(), LandsatError> {
        self.calls.lock().unwrap().logouts += 1;
        Ok(())
    }
}

/// Serves tar archives keyed by entity id. Probes succeed only for `probe_ok`.
#[derive(Clone)]
struct MockDownloads {
    archives: HashMap<String, Vec<u8>>,
    probe_ok: Vec<String>,
    reject_login: bool,
    calls: Arc<Mutex<Calls>>,
}

impl DownloadService for MockDownloads {
    type Session = MockDownloads;

    fn login(&self, _credentials: &Credentials) -> Result<MockDownloads, LandsatError> {
        self.calls.lock().unwrap().logins += 1;
        if self.reject_login {
            return Err(LandsatError::Authentication("bad credentials".to_string()));
        }
        Ok(self.clone())
    }
}

impl DownloadSession for MockDownloads {
    fn probe_size(&self, product_id: &str, _entity_id: &str) -> Result<u64, LandsatError> {
        self.calls.lock().unwrap().probes.push(product_id.to_string());
        if self.probe_ok.iter().any(|id| id == product_id) {
            Ok(ARCHIVE_SIZE)
        } else {
            Err(LandsatError::MetadataProbe(format!("{product_id}: 404")))
        }
    }

    fn download(
        &self,
        product_id: &str,
        entity_id: &str,
        destination: &Path,
        progress: &mut dyn FnMut(u64, Option<u64>),
    ) -> Result<u64, LandsatError> {
        {
            let mut calls = self.calls.lock().unwrap();
            calls.downloads.push(product_id.to_string());
            calls.preexisting.push(destination.exists());
        }
        let bytes = self
            .archives
            .get(entity_id)
            .ok_or_else(|| LandsatError::Download(format!("no archive for {entity_id}")))?;
        fs::write(destination, bytes).unwrap();
        progress(bytes.len() as u64, None);
        Ok(bytes.len() as u64)
    }

    fn logout(self) -> Result<(), LandsatError> {
        self.calls.lock().unwrap().logouts += 1;
        Ok(())
    }
}

#[derive(Default)]
struct RecordingObserver {
    events: Mutex<Vec<String>>,
    totals: Mutex<Vec<Option<u64>>>,
}

impl RecordingObserver {
    fn statuses(&self, display_id: &str) -> Vec<String> {
        let prefix = format!("status {display_id} ");
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| event.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }
}

impl ProgressObserver for RecordingObserver {
    fn on_item_listed(&self, display_id: &str) {
        self.events.lock().unwrap().push(format!("listed {display_id}"));
    }

    fn on_status_changed(&self, display_id: &str, status: ItemStatus) {
        self.events
            .lock()
            .unwrap()
            .push(format!("status {display_id} {status}"));
    }

    fn on_bytes_progress(&self, _display_id: &str, _done: u64, total: Option<u64>) {
        self.totals.lock().unwrap().push(total);
    }
}

struct Fixture {
    _temp: tempfile::TempDir,
    store: Store,
    grid: Grid,
    area: AreaOfInterest,
    query: QueryParameters,
    credentials: Credentials,
    catalog_calls: Arc<Mutex<Calls>>,
    download_calls: Arc<Mutex<Calls>>,
}

impl Fixture {
    fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().join("scenes")).unwrap();
        let grid = Grid::new(
            vec![
                GridCell::new(
                    "001_02",
                    polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 1.0)],
                ),
                GridCell::new(
                    "003_04",
                    polygon![(x: 5.0, y: 5.0), (x: 6.0, y: 5.0), (x: 6.0, y: 6.0), (x: 5.0, y: 6.0)],
                ),
            ],
            Crs::WGS84,
        );
        let area = AreaOfInterest::from_geometries(
            vec![Geometry::Polygon(
                polygon![(x: 0.2, y: 0.2), (x: 0.8, y: 0.2), (x: 0.8, y: 0.8), (x: 0.2, y: 0.8)],
            )],
            Crs::WGS84,
        )
        .unwrap();
        let query = QueryParameters::new(
            "landsat_ot_c2_l2",
            BoundingBox {
                min_lon: 0.2,
                min_lat: 0.2,
                max_lon: 0.8,
                max_lat: 0.8,
            },
            "2024-01-01".parse().unwrap(),
            "2024-01-31".parse().unwrap(),
            30,
        )
        .unwrap();
        Self {
            _temp: temp,
            store: Store::new(root),
            grid,
            area,
            query,
            credentials: Credentials::new("user", "secret"),
            catalog_calls: Arc::default(),
            download_calls: Arc::default(),
        }
    }

    fn catalog(&self, scenes: Vec<SceneRecord>) -> MockCatalog {
        MockCatalog {
            scenes,
            fail_search: false,
            calls: Arc::clone(&self.catalog_calls),
        }
    }

    fn downloads(&self, archives: &[(&str, Vec<u8>)], probe_ok: &[&str]) -> MockDownloads {
        MockDownloads {
            archives: archives
                .iter()
                .map(|(entity, bytes)| (entity.to_string(), bytes.clone()))
                .collect(),
            probe_ok: probe_ok.iter().map(|id| id.to_string()).collect(),
            reject_login: false,
            calls: Arc::clone(&self.download_calls),
        }
    }

    fn run(
        &self,
        catalog: MockCatalog,
        downloads: MockDownloads,
        verified: &VerifiedIdSet,
        observer: &dyn ProgressObserver,
    ) -> Result<RunReport, LandsatError> {
        let app = App::new(catalog, downloads, product_ids());
        let request = RunRequest {
            credentials: &self.credentials,
            query: &self.query,
            grid: &self.grid,
            area: &self.area,
            storage: &self.store,
            verified,
        };
        app.run(&request, observer)
    }
}

fn product_ids() -> Vec<String> {
    vec!["A".to_string(), "B".to_string(), "C".to_string()]
}

fn scenes() -> Vec<SceneRecord> {
    vec![SceneRecord::new(SCENE_A, "E1"), SceneRecord::new(SCENE_B, "E2")]
}

fn tar_archive(files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap()
}

#[test]
fn worklist_keeps_only_scenes_on_intersecting_tiles() {
    let fixture = Fixture::new();
    let archive = tar_archive(&[("B4.TIF", "pixels"), ("MTL.txt", "meta")]);
    let observer = RecordingObserver::default();

    let report = fixture
        .run(
            fixture.catalog(scenes()),
            fixture.downloads(&[("E1", archive)], &["A"]),
            &VerifiedIdSet::new(),
            &observer,
        )
        .unwrap();

    assert_eq!(report.zones, vec!["001002"]);
    assert_eq!(report.found, 2);
    assert_eq!(report.filtered, 1);
    assert_eq!(report.items[0].display_id, SCENE_A);
    assert_eq!(report.downloaded, vec![SCENE_A]);
    assert_eq!(
        observer.statuses(SCENE_A),
        vec!["downloading", "downloaded", "extracted"]
    );

    let scene_dir = fixture.store.item_dir(SCENE_A);
    assert_eq!(
        fs::read(scene_dir.join("B4.TIF").as_std_path()).unwrap(),
        b"pixels"
    );
    assert!(!fixture.store.archive_path(SCENE_A).as_std_path().exists());
    assert!(!fixture.store.contains(SCENE_B));

    let downloads = fixture.download_calls.lock().unwrap();
    assert_eq!(downloads.logins, 1);
    assert_eq!(downloads.logouts, 1);
    let catalog = fixture.catalog_calls.lock().unwrap();
    assert_eq!((catalog.logins, catalog.logouts), (1, 1));
}

#[test]
fn existing_scene_directory_skips_the_network() {
    let fixture = Fixture::new();
    fs::create_dir_all(fixture.store.item_dir(SCENE_A).as_std_path()).unwrap();
    let observer = RecordingObserver::default();

    let report = fixture
        .run(
            fixture.catalog(scenes()),
            fixture.downloads(&[], &["A"]),
            &VerifiedIdSet::new(),
            &observer,
        )
        .unwrap();

    assert_eq!(report.downloaded, vec![SCENE_A]);
    assert_eq!(report.items[0].status, ItemStatus::InStorage);
    assert_eq!(observer.statuses(SCENE_A), vec!["in_storage"]);
    let calls = fixture.download_calls.lock().unwrap();
    assert!(calls.probes.is_empty());
    assert!(calls.downloads.is_empty());
}

#[test]
fn size_probe_falls_through_to_the_third_product() {
    let fixture = Fixture::new();
    let archive = tar_archive(&[("B4.TIF", "pixels")]);
    let observer = RecordingObserver::default();

    let report = fixture
        .run(
            fixture.catalog(scenes()),
            fixture.downloads(&[("E1", archive)], &["C"]),
            &VerifiedIdSet::new(),
            &observer,
        )
        .unwrap();

    assert_eq!(report.downloaded, vec![SCENE_A]);
    let calls = fixture.download_calls.lock().unwrap();
    assert_eq!(calls.probes, vec!["A", "B", "C"]);
    assert_eq!(calls.downloads, vec!["C"]);
    assert!(
        observer
            .totals
            .lock()
            .unwrap()
            .iter()
            .all(|total| *total == Some(ARCHIVE_SIZE))
    );
}

#[test]
fn download_proceeds_with_unknown_size_when_every_probe_fails() {
    let fixture = Fixture::new();
    let archive = tar_archive(&[("B4.TIF", "pixels")]);
    let observer = RecordingObserver::default();

    let report = fixture
        .run(
            fixture.catalog(scenes()),
            fixture.downloads(&[("E1", archive)], &[]),
            &VerifiedIdSet::new(),
            &observer,
        )
        .unwrap();

    assert_eq!(report.downloaded, vec![SCENE_A]);
    assert_eq!(report.items[0].status, ItemStatus::Extracted);
    let calls = fixture.download_calls.lock().unwrap();
    assert_eq!(calls.probes, vec!["A", "B", "C"]);
    assert_eq!(calls.downloads, vec!["A"]);
    let totals = observer.totals.lock().unwrap();
    assert!(!totals.is_empty());
    assert!(totals.iter().all(Option::is_none));
}

#[test]
fn extraction_failure_does_not_stop_later_items() {
    let fixture = Fixture::new();
    let good = tar_archive(&[("B4.TIF", "pixels")]);
    let observer = RecordingObserver::default();
    let scenes = vec![
        SceneRecord::new(SCENE_A, "E1"),
        SceneRecord::new(SCENE_C, "E3"),
    ];

    let report = fixture
        .run(
            fixture.catalog(scenes),
            fixture.downloads(&[("E1", b"not a tar".to_vec()), ("E3", good)], &["A"]),
            &VerifiedIdSet::new(),
            &observer,
        )
        .unwrap();

    assert_eq!(report.items[0].status, ItemStatus::Error);
    assert_eq!(report.items[1].status, ItemStatus::Extracted);
    assert_eq!(report.downloaded, vec![SCENE_C]);
    assert_eq!(
        observer.statuses(SCENE_A),
        vec!["downloading", "downloaded", "error"]
    );
    assert!(!fixture.store.contains(SCENE_A));
    assert!(fixture.store.contains(SCENE_C));
}

#[test]
fn missing_archive_marks_item_as_error() {
    let fixture = Fixture::new();
    let observer = RecordingObserver::default();

    let report = fixture
        .run(
            fixture.catalog(scenes()),
            fixture.downloads(&[], &["A"]),
            &VerifiedIdSet::new(),
            &observer,
        )
        .unwrap();

    assert_eq!(report.items[0].status, ItemStatus::Error);
    assert!(report.downloaded.is_empty());
    let calls = fixture.download_calls.lock().unwrap();
    assert_eq!(calls.downloads, vec!["A", "B", "C"]);
    assert_eq!(calls.logouts, 1);
    assert!(!fixture.store.archive_path(SCENE_A).as_std_path().exists());
}

#[test]
fn empty_worklist_never_logs_in_to_downloads() {
    let fixture = Fixture::new();
    let verified: VerifiedIdSet = [SCENE_A.to_string()].into();

    let report = fixture
        .run(
            fixture.catalog(scenes()),
            fixture.downloads(&[], &["A"]),
            &verified,
            &RecordingObserver::default(),
        )
        .unwrap();

    assert_eq!(report.filtered, 0);
    assert!(report.downloaded.is_empty());
    assert_eq!(fixture.download_calls.lock().unwrap().logins, 0);
}

#[test]
fn catalog_session_is_closed_when_search_fails() {
    let fixture = Fixture::new();
    let mut catalog = fixture.catalog(scenes());
    catalog.fail_search = true;

    let result = fixture.run(
        catalog,
        fixture.downloads(&[], &["A"]),
        &VerifiedIdSet::new(),
        &RecordingObserver::default(),
    );

    assert_matches!(result, Err(LandsatError::CatalogQuery(_)));
    let catalog = fixture.catalog_calls.lock().unwrap();
    assert_eq!((catalog.logins, catalog.logouts), (1, 1));
    assert_eq!(fixture.download_calls.lock().unwrap().logins, 0);
}

#[test]
fn duplicate_catalog_rows_are_processed_once() {
    let fixture = Fixture::new();
    let archive = tar_archive(&[("B4.TIF", "pixels")]);
    let mut scenes = scenes();
    scenes.push(SceneRecord::new(SCENE_A, "E1"));

    let report = fixture
        .run(
            fixture.catalog(scenes),
            fixture.downloads(&[("E1", archive)], &["A"]),
            &VerifiedIdSet::new(),
            &RecordingObserver::default(),
        )
        .unwrap();

    assert_eq!(report.found, 2);
    assert_eq!(report.items.len(), 1);
    assert_eq!(fixture.download_calls.lock().unwrap().downloads.len(), 1);
}

#[test]
fn rejected_download_login_aborts_after_closing_the_catalog() {
    let fixture = Fixture::new();
    let mut downloads = fixture.downloads(&[], &["A"]);
    downloads.reject_login = true;

    let result = fixture.run(
        fixture.catalog(scenes()),
        downloads,
        &VerifiedIdSet::new(),
        &RecordingObserver::default(),
    );

    assert_matches!(result, Err(LandsatError::Authentication(_)));
    let catalog = fixture.catalog_calls.lock().unwrap();
    assert_eq!((catalog.logins, catalog.logouts), (1, 1));
    let calls = fixture.download_calls.lock().unwrap();
    assert_eq!(calls.logins, 1);
    assert!(calls.probes.is_empty());
    assert!(calls.downloads.is_empty());
}

#[test]
fn leftover_archive_is_removed_before_downloading() {
    let fixture = Fixture::new();
    fixture.store.ensure_root().unwrap();
    let leftover = fixture.store.archive_path(SCENE_A);
    fs::write(leftover.as_std_path(), b"half a download").unwrap();
    let archive = tar_archive(&[("B4.TIF", "pixels")]);

    let report = fixture
        .run(
            fixture.catalog(scenes()),
            fixture.downloads(&[("E1", archive)], &["A"]),
            &VerifiedIdSet::new(),
            &RecordingObserver::default(),
        )
        .unwrap();

    assert_eq!(report.items[0].status, ItemStatus::Extracted);
    let calls = fixture.download_calls.lock().unwrap();
    assert_eq!(calls.preexisting, vec![false]);
    assert!(!leftover.as_std_path().exists());
}

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::LandsatError;

/// Display identifiers the surrounding application already considers complete.
pub type VerifiedIdSet = HashSet<String>;

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn from_rect(rect: geo::Rect<f64>) -> Self {
        Self {
            min_lon: rect.min().x,
            min_lat: rect.min().y,
            max_lon: rect.max().x,
            max_lat: rect.max().y,
        }
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.4}, {:.4}, {:.4}, {:.4}",
            self.min_lon, self.min_lat, self.max_lon, self.max_lat
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryParameters {
    pub dataset: String,
    pub bbox: BoundingBox,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub max_cloud_cover: u8,
}

impl QueryParameters {
    pub fn new(
        dataset: impl Into<String>,
        bbox: BoundingBox,
        start_date: NaiveDate,
        end_date: NaiveDate,
        max_cloud_cover: u8,
    ) -> Result<Self, LandsatError> {
        let dataset = dataset.into();
        if dataset.trim().is_empty() {
            return Err(LandsatError::InvalidQuery("dataset is empty".to_string()));
        }
        if start_date > end_date {
            return Err(LandsatError::InvalidQuery(format!(
                "start date {start_date} is after end date {end_date}"
            )));
        }
        if max_cloud_cover > 100 {
            return Err(LandsatError::InvalidQuery(format!(
                "max cloud cover {max_cloud_cover} is outside 0..=100"
            )));
        }
        Ok(Self {
            dataset,
            bbox,
            start_date,
            end_date,
            max_cloud_cover,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneRecord {
    pub display_id: String,
    pub entity_id: String,
    #[serde(default)]
    pub acquisition_date: Option<NaiveDate>,
    #[serde(default)]
    pub cloud_cover: Option<f64>,
}

impl SceneRecord {
    pub fn new(display_id: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            display_id: display_id.into(),
            entity_id: entity_id.into(),
            acquisition_date: None,
            cloud_cover: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    NeedsDownload,
    Downloading,
    Downloaded,
    Extracted,
    InStorage,
    Error,
}

impl ItemStatus {
    pub fn label(self) -> &'static str {
        match self {
            ItemStatus::NeedsDownload => "needs_download",
            ItemStatus::Downloading => "downloading",
            ItemStatus::Downloaded => "downloaded",
            ItemStatus::Extracted => "extracted",
            ItemStatus::InStorage => "in_storage",
            ItemStatus::Error => "error",
        }
    }

    /// Whether the scene is available locally once the item stops here.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            ItemStatus::InStorage | ItemStatus::Downloaded | ItemStatus::Extracted
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ItemStatus::InStorage | ItemStatus::Extracted | ItemStatus::Error
        )
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ItemStatus {
    type Err = LandsatError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "needs_download" => Ok(ItemStatus::NeedsDownload),
            "downloading" => Ok(ItemStatus::Downloading),
            "downloaded" => Ok(ItemStatus::Downloaded),
            "extracted" => Ok(ItemStatus::Extracted),
            "in_storage" => Ok(ItemStatus::InStorage),
            "error" => Ok(ItemStatus::Error),
            other => Err(LandsatError::InvalidQuery(format!(
                "unknown item status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkItem {
    pub display_id: String,
    pub status: ItemStatus,
}

impl WorkItem {
    pub fn new(display_id: impl Into<String>) -> Self {
        Self {
            display_id: display_id.into(),
            status: ItemStatus::NeedsDownload,
        }
    }
}

use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::catalog::M2mHttpClient;
use crate::domain::Credentials;
use crate::earthexplorer::EarthExplorerHttpClient;
use crate::error::LandsatError;
use crate::ledger::LEDGER_FILE;
use crate::store::Store;

pub const CONFIG_FILE: &str = "landsat-fetch.json";
pub const PASSWORD_ENV: &str = "LANDSAT_PASSWORD";
pub const DEFAULT_DATASET: &str = "landsat_ot_c2_l2";
pub const DEFAULT_MAX_CLOUD_COVER: u8 = 100;

/// On-disk config. The CLI builds one of these too and layers it on top.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub dataset: Option<String>,
    #[serde(default)]
    pub grid: Option<Utf8PathBuf>,
    #[serde(default)]
    pub area: Option<Utf8PathBuf>,
    #[serde(default)]
    pub storage: Option<Utf8PathBuf>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub max_cloud_cover: Option<u8>,
    #[serde(default)]
    pub product_ids: Option<Vec<String>>,
    #[serde(default)]
    pub catalog_url: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub login_url: Option<String>,
    #[serde(default)]
    pub verified_ledger: Option<Utf8PathBuf>,
}

impl Config {
    /// Fields set in `overrides` win.
    pub fn merge(self, overrides: Config) -> Config {
        Config {
            schema_version: overrides.schema_version.or(self.schema_version),
            username: overrides.username.or(self.username),
            password: overrides.password.or(self.password),
            dataset: overrides.dataset.or(self.dataset),
            grid: overrides.grid.or(self.grid),
            area: overrides.area.or(self.area),
            storage: overrides.storage.or(self.storage),
            start_date: overrides.start_date.or(self.start_date),
            end_date: overrides.end_date.or(self.end_date),
            max_cloud_cover: overrides.max_cloud_cover.or(self.max_cloud_cover),
            product_ids: overrides.product_ids.or(self.product_ids),
            catalog_url: overrides.catalog_url.or(self.catalog_url),
            download_url: overrides.download_url.or(self.download_url),
            login_url: overrides.login_url.or(self.login_url),
            verified_ledger: overrides.verified_ledger.or(self.verified_ledger),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub credentials: Credentials,
    pub dataset: String,
    pub grid: Utf8PathBuf,
    pub area: Utf8PathBuf,
    pub storage: Utf8PathBuf,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub max_cloud_cover: u8,
    pub product_ids: Vec<String>,
    pub catalog_url: String,
    pub download_url: String,
    pub login_url: String,
    pub verified_ledger: Utf8PathBuf,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads the config file. Without an explicit path a missing
    /// `landsat-fetch.json` just means "no file settings".
    pub fn load(path: Option<&str>) -> Result<Config, LandsatError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE),
        };

        if !config_path.exists() {
            return match path {
                Some(_) => Err(LandsatError::ConfigRead(config_path)),
                None => Ok(Config::default()),
            };
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| LandsatError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| LandsatError::ConfigParse(err.to_string()))?;
        tracing::debug!(path = %config_path.display(), "loaded config");
        Ok(config)
    }

    pub fn resolve(
        path: Option<&str>,
        overrides: Config,
        env_password: Option<String>,
    ) -> Result<ResolvedConfig, LandsatError> {
        let config = Self::load(path)?.merge(overrides);
        Self::resolve_config(config, env_password)
    }

    pub fn resolve_config(
        config: Config,
        env_password: Option<String>,
    ) -> Result<ResolvedConfig, LandsatError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let (grid, area) = Self::resolve_inputs(&config)?;
        let username = non_empty(config.username).ok_or_else(|| missing("username"))?;
        let password = non_empty(env_password)
            .or(non_empty(config.password))
            .ok_or_else(|| missing(&format!("password (set {PASSWORD_ENV})")))?;

        let dataset = config
            .dataset
            .unwrap_or_else(|| DEFAULT_DATASET.to_string());
        if dataset.trim().is_empty() {
            return Err(LandsatError::InvalidQuery("dataset is empty".to_string()));
        }

        let start_date = config.start_date.ok_or_else(|| missing("start_date"))?;
        let end_date = config.end_date.ok_or_else(|| missing("end_date"))?;
        if start_date > end_date {
            return Err(LandsatError::InvalidQuery(format!(
                "start date {start_date} is after end date {end_date}"
            )));
        }

        let max_cloud_cover = config.max_cloud_cover.unwrap_or(DEFAULT_MAX_CLOUD_COVER);
        if max_cloud_cover > 100 {
            return Err(LandsatError::InvalidQuery(format!(
                "max cloud cover {max_cloud_cover} is outside 0..=100"
            )));
        }

        let product_ids = config.product_ids.unwrap_or_else(default_product_ids);
        if product_ids.iter().all(|id| id.trim().is_empty()) {
            return Err(LandsatError::InvalidQuery(
                "at least one product id is required".to_string(),
            ));
        }

        let storage = config.storage.unwrap_or_else(Store::default_root);
        let verified_ledger = config
            .verified_ledger
            .unwrap_or_else(|| storage.join(LEDGER_FILE));

        Ok(ResolvedConfig {
            schema_version,
            credentials: Credentials::new(username, password),
            dataset,
            grid,
            area,
            storage,
            start_date,
            end_date,
            max_cloud_cover,
            product_ids,
            catalog_url: config
                .catalog_url
                .unwrap_or_else(|| M2mHttpClient::DEFAULT_URL.to_string()),
            download_url: config
                .download_url
                .unwrap_or_else(|| EarthExplorerHttpClient::DEFAULT_URL.to_string()),
            login_url: config
                .login_url
                .unwrap_or_else(|| EarthExplorerHttpClient::DEFAULT_LOGIN_URL.to_string()),
            verified_ledger,
        })
    }

    /// Grid and area paths, the only settings the offline `tiles` command needs.
    pub fn resolve_inputs(config: &Config) -> Result<(Utf8PathBuf, Utf8PathBuf), LandsatError> {
        let grid = config.grid.clone().ok_or_else(|| missing("grid"))?;
        let area = config.area.clone().ok_or_else(|| missing("area"))?;
        Ok((grid, area))
    }
}

/// Opaque EarthExplorer product identifiers, tried in this order.
pub fn default_product_ids() -> Vec<String> {
    vec![
        "5e83d14f30ea90a9".to_string(),
        "5e83d14fec7cae84".to_string(),
        "632210d4770592cf".to_string(),
    ]
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn missing(field: &str) -> LandsatError {
    LandsatError::InvalidQuery(format!("missing {field}"))
}

//! Scene search against the USGS machine-to-machine catalog API.

use std::time::Duration;

use chrono::NaiveDate;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::domain::{Credentials, QueryParameters, SceneRecord};
use crate::error::LandsatError;
use crate::http;

/// Upper bound on scenes returned by a single search.
pub const MAX_RESULTS: usize = 500;

pub trait CatalogService: Send + Sync {
    type Session: CatalogSession;

    fn login(&self, credentials: &Credentials) -> Result<Self::Session, LandsatError>;
}

pub trait CatalogSession {
    fn search(
        &self,
        query: &QueryParameters,
        max_results: usize,
    ) -> Result<Vec<SceneRecord>, LandsatError>;

    fn logout(self) -> Result<(), LandsatError>;
}

/// Logs in, searches, and always logs out again, even when the search failed.
pub fn search_scenes<C: CatalogService>(
    catalog: &C,
    credentials: &Credentials,
    query: &QueryParameters,
) -> Result<Vec<SceneRecord>, LandsatError> {
    let session = catalog.login(credentials)?;
    let result = session.search(query, MAX_RESULTS);
    if let Err(err) = session.logout() {
        tracing::warn!(error = %err, "catalog logout failed");
    }

    let mut scenes = result?;
    scenes.truncate(MAX_RESULTS);
    if scenes.is_empty() {
        tracing::info!(dataset = %query.dataset, "no scenes found");
    } else {
        tracing::info!(count = scenes.len(), dataset = %query.dataset, "scenes found");
    }
    Ok(scenes)
}

#[derive(Clone)]
pub struct M2mHttpClient {
    client: Client,
    base_url: String,
}

pub struct M2mSession {
    client: Client,
    base_url: String,
    api_key: String,
}

impl M2mHttpClient {
    pub const DEFAULT_URL: &'static str = "https://m2m.cr.usgs.gov/api/api/json/stable";

    pub fn new() -> Result<Self, LandsatError> {
        Self::with_base_url(Self::DEFAULT_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, LandsatError> {
        let client = http::client_builder(Duration::from_secs(120))
            .build()
            .map_err(|err| LandsatError::CatalogQuery(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl CatalogService for M2mHttpClient {
    type Session = M2mSession;

    fn login(&self, credentials: &Credentials) -> Result<M2mSession, LandsatError> {
        let body = json!({
            "username": credentials.username,
            "password": credentials.password(),
        });
        let api_key: Option<String> = post(&self.client, &self.base_url, "login", &body, None)?;
        let api_key = api_key
            .filter(|key| !key.is_empty())
            .ok_or_else(|| LandsatError::Authentication("catalog returned no API key".into()))?;
        tracing::debug!("catalog session opened");
        Ok(M2mSession {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            api_key,
        })
    }
}

impl CatalogSession for M2mSession {
    fn search(
        &self,
        query: &QueryParameters,
        max_results: usize,
    ) -> Result<Vec<SceneRecord>, LandsatError> {
        let body = search_request_body(query, max_results);
        let data: Option<SearchData> = post(
            &self.client,
            &self.base_url,
            "scene-search",
            &body,
            Some(&self.api_key),
        )?;
        Ok(data.map(SearchData::into_records).unwrap_or_default())
    }

    fn logout(self) -> Result<(), LandsatError> {
        let _: Option<Value> = post(
            &self.client,
            &self.base_url,
            "logout",
            &Value::Null,
            Some(&self.api_key),
        )?;
        tracing::debug!("catalog session closed");
        Ok(())
    }
}

pub fn search_request_body(query: &QueryParameters, max_results: usize) -> Value {
    json!({
        "datasetName": query.dataset,
        "maxResults": max_results,
        "metadataType": "summary",
        "sceneFilter": {
            "spatialFilter": {
                "filterType": "mbr",
                "lowerLeft": {
                    "latitude": query.bbox.min_lat,
                    "longitude": query.bbox.min_lon,
                },
                "upperRight": {
                    "latitude": query.bbox.max_lat,
                    "longitude": query.bbox.max_lon,
                },
            },
            "acquisitionFilter": {
                "start": query.start_date.format("%Y-%m-%d").to_string(),
                "end": query.end_date.format("%Y-%m-%d").to_string(),
            },
            "cloudCoverFilter": {
                "min": 0,
                "max": query.max_cloud_cover,
            },
        },
    })
}

/// Decodes a `scene-search` response body.
pub fn parse_search_response(body: &str) -> Result<Vec<SceneRecord>, LandsatError> {
    let envelope: Envelope<SearchData> = serde_json::from_str(body)
        .map_err(|err| LandsatError::CatalogQuery(format!("malformed response: {err}")))?;
    Ok(envelope
        .into_data()?
        .map(SearchData::into_records)
        .unwrap_or_default())
}

fn post<T: DeserializeOwned>(
    client: &Client,
    base_url: &str,
    endpoint: &str,
    body: &Value,
    api_key: Option<&str>,
) -> Result<Option<T>, LandsatError> {
    let url = format!("{base_url}/{endpoint}");
    let mut request = client.post(&url).json(body);
    if let Some(key) = api_key {
        request = request.header("X-Auth-Token", key);
    }
    // Sent once: catalog failures are never retried.
    let response = request
        .send()
        .map_err(|err| LandsatError::CatalogQuery(err.to_string()))?;

    let status = response.status().as_u16();
    if status == 401 || status == 403 {
        return Err(LandsatError::Authentication(format!(
            "catalog rejected credentials (status {status})"
        )));
    }
    if !response.status().is_success() {
        let message = response
            .text()
            .unwrap_or_else(|_| "catalog request failed".to_string());
        return Err(LandsatError::CatalogStatus { status, message });
    }
    let envelope: Envelope<T> = response
        .json()
        .map_err(|err| LandsatError::CatalogQuery(format!("malformed response: {err}")))?;
    envelope.into_data()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    #[serde(default = "Option::default")]
    data: Option<T>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<Option<T>, LandsatError> {
        let Some(code) = self.error_code else {
            return Ok(self.data);
        };
        let message = self.error_message.unwrap_or_default();
        if code.starts_with("AUTH_") {
            Err(LandsatError::Authentication(format!("{code}: {message}")))
        } else {
            Err(LandsatError::CatalogQuery(format!("{code}: {message}")))
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchData {
    #[serde(default)]
    results: Vec<M2mScene>,
}

impl SearchData {
    fn into_records(self) -> Vec<SceneRecord> {
        self.results.into_iter().map(SceneRecord::from).collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct M2mScene {
    entity_id: String,
    display_id: String,
    #[serde(default)]
    temporal_coverage: Option<TemporalCoverage>,
    #[serde(default)]
    cloud_cover: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TemporalCoverage {
    start_date: Option<String>,
}

impl From<M2mScene> for SceneRecord {
    fn from(scene: M2mScene) -> Self {
        let acquisition_date = scene
            .temporal_coverage
            .and_then(|coverage| coverage.start_date)
            .and_then(|value| value.get(..10).map(str::to_string))
            .and_then(|value| NaiveDate::parse_from_str(&value, "%Y-%m-%d").ok());
        let cloud_cover = scene.cloud_cover.and_then(|value| match value {
            Value::Number(number) => number.as_f64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        });
        SceneRecord {
            display_id: scene.display_id,
            entity_id: scene.entity_id,
            acquisition_date,
            cloud_cover,
        }
    }
}

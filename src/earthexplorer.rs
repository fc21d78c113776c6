//! Authenticated archive downloads from USGS EarthExplorer.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use reqwest::Url;
use reqwest::blocking::{Client, Response};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};

use crate::domain::Credentials;
use crate::error::LandsatError;
use crate::http;

const SSO_COOKIE_PREFIX: &str = "EROS_SSO_";
const CHUNK_SIZE: usize = 64 * 1024;

pub trait DownloadService: Send + Sync {
    type Session: DownloadSession;

    fn login(&self, credentials: &Credentials) -> Result<Self::Session, LandsatError>;
}

/// One authenticated download session, reused for every item of a run.
pub trait DownloadSession {
    /// Archive size in bytes for `entity_id` under one product id.
    fn probe_size(&self, product_id: &str, entity_id: &str) -> Result<u64, LandsatError>;

    /// Streams the archive to `destination`, reporting `(done, total)` as it goes.
    fn download(
        &self,
        product_id: &str,
        entity_id: &str,
        destination: &Path,
        progress: &mut dyn FnMut(u64, Option<u64>),
    ) -> Result<u64, LandsatError>;

    fn logout(self) -> Result<(), LandsatError>;
}

#[derive(Debug, Clone)]
pub struct EarthExplorerHttpClient {
    base_url: String,
    login_url: String,
    timeout: Duration,
}

pub struct EarthExplorerSession {
    client: Client,
    base_url: String,
}

impl EarthExplorerHttpClient {
    pub const DEFAULT_URL: &'static str = "https://earthexplorer.usgs.gov";
    pub const DEFAULT_LOGIN_URL: &'static str = "https://ers.cr.usgs.gov/login/";

    pub fn new() -> Self {
        Self::with_urls(Self::DEFAULT_URL, Self::DEFAULT_LOGIN_URL)
    }

    pub fn with_urls(base_url: &str, login_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            login_url: login_url.to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn download_url(base_url: &str, product_id: &str, entity_id: &str) -> String {
        format!("{base_url}/download/{product_id}/{entity_id}/EE/")
    }
}

impl Default for EarthExplorerHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadService for EarthExplorerHttpClient {
    type Session = EarthExplorerSession;

    fn login(&self, credentials: &Credentials) -> Result<EarthExplorerSession, LandsatError> {
        let jar = Arc::new(Jar::default());
        let client = http::client_builder(self.timeout)
            .cookie_provider(Arc::clone(&jar))
            .build()
            .map_err(|err| LandsatError::Download(err.to_string()))?;

        // Transport failures are `Download`; only a rejected login is `Authentication`.
        let page = http::send_with_retries(|| client.get(&self.login_url), LandsatError::Download)?
            .text()
            .map_err(|err| LandsatError::Download(err.to_string()))?;
        let csrf = extract_csrf(&page).ok_or_else(|| {
            LandsatError::Authentication("login page has no CSRF token".to_string())
        })?;

        let form = [
            ("username", credentials.username.as_str()),
            ("password", credentials.password()),
            ("csrf", csrf.as_str()),
        ];
        let response = http::send_with_retries(
            || client.post(&self.login_url).form(&form),
            LandsatError::Download,
        )?;
        if !response.status().is_success() {
            return Err(LandsatError::Authentication(format!(
                "login returned status {}",
                response.status().as_u16()
            )));
        }

        let login_url = Url::parse(&self.login_url)
            .map_err(|err| LandsatError::Authentication(format!("invalid login url: {err}")))?;
        if !has_sso_cookie(jar.as_ref(), &login_url) {
            return Err(LandsatError::Authentication(
                "EarthExplorer rejected the credentials".to_string(),
            ));
        }
        tracing::debug!("download session opened");
        Ok(EarthExplorerSession {
            client,
            base_url: self.base_url.clone(),
        })
    }
}

impl DownloadSession for EarthExplorerSession {
    fn probe_size(&self, product_id: &str, entity_id: &str) -> Result<u64, LandsatError> {
        let url = EarthExplorerHttpClient::download_url(&self.base_url, product_id, entity_id);
        let response =
            http::send_with_retries(|| self.client.get(&url), LandsatError::MetadataProbe)?;
        if !response.status().is_success() {
            return Err(LandsatError::MetadataProbe(format!(
                "{product_id}: status {}",
                response.status().as_u16()
            )));
        }
        ensure_archive(&response).map_err(LandsatError::MetadataProbe)?;
        content_length(&response).ok_or_else(|| {
            LandsatError::MetadataProbe(format!("{product_id}: no content length"))
        })
    }

    fn download(
        &self,
        product_id: &str,
        entity_id: &str,
        destination: &Path,
        progress: &mut dyn FnMut(u64, Option<u64>),
    ) -> Result<u64, LandsatError> {
        let url = EarthExplorerHttpClient::download_url(&self.base_url, product_id, entity_id);
        let mut response =
            http::send_with_retries(|| self.client.get(&url), LandsatError::Download)?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "EarthExplorer download failed".to_string());
            return Err(LandsatError::DownloadStatus { status, message });
        }
        ensure_archive(&response).map_err(LandsatError::Download)?;

        let total = content_length(&response);
        let mut file = File::create(destination)
            .map_err(|err| LandsatError::Filesystem(format!("{}: {err}", destination.display())))?;
        let written = copy_with_progress(&mut response, &mut file, total, progress)?;
        file.flush()
            .map_err(|err| LandsatError::Filesystem(err.to_string()))?;

        if let Some(expected) = total
            && written != expected
        {
            return Err(LandsatError::Download(format!(
                "truncated download: {written} of {expected} bytes"
            )));
        }
        Ok(written)
    }

    fn logout(self) -> Result<(), LandsatError> {
        let url = format!("{}/logout", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| LandsatError::Download(err.to_string()))?;
        if !response.status().is_success() {
            return Err(LandsatError::DownloadStatus {
                status: response.status().as_u16(),
                message: "logout failed".to_string(),
            });
        }
        tracing::debug!("download session closed");
        Ok(())
    }
}

/// Copies `reader` into `writer` in fixed chunks, calling `progress` after each.
pub fn copy_with_progress<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    total: Option<u64>,
    progress: &mut dyn FnMut(u64, Option<u64>),
) -> Result<u64, LandsatError> {
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut done = 0u64;
    progress(done, total);
    loop {
        let read = reader
            .read(&mut buffer)
            .map_err(|err| LandsatError::Download(err.to_string()))?;
        if read == 0 {
            break;
        }
        writer
            .write_all(&buffer[..read])
            .map_err(|err| LandsatError::Filesystem(err.to_string()))?;
        done += read as u64;
        progress(done, total);
    }
    Ok(done)
}

pub fn extract_csrf(page: &str) -> Option<String> {
    static CSRF: OnceLock<Regex> = OnceLock::new();
    let re = CSRF.get_or_init(|| Regex::new(r#"name="csrf"\s+value="([^"]+)""#).expect("valid regex"));
    re.captures(page)
        .and_then(|caps| caps.get(1))
        .map(|value| value.as_str().to_string())
}

fn has_sso_cookie(jar: &Jar, url: &Url) -> bool {
    jar.cookies(url)
        .and_then(|header| header.to_str().map(str::to_string).ok())
        .is_some_and(|cookies| {
            cookies
                .split(';')
                .any(|pair| pair.trim_start().starts_with(SSO_COOKIE_PREFIX))
        })
}

fn content_length(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}

/// An HTML body here means the session lapsed and we got the login page back.
fn ensure_archive(response: &Response) -> Result<(), String> {
    let is_html = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("text/html"));
    if is_html {
        Err("received an HTML page instead of an archive".to_string())
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::net::TcpListener;

    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn extracts_csrf_token() {
        let page = r#"<form><input type="hidden" name="csrf" value="abc123=="/></form>"#;
        assert_eq!(extract_csrf(page).as_deref(), Some("abc123=="));
        assert_eq!(extract_csrf("<form></form>"), None);
    }

    #[test]
    fn download_url_layout() {
        assert_eq!(
            EarthExplorerHttpClient::download_url(
                "https://earthexplorer.usgs.gov",
                "5e83d14f30ea90a9",
                "LC91810252024001LGN00"
            ),
            "https://earthexplorer.usgs.gov/download/5e83d14f30ea90a9/LC91810252024001LGN00/EE/"
        );
    }

    #[test]
    fn sso_cookie_detection() {
        let url: Url = "https://ers.cr.usgs.gov/login/".parse().unwrap();
        let jar = Jar::default();
        jar.add_cookie_str("session=1", &url);
        assert!(!has_sso_cookie(&jar, &url));
        jar.add_cookie_str("EROS_SSO_production_secure=token", &url);
        assert!(has_sso_cookie(&jar, &url));
    }

    #[test]
    fn copy_reports_every_chunk() {
        let data = vec![7u8; CHUNK_SIZE * 2 + 10];
        let mut reader = Cursor::new(data.clone());
        let mut sink = Vec::new();
        let mut reports = Vec::new();
        let written = copy_with_progress(&mut reader, &mut sink, Some(data.len() as u64), &mut |done, total| {
            reports.push((done, total));
        })
        .unwrap();
        assert_eq!(written, data.len() as u64);
        assert_eq!(sink, data);
        assert_eq!(reports.first(), Some(&(0, Some(data.len() as u64))));
        assert_eq!(reports.last().map(|(done, _)| *done), Some(data.len() as u64));
    }

    #[test]
    fn unreachable_login_page_is_a_transport_error() {
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let client = EarthExplorerHttpClient::with_urls(
            &format!("http://127.0.0.1:{port}"),
            &format!("http://127.0.0.1:{port}/login/"),
        );

        let result = client.login(&Credentials::new("user", "secret"));
        assert_matches!(result.err(), Some(LandsatError::Download(_)));
    }
}

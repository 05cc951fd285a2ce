//! Blocking HTTP fetcher built on `reqwest`, with `file://` support.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::blocking::Client;
use tracing::{debug, info};

use super::{is_ok_status, FetchResponse, UrlFetcher};
use crate::config::FetchConfig;
use crate::error::{Result, UserDataError};

/// Fetches includes over HTTP(S), or from disk for `file://` URLs.
pub struct HttpFetcher {
    client: Client,
    redirects_ok: bool,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            redirects_ok: config.allow_redirect_status,
        })
    }

    fn fetch_file(&self, url: &str) -> Result<FetchResponse> {
        let path = file_url_path(url)?;
        match std::fs::read(&path) {
            Ok(content) => Ok(FetchResponse::new(content, 200)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(FetchResponse::new(Vec::new(), 404))
            }
            Err(e) => Err(UserDataError::io(path, e)),
        }
    }
}

impl UrlFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<FetchResponse> {
        if url.starts_with("file://") {
            return self.fetch_file(url);
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(UserDataError::InvalidUrl {
                url: url.to_string(),
                reason: "unsupported scheme".to_string(),
            });
        }

        info!(url, "Fetching include");
        let response = self.client.get(url).send()?;
        let status = response.status().as_u16();
        let content = response.bytes()?.to_vec();
        debug!(url, status, bytes = content.len(), "Include fetched");
        Ok(FetchResponse::new(content, status))
    }

    fn is_success(&self, status: u16) -> bool {
        is_ok_status(status, self.redirects_ok)
    }
}

/// Local path named by a `file://` URL.
fn file_url_path(url: &str) -> Result<PathBuf> {
    let rest = url.strip_prefix("file://").unwrap_or(url);
    // Accept `file:///path` and `file://localhost/path`.
    let path = rest.strip_prefix("localhost").unwrap_or(rest);
    if !path.starts_with('/') {
        return Err(UserDataError::InvalidUrl {
            url: url.to_string(),
            reason: "file URL must name an absolute path".to_string(),
        });
    }
    Ok(PathBuf::from(path))
}

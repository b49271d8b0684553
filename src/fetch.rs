use std::collections::HashMap;
use std::fs;
use std::time::Duration;

use crate::error::{ForgeError, Result};

/// Default per-request timeout
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Generic user agent; some rule hosts reject unknown clients
pub const USER_AGENT: &str = "Mozilla/5.0";

/// Upper bound on a fetched rule list body
const MAX_BODY_SIZE: u64 = 128 * 1024 * 1024;

/// Trait for retrieving raw rule text
pub trait SourceFetcher {
    /// Fetch the text behind `url`
    fn fetch(&self, url: &str) -> Result<String>;
}

/// Blocking HTTP fetcher; also reads `file://` URLs from disk
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self {
            agent: config.into(),
        }
    }

    fn fetch_http(&self, url: &str) -> Result<Vec<u8>> {
        let fetch_error = |message: String| ForgeError::Fetch {
            url: url.to_string(),
            message,
        };

        let mut response = self
            .agent
            .get(url)
            .header("User-Agent", USER_AGENT)
            .call()
            .map_err(|e| fetch_error(e.to_string()))?;

        response
            .body_mut()
            .with_config()
            .limit(MAX_BODY_SIZE)
            .read_to_vec()
            .map_err(|e| fetch_error(e.to_string()))
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_FETCH_TIMEOUT)
    }
}

impl SourceFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<String> {
        let bytes = match url.strip_prefix("file://") {
            Some(path) => fs::read(path).map_err(|e| ForgeError::Fetch {
                url: url.to_string(),
                message: e.to_string(),
            })?,
            None => self.fetch_http(url)?,
        };
        // Invalid UTF-8 is replaced rather than failing the whole list
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// In-memory fetcher keyed by URL; unknown URLs fail like a network error
#[derive(Debug, Clone, Default)]
pub struct MemoryFetcher {
    bodies: HashMap<String, String>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, url: impl Into<String>, body: impl Into<String>) {
        self.bodies.insert(url.into(), body.into());
    }

    pub fn remove(&mut self, url: &str) {
        self.bodies.remove(url);
    }
}

impl SourceFetcher for MemoryFetcher {
    fn fetch(&self, url: &str) -> Result<String> {
        self.bodies.get(url).cloned().ok_or_else(|| ForgeError::Fetch {
            url: url.to_string(),
            message: "not found".to_string(),
        })
    }
}

//! Run configuration.
//!
//! Values come from an optional TOML file; the binary then applies CLI / env
//! overrides on top. Every field has a default so an empty file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::ScrapeError;

pub const DEFAULT_BASE_URL: &str = "https://www.olx.pl/motoryzacja/q-samochody-osobowe/";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScrapeConfig {
    /// Listing URL, with or without `?page=N`.
    pub base_url: Url,
    pub first_page: u32,
    pub last_page: u32,
    pub output_path: PathBuf,
    /// Query parameter carrying the page number.
    pub page_param: String,
    pub accept_language: String,
    pub request_timeout_secs: u64,
    /// Extra attempts per page on transport errors and 5xx. 0 = fail fast.
    pub retries: u32,
    pub respect_robots: bool,
    /// Honour HTTP(S)_PROXY from the environment.
    pub system_proxy: bool,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// End the run early at the first page without ads. Off by default: a
    /// page with no ads path contributes nothing and the loop moves on.
    pub stop_on_empty_page: bool,
    /// Executable hosting the script engine. Defaults to the running binary.
    pub sandbox_program: Option<PathBuf>,
    pub sandbox_timeout_ms: u64,
    pub loop_iteration_limit: u64,
    pub recursion_limit: usize,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base url is valid"),
            first_page: 1,
            last_page: 5,
            output_path: PathBuf::from("ads.json"),
            page_param: "page".to_string(),
            accept_language: "pl-PL,pl;q=0.9,en-US;q=0.8,en;q=0.7".to_string(),
            request_timeout_secs: 25,
            retries: 0,
            respect_robots: true,
            system_proxy: true,
            min_delay_ms: 900,
            max_delay_ms: 2200,
            stop_on_empty_page: false,
            sandbox_program: None,
            sandbox_timeout_ms: 5_000,
            loop_iteration_limit: 50_000_000,
            recursion_limit: 512,
        }
    }
}

impl ScrapeConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ScrapeError> {
        toml::from_str(raw).map_err(|e| ScrapeError::Config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self, ScrapeError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ScrapeError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ScrapeError> {
        if !matches!(self.base_url.scheme(), "http" | "https") {
            return Err(ScrapeError::Config(format!(
                "base_url must be http(s), got {}",
                self.base_url
            )));
        }
        if self.base_url.host_str().is_none() {
            return Err(ScrapeError::Config("base_url has no host".into()));
        }
        if self.first_page == 0 {
            return Err(ScrapeError::Config("first_page starts at 1".into()));
        }
        if self.first_page > self.last_page {
            return Err(ScrapeError::Config(format!(
                "first_page ({}) is after last_page ({})",
                self.first_page, self.last_page
            )));
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(ScrapeError::Config(
                "min_delay_ms must not exceed max_delay_ms".into(),
            ));
        }
        if self.sandbox_timeout_ms == 0 {
            return Err(ScrapeError::Config("sandbox_timeout_ms must be > 0".into()));
        }
        if self.page_param.is_empty() {
            return Err(ScrapeError::Config("page_param is empty".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn sandbox_timeout(&self) -> Duration {
        Duration::from_millis(self.sandbox_timeout_ms)
    }
}

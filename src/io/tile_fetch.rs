//! Tile downloads with a bounded worker pool.

use crate::core::tile_index::{TileCoord, MAX_ZOOM};
use crate::io::workspace::TempWorkspace;
use crate::types::{DemError, DemResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Public AWS terrain tiles bucket
pub const DEFAULT_TILE_BASE_URL: &str = "https://s3.amazonaws.com/elevation-tiles-prod";

/// Tile service endpoint and fetch settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileSourceConfig {
    /// Tiles are requested from `{base_url}/geotiff/{z}/{x}/{y}.tif`
    pub base_url: String,
    pub zoom: u8,
    /// Appended as `?api_key=` for keyed services such as nextzen
    pub api_key: Option<String>,
    /// Upper bound on concurrent tile requests
    pub fetch_workers: usize,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for TileSourceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_TILE_BASE_URL.to_string(),
            zoom: 10,
            api_key: None,
            fetch_workers: 4,
            timeout_secs: 60,
            user_agent: format!("opendem/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl TileSourceConfig {
    pub fn validate(&self) -> DemResult<()> {
        if self.zoom > MAX_ZOOM {
            return Err(DemError::UnsupportedExtent(format!(
                "zoom {} is above the maximum of {}",
                self.zoom, MAX_ZOOM
            )));
        }
        if self.fetch_workers == 0 {
            return Err(DemError::Processing(
                "fetch_workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Cloneable flag used to abort a run between tile requests
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> DemResult<()> {
        if self.is_cancelled() {
            Err(DemError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Raw answer from a tile server
#[derive(Debug, Clone)]
pub struct TileResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl TileResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Blocking GET used to retrieve tile bodies.
///
/// `Err` carries a transport failure (timeout, DNS, connection) that never
/// produced a status line.
pub trait TileTransport: Send + Sync {
    fn get(&self, url: &str) -> Result<TileResponse, String>;
}

/// `reqwest` blocking client transport
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(config: &TileSourceConfig) -> DemResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| DemError::Processing(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl TileTransport for HttpTransport {
    fn get(&self, url: &str) -> Result<TileResponse, String> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| format!("HTTP request failed: {}", e))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .map_err(|e| format!("Failed to read response body: {}", e))?;
        Ok(TileResponse {
            status,
            body: body.to_vec(),
        })
    }
}

/// Downloads tiles into a workspace with bounded parallelism
pub struct TileFetcher {
    config: TileSourceConfig,
    transport: Box<dyn TileTransport>,
}

impl TileFetcher {
    pub fn new(config: TileSourceConfig, transport: Box<dyn TileTransport>) -> Self {
        Self { config, transport }
    }

    /// Fetcher talking HTTP to `config.base_url`
    pub fn http(config: TileSourceConfig) -> DemResult<Self> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::new(config, Box::new(transport)))
    }

    pub fn config(&self) -> &TileSourceConfig {
        &self.config
    }

    /// Fetch every tile, failing the whole batch on the first error.
    ///
    /// Returned paths are sorted by tile coordinate (row-major) regardless of
    /// completion order, so merge order is deterministic.
    pub fn fetch_all(
        &self,
        tiles: &[TileCoord],
        workspace: &TempWorkspace,
        cancel: &CancellationToken,
    ) -> DemResult<Vec<(TileCoord, PathBuf)>> {
        log::info!(
            "Fetching {} tiles from {} with up to {} workers",
            tiles.len(),
            self.config.base_url,
            self.config.fetch_workers
        );

        #[cfg(feature = "parallel")]
        let mut fetched = {
            use rayon::prelude::*;

            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.fetch_workers.max(1))
                .build()
                .map_err(|e| DemError::Processing(format!("Failed to build fetch pool: {}", e)))?;
            pool.install(|| {
                tiles
                    .par_iter()
                    .map(|coord| self.fetch_one(*coord, workspace, cancel))
                    .collect::<DemResult<Vec<_>>>()
            })?
        };

        #[cfg(not(feature = "parallel"))]
        let mut fetched = tiles
            .iter()
            .map(|coord| self.fetch_one(*coord, workspace, cancel))
            .collect::<DemResult<Vec<_>>>()?;

        fetched.sort_by_key(|(coord, _)| *coord);
        Ok(fetched)
    }

    /// Fetch a single tile into `workspace`, named after its coordinate
    pub fn fetch_one(
        &self,
        coord: TileCoord,
        workspace: &TempWorkspace,
        cancel: &CancellationToken,
    ) -> DemResult<(TileCoord, PathBuf)> {
        cancel.check()?;

        let url = coord.url(&self.config.base_url, self.config.api_key.as_deref());
        log::debug!("Requesting tile {} from {}", coord, url);

        let response = self.transport.get(&url).map_err(|reason| DemError::TileFetch {
            coord,
            status: None,
            reason,
        })?;

        if !response.is_success() {
            log::warn!("Tile {} returned HTTP {}", coord, response.status);
            return Err(DemError::TileFetch {
                coord,
                status: Some(response.status),
                reason: format!("HTTP {} for {}", response.status, url),
            });
        }
        if response.body.is_empty() {
            return Err(DemError::TileFetch {
                coord,
                status: Some(response.status),
                reason: "empty response body".to_string(),
            });
        }

        let path = workspace.file(&coord.file_name());
        std::fs::write(&path, &response.body)?;
        log::debug!("Wrote tile {} ({} bytes) to {}", coord, response.body.len(), path.display());

        Ok((coord, path))
    }
}

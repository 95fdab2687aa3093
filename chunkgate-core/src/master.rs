//! Control-plane client for the chunkmaster HTTP endpoints.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::error::RouterError;
use crate::fid::FidRange;
use crate::topology::{ChunkServer, ChunkServerGroups};

const ROUTE_PATH: &str = "/cm/v1/chunkmaster/route";
const FID_PATH: &str = "/cm/v1/chunkmaster/fid";
const DEFAULT_MASTER_PORT: u16 = 8099;

/// The two master calls the router depends on. A trait seam so the fid and
/// topology machinery can be exercised without a live master.
#[async_trait]
pub trait MasterApi: Send + Sync {
    /// Current topology: `group id -> replicas`.
    async fn fetch_route(&self) -> Result<ChunkServerGroups, RouterError>;

    /// A fresh fid lease window.
    async fn fetch_fid_range(&self) -> Result<FidRange, RouterError>;
}

/// HTTP client for a real chunkmaster.
pub struct MasterClient {
    base: String,
    http: reqwest::Client,
}

impl MasterClient {
    /// Builds a client for `addr` (`host` or `host:port`; the master's
    /// default port is assumed when absent).
    pub fn new(addr: &str, request_timeout: Duration) -> Result<Self, RouterError> {
        let base = if addr.contains(':') {
            format!("http://{addr}")
        } else {
            format!("http://{addr}:{DEFAULT_MASTER_PORT}")
        };
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| RouterError::Master(err.to_string()))?;
        Ok(Self { base, http })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, RouterError> {
        let url = format!("{}{path}", self.base);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|err| RouterError::Master(err.to_string()))?;
        if response.status() != StatusCode::OK {
            return Err(RouterError::Master(format!(
                "{url} returned status {}",
                response.status()
            )));
        }
        response
            .json::<T>()
            .await
            .map_err(|err| RouterError::Master(format!("{url} returned malformed JSON: {err}")))
    }
}

#[async_trait]
impl MasterApi for MasterClient {
    async fn fetch_route(&self) -> Result<ChunkServerGroups, RouterError> {
        let groups: BTreeMap<u16, Vec<ChunkServer>> = self.get_json(ROUTE_PATH).await?;
        Ok(ChunkServerGroups { groups })
    }

    async fn fetch_fid_range(&self) -> Result<FidRange, RouterError> {
        self.get_json(FID_PATH).await
    }
}

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Router start parameters shared by the core and the service binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Master control-plane endpoint as `host` or `host:port` (default port 8099).
    pub master_addr: String,
    /// Address the HTTP front binds to.
    pub listen_ip: String,
    /// Port the HTTP front binds to.
    pub listen_port: u16,
    /// Minimum read-write replicas a group must expose to be selectable.
    pub limit_num: usize,
    /// Connection pool capacity per replica.
    pub conn_pool_capacity: usize,
    /// Cadence of the topology and fid pollers.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Dial timeout for replica TCP connections.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Overall timeout for master HTTP requests.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Largest fragment body accepted by the upload path.
    pub max_body_bytes: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            master_addr: "127.0.0.1:8099".to_string(),
            listen_ip: "0.0.0.0".to_string(),
            listen_port: 8090,
            limit_num: 2,
            conn_pool_capacity: 8,
            poll_interval: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(5),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

const fn default_max_body_bytes() -> usize {
    64 * 1024 * 1024
}

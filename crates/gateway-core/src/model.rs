//! The data model: `Model` exclusively owns its `Endpoint`s; an `Endpoint`
//! exclusively owns its `Monitor` and `Limiter` (spec §3).

use crate::monitor::{Monitor, MonitorConfig};
use gateway_limiter::{Limiter, LimiterConfigBuilder};

/// One concrete upstream URL serving a [`Model`]. Identity within a model
/// is its position in `Model::endpoints`, stable for the process lifetime.
pub struct Endpoint {
    pub name: Option<String>,
    pub url: String,
    pub requests_per_second: usize,
    pub monitor: Monitor,
    pub limiter: Limiter,
}

impl Endpoint {
    pub fn builder(url: impl Into<String>) -> EndpointBuilder {
        EndpointBuilder {
            name: None,
            url: url.into(),
            requests_per_second: 100,
            monitor_config: MonitorConfig::default(),
            cluster_id: None,
        }
    }
}

pub struct EndpointBuilder {
    name: Option<String>,
    url: String,
    requests_per_second: usize,
    monitor_config: MonitorConfig,
    cluster_id: Option<String>,
}

impl EndpointBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn requests_per_second(mut self, rps: usize) -> Self {
        self.requests_per_second = rps;
        self
    }

    pub fn monitor_config(mut self, config: MonitorConfig) -> Self {
        self.monitor_config = config;
        self
    }

    /// Stable cluster id (spec §6: `{cortexId}-{model}-{endpointIndex}-limiter`).
    pub fn cluster_id(mut self, id: impl Into<String>) -> Self {
        self.cluster_id = Some(id.into());
        self
    }

    pub fn build(self, kv: gateway_kv::KvHandle) -> Endpoint {
        let mut limiter_config = LimiterConfigBuilder::new().requests_per_second(self.requests_per_second);
        if let Some(id) = self.cluster_id {
            limiter_config = limiter_config.cluster_id(id);
        }
        Endpoint {
            name: self.name,
            url: self.url,
            requests_per_second: self.requests_per_second,
            monitor: Monitor::new(self.monitor_config),
            limiter: Limiter::new(limiter_config.build(), kv),
        }
    }
}

/// A named upstream family, loaded once at startup. The endpoint sequence
/// is mutable only through explicit reconfiguration.
pub struct Model {
    pub name: String,
    pub supports_streaming: bool,
    pub max_token_length: usize,
    pub endpoints: Vec<Endpoint>,
}

impl Model {
    pub fn new(name: impl Into<String>, supports_streaming: bool, max_token_length: usize, endpoints: Vec<Endpoint>) -> Self {
        Self {
            name: name.into(),
            supports_streaming,
            max_token_length,
            endpoints,
        }
    }
}

use std::time::Duration;

/// Configuration for the shared KV/pub-sub adapter.
///
/// `connection_string: None` is the "fully local" branch spec §4.6/§6
/// requires explicitly: C2 falls back to local limiters and C5 to local
/// fan-out only.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct KvConfig {
    pub connection_string: Option<String>,
    #[serde(with = "duration_millis", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            connect_timeout: default_connect_timeout(),
        }
    }
}

/// Builder for [`KvConfig`], the teacher's `…ConfigBuilder` idiom.
#[derive(Default)]
pub struct KvConfigBuilder {
    config: KvConfig,
}

impl KvConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_string(mut self, s: impl Into<String>) -> Self {
        self.config.connection_string = Some(s.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn build(self) -> KvConfig {
        self.config
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

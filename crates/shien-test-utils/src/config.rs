//! Configuration builders for tests.

use shien_config::AppConfig;

/// Fluent builder for [`AppConfig`] in tests.
///
/// ```ignore
/// let config = TestConfigBuilder::new().grace_period_secs(1).build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn socket_path(mut self, path: &str) -> Self {
        self.config.daemon.socket_path = Some(path.to_string());
        self
    }

    pub fn grace_period_secs(mut self, secs: u64) -> Self {
        self.config.daemon.grace_period_secs = secs;
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.config.client.timeout_ms = ms;
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    /// Render the config as TOML, for tests that go through a config file.
    pub fn to_toml(&self) -> String {
        toml::to_string(&self.config).expect("AppConfig serializes to TOML")
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

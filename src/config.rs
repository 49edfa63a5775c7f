//! Server configuration: fixture payloads and logging settings.
//!
//! Fixture documents are treated as opaque JSON supplied by configuration;
//! the server only touches the one field the register probe overlays.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Embedded default configuration, used when no file is supplied.
pub const DEFAULT_CONFIG: &str = include_str!("../assets/default-fixtures.yaml");

/// Main configuration for the mock API server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Static event documents returned by the fixture endpoint
    pub events: Vec<serde_json::Value>,

    /// Presence probe wiring for the fixture overlay
    pub register_probe: RegisterProbe,

    /// Static form-schema document served at /modules
    pub modules: serde_json::Value,

    /// Global settings
    #[serde(default)]
    pub settings: GlobalSettings,
}

/// Wiring for the fixture overlay: when an event record exists for
/// `event_id`, the fixture document with `fixture_id` has its
/// `existingRegister` field set to `true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterProbe {
    pub event_id: String,
    pub fixture_id: String,
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// Log dispatched mock requests
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log dispatch misses
    #[serde(default = "default_true")]
    pub log_unmatched: bool,
}

fn default_true() -> bool {
    true
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            log_matches: true,
            log_unmatched: true,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        // The embedded default document must always parse.
        serde_yaml::from_str(DEFAULT_CONFIG)
            .unwrap_or_else(|err| panic!("embedded default config is invalid: {err}"))
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.events.is_empty() {
            anyhow::bail!("fixture event list cannot be empty");
        }
        for (i, doc) in self.events.iter().enumerate() {
            if !doc.is_object() {
                anyhow::bail!("fixture event {} is not a JSON object", i);
            }
            if doc.get("id").and_then(|v| v.as_str()).is_none() {
                anyhow::bail!("fixture event {} is missing a string `id`", i);
            }
        }

        if self.register_probe.event_id.is_empty() {
            anyhow::bail!("register_probe.event_id cannot be empty");
        }
        let target_exists = self.events.iter().any(|doc| {
            doc.get("id").and_then(|v| v.as_str()) == Some(self.register_probe.fixture_id.as_str())
        });
        if !target_exists {
            anyhow::bail!(
                "register_probe.fixture_id `{}` does not match any fixture event",
                self.register_probe.fixture_id
            );
        }

        Ok(())
    }
}

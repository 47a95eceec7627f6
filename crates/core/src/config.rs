use std::{collections::BTreeMap, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Scan-wide knobs. Every field has a default so a config file only needs
/// the values it overrides.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScanConfig {
    pub name: Option<String>,
    /// Events further than this from the target are recorded but only
    /// routed to modules whose distance modifier reaches them.
    pub max_scope_distance: u32,
    pub module_concurrency: usize,
    pub global_concurrency: usize,
    pub blocking_concurrency: usize,
    pub queue_high_water: usize,
    pub backpressure_timeout_ms: u64,
    pub emit_scan_events: bool,
    pub log_filter: Option<String>,
    pub modules: BTreeMap<String, toml::Table>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            name: None,
            max_scope_distance: 0,
            module_concurrency: 1,
            global_concurrency: 32,
            blocking_concurrency: 4,
            queue_high_water: 1000,
            backpressure_timeout_ms: 30_000,
            emit_scan_events: true,
            log_filter: None,
            modules: BTreeMap::new(),
        }
    }
}

impl ScanConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let cfg: ScanConfig = toml::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("module_concurrency", self.module_concurrency),
            ("global_concurrency", self.global_concurrency),
            ("blocking_concurrency", self.blocking_concurrency),
            ("queue_high_water", self.queue_high_water),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(EngineError::Config {
                    reason: format!("{field} must be > 0"),
                });
            }
        }
        Ok(())
    }

    pub fn backpressure_timeout(&self) -> Duration {
        Duration::from_millis(self.backpressure_timeout_ms)
    }

    pub fn module_options(&self, module: &str) -> Option<&toml::Table> {
        self.modules.get(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = ScanConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, ScanConfig::default());
    }

    #[test]
    fn parses_overrides_and_module_tables() {
        let cfg = ScanConfig::from_toml_str(
            r#"
            name = "nightly"
            max_scope_distance = 2
            module_concurrency = 4

            [modules.json]
            path = "/tmp/out.jsonl"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.name.as_deref(), Some("nightly"));
        assert_eq!(cfg.max_scope_distance, 2);
        assert_eq!(cfg.module_concurrency, 4);
        assert_eq!(cfg.global_concurrency, 32);
        let json = cfg.module_options("json").unwrap();
        assert_eq!(json.get("path").and_then(|v| v.as_str()), Some("/tmp/out.jsonl"));
    }

    #[test]
    fn rejects_zero_concurrency() {
        let err = ScanConfig::from_toml_str("global_concurrency = 0").unwrap_err();
        assert!(matches!(err, EngineError::Config { .. }));
    }
}

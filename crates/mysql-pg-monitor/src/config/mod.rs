//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Replace the shard list (CLI `--databases` override) and re-validate.
    pub fn with_databases(mut self, databases: Vec<String>) -> Result<Self> {
        self.source.databases = databases;
        self.validate()?;
        Ok(self)
    }

    /// Typed scheduling parameters for the engine.
    pub fn settings(&self) -> ScheduleSettings {
        self.monitor.settings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const YAML: &str = r#"
source:
  host: mysql.internal
  user: monitor
  password: secret
  databases: [shard_a, " shard_b ", "", shard_a]
  ignored_table_prefixes: ["tmp_", " "]
target:
  host: pg.internal
  database: warehouse
  user: monitor
monitor:
  refresh_interval_secs: 5
  source_refresh_ratio: 4
"#;

    #[test]
    fn test_from_yaml_applies_defaults() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(config.source.port, 3306);
        assert_eq!(config.target.port, 5432);
        assert_eq!(config.target.ssl_mode, "disable");
        assert_eq!(config.monitor.max_tables_display, 50);
        assert_eq!(config.monitor.history_capacity, 120);
    }

    #[test]
    fn test_shard_names_trimmed_and_deduplicated() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(config.source.shard_names(), vec!["shard_a", "shard_b"]);
        assert_eq!(config.source.ignored_prefixes(), vec!["tmp_"]);
    }

    #[test]
    fn test_settings() {
        let settings = Config::from_yaml(YAML).unwrap().settings();
        assert_eq!(settings.refresh_interval, Duration::from_secs(5));
        assert_eq!(settings.source_refresh_ratio, 4);
        assert_eq!(settings.throughput_window, 10);
    }

    #[test]
    fn test_with_databases_override() {
        let config = Config::from_yaml(YAML)
            .unwrap()
            .with_databases(vec!["only_me".into()])
            .unwrap();
        assert_eq!(config.source.shard_names(), vec!["only_me"]);

        let config = Config::from_yaml(YAML).unwrap();
        assert!(config.with_databases(vec![" ".into()]).is_err());
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(Config::from_yaml("source: [").is_err());
    }
}

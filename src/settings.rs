use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Service configuration, layered from defaults, an optional TOML/YAML
/// file and `STAMPEDE__`-prefixed environment variables (for example
/// `STAMPEDE__INSIGHTS__API_KEY`).
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Settings {
    pub settings: ServiceSettings,
    pub identity: IdentitySettings,
    pub thresholds: ThresholdSettings,
    pub auth: AuthSettings,
    pub insights: InsightsSettings,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServiceSettings {
    /// Loopback port the sensor feed sends JSON datagrams to.
    pub udp_port: u16,
    /// Port the web API and websocket are served on.
    pub web_port: u16,
    /// Directory holding the persisted state snapshot.
    pub data_dir: PathBuf,
    pub debug: bool,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            udp_port: 8910,
            web_port: 8080,
            data_dir: dirs::home_dir()
                .map(|home| home.join(".stampede-guard"))
                .unwrap_or_else(|| PathBuf::from(".stampede-guard")),
            debug: false,
        }
    }
}

/// Identity the monitored user reports as. When no id is configured
/// and no persisted snapshot exists, one is generated at startup.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct IdentitySettings {
    pub user_id: Option<String>,
    pub user_name: Option<String>,
}

/// Seed values for the admin-editable thresholds, used only when no
/// persisted snapshot exists yet.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ThresholdSettings {
    pub panic: u32,
    pub shake: u32,
}

impl Default for ThresholdSettings {
    fn default() -> Self {
        Self {
            panic: 85,
            shake: 15,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuthSettings {
    /// Accepted admin passwords. A shared-secret gate for a demo, not a
    /// credential system.
    pub admin_passwords: Vec<String>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            admin_passwords: vec!["Demon@Slayer".to_string(), "1234567".to_string()],
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InsightsSettings {
    pub enabled: bool,
    /// Base URL of the generative-AI maps service. Overridable so tests
    /// can point it at a local mock.
    pub base_url: String,
    pub model: String,
    /// API key; usually supplied via environment rather than the file.
    pub api_key: String,
    pub timeout_seconds: u64,
}

impl Default for InsightsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-2.5-flash".to_string(),
            api_key: String::new(),
            timeout_seconds: 15,
        }
    }
}

impl Settings {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // 1. Defaults
        let default_settings = Settings::default();
        builder = builder.add_source(Config::try_from(&default_settings)?);

        // 2. File, explicit or from the standard search path
        if let Some(path) = config_path {
            if path.exists() {
                builder = builder.add_source(File::from(path));
            } else {
                warn!("Configuration file not found: {:?}", path);
            }
        } else if let Some(home) = dirs::home_dir() {
            let toml_path = home.join(".stampede-guard").join("settings.toml");
            let yaml_path = home.join(".stampede-guard").join("settings.yaml");

            if toml_path.exists() {
                builder = builder.add_source(File::from(toml_path));
            } else if yaml_path.exists() {
                builder = builder.add_source(File::from(yaml_path));
            }
        }

        // 3. Environment variables
        builder = builder.add_source(
            Environment::with_prefix("STAMPEDE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;

        // Warn on sections that nothing will read
        if let Ok(table) = config.clone().try_deserialize::<serde_json::Value>() {
            if let Some(map) = table.as_object() {
                let known_sections = ["settings", "identity", "thresholds", "auth", "insights"];
                for key in map.keys() {
                    if !known_sections.contains(&key.to_lowercase().as_str()) {
                        warn!("Unknown configuration section: {}", key);
                    }
                }
            }
        }

        config.try_deserialize()
    }

    pub fn dump(&self, format: &str) -> Result<String, Box<dyn std::error::Error>> {
        match format.to_lowercase().as_str() {
            "toml" => Ok(toml::to_string_pretty(self)?),
            "yaml" | "yml" => Ok(serde_yaml::to_string(self)?),
            _ => Err("Unsupported format".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File as StdFile;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.settings.udp_port, 8910);
        assert_eq!(settings.settings.web_port, 8080);
        assert_eq!(settings.thresholds.panic, 85);
        assert_eq!(settings.thresholds.shake, 15);
        assert_eq!(settings.auth.admin_passwords.len(), 2);
        assert_eq!(settings.insights.model, "gemini-2.5-flash");
    }

    #[test]
    fn test_load_toml() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("settings.toml");
        let mut file = StdFile::create(&config_path).unwrap();
        writeln!(
            file,
            "[settings]\nweb_port = 9000\n\n[thresholds]\npanic = 70"
        )
        .unwrap();

        let settings = Settings::new(Some(config_path)).unwrap();
        assert_eq!(settings.settings.web_port, 9000);
        assert_eq!(settings.thresholds.panic, 70);
        // Untouched values keep their defaults.
        assert_eq!(settings.settings.udp_port, 8910);
        assert_eq!(settings.thresholds.shake, 15);
    }

    #[test]
    fn test_load_yaml() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("settings.yaml");
        let mut file = StdFile::create(&config_path).unwrap();
        writeln!(
            file,
            "identity:\n  user_id: \"USER-99\"\n  user_name: \"Ana\""
        )
        .unwrap();

        let settings = Settings::new(Some(config_path)).unwrap();
        assert_eq!(settings.identity.user_id.as_deref(), Some("USER-99"));
        assert_eq!(settings.identity.user_name.as_deref(), Some("Ana"));
    }

    #[test]
    fn test_dump_toml() {
        let settings = Settings::default();
        let dumped = settings.dump("toml").unwrap();
        assert!(dumped.contains("udp_port = 8910"));
        assert!(dumped.contains("panic = 85"));
    }

    #[test]
    fn test_dump_rejects_unknown_format() {
        let settings = Settings::default();
        assert!(settings.dump("ini").is_err());
    }
}

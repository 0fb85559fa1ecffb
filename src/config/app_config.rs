use serde::Deserialize;

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backend selection for the storage builder
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    /// One of `in_memory`, `account` or `development`
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Required by the `account` backend
    #[serde(default)]
    pub connection_string: Option<String>,
    #[serde(default)]
    pub serializer: SerializerFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SerializerFormat {
    #[default]
    Json,
    PrettyJson,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

fn default_backend() -> String {
    "in_memory".to_string()
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            connection_string: None,
            serializer: SerializerFormat::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl AppConfig {
    /// Loads `config/default`, `config/local` and `CLOUD_STORAGE__*` variables, in that order
    ///
    /// Invalid values are reported instead of being replaced by defaults.
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_with_env(None)
    }

    fn load_with_env(vars: Option<config::Map<String, String>>) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("CLOUD_STORAGE")
                    .separator("__")
                    .try_parsing(true)
                    .source(vars),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();

        assert_eq!(config.storage.backend, "in_memory");
        assert!(config.storage.connection_string.is_none());
        assert_eq!(config.storage.serializer, SerializerFormat::Json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_deserialize_from_source() {
        let source = r#"{
            "storage": {
                "backend": "account",
                "connection_string": "AccountName=a;AccountKey=a2V5",
                "serializer": "pretty_json"
            },
            "logging": { "level": "debug", "format": "json" }
        }"#;

        let config: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Json))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.storage.backend, "account");
        assert_eq!(config.storage.serializer, SerializerFormat::PrettyJson);
        assert!(matches!(config.logging.format, LogFormat::Json));
    }

    fn env(pairs: &[(&str, &str)]) -> config::Map<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn test_environment_selects_backend() {
        let config = AppConfig::load_with_env(Some(env(&[
            ("CLOUD_STORAGE__STORAGE__BACKEND", "development"),
            ("CLOUD_STORAGE__STORAGE__SERIALIZER", "pretty_json"),
        ])))
        .unwrap();

        assert_eq!(config.storage.backend, "development");
        assert_eq!(config.storage.serializer, SerializerFormat::PrettyJson);
    }

    #[test]
    fn test_invalid_environment_value_is_an_error() {
        let result = AppConfig::load_with_env(Some(env(&[
            ("CLOUD_STORAGE__STORAGE__BACKEND", "account"),
            ("CLOUD_STORAGE__STORAGE__SERIALIZER", "xml"),
        ])));

        assert!(result.is_err());
    }

    #[test]
    fn test_missing_sections_fall_back_to_defaults() {
        let config: AppConfig = config::Config::builder()
            .add_source(config::File::from_str("{}", config::FileFormat::Json))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.storage.backend, "in_memory");
        assert_eq!(config.logging.level, "info");
    }
}

use serde_derive::Deserialize;
use std::path::Path;

/// Logging sink configuration, deserialized from the `[logging]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub destination: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_owned(),
            destination: "stderr".to_owned(),
        }
    }
}

/// Loads a `serde`-deserializable configuration struct from a TOML file on
/// disk. Panics with a descriptive message on read or parse failure rather
/// than returning a `Result`, since a malformed startup configuration is
/// always fatal and the caller has no useful recovery beyond reporting it.
pub fn load<T, P>(path: P) -> T
where
    T: serde::de::DeserializeOwned,
    P: AsRef<Path>,
{
    serdeconv::from_toml_file(path.as_ref())
        .unwrap_or_else(|err| panic!("failed to load configuration from {:?}: {}", path.as_ref(), err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_logging_config_is_stderr_info() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.destination, "stderr");
    }
}

//! `ReflectorConfig`: the TOML-deserialized shape of `reflectord`'s
//! `--config` file. Mirrors the teacher's `GameConfig` (a plain `Deserialize`
//! struct with a `Default` and a `load` associated function backed by
//! `serdeconv`), generalised to the reflector's listener/sender/processor/
//! route sections.

use std::fmt;
use std::path::Path;

use serde_derive::Deserialize;

use flux::config::LoggingConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReflectorConfig {
    pub logging: LoggingConfig,
    /// Local address the administrative RAP/TCP front-end binds to.
    pub admin_bind: String,
    /// Bound on the listener→sender data queue connecting every listener
    /// module's fan-out to every sender module's drain loop.
    pub pipeline_capacity: usize,
    pub listeners: Vec<ListenerConfig>,
    pub senders: Vec<SenderConfig>,
    pub filters: Vec<FilterConfig>,
    pub routes: Vec<RouteConfig>,
}

impl Default for ReflectorConfig {
    fn default() -> ReflectorConfig {
        ReflectorConfig {
            logging: LoggingConfig::default(),
            admin_bind: "127.0.0.1:7000".to_owned(),
            pipeline_capacity: 4096,
            listeners: Vec::new(),
            senders: Vec::new(),
            filters: Vec::new(),
            routes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    /// Address the `listener/udp` module binds and receives datagrams on.
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SenderConfig {
    /// Local address the shared outbound `sender/udp` socket binds to.
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    /// Processor name this filter is registered under; referenced by
    /// `RouteConfig::processors`.
    pub name: String,
    /// Bytes compared against the head of each packet's buffer; see the
    /// filter processor's `min(sample, buffer)` comparison rule.
    pub sample: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    /// A destination CIDR, e.g. `"10.1.0.0/16"`.
    pub destination: String,
    /// Processor names forming the path applied to clients whose address
    /// falls under `destination`, in order.
    pub processors: Vec<String>,
}

#[derive(Debug)]
pub struct ConfigError(String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ConfigError {}

/// Loads and parses `path` as a `ReflectorConfig`. Returns a descriptive
/// error instead of panicking (unlike `flux::config::load`'s teacher-style
/// `.expect()`), so `main` can map a bad config file onto the documented
/// exit code rather than an uncontrolled abort.
pub fn load(path: impl AsRef<Path>) -> Result<ReflectorConfig, ConfigError> {
    serdeconv::from_toml_file(path.as_ref()).map_err(|err| ConfigError(format!("{}: {}", path.as_ref().display(), err)))
}

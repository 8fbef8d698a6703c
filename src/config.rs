//! Configuration for the [crate::app::App] and [crate::runner::Runner].
//!
//! Everything has a default, so an empty JSON object is a valid configuration.
use crate::{errors::ServerError, runner::Signal};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::PathBuf, time::Duration};

/// Routing configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// The most middlewares a single route may be wrapped in, header checks included.
    pub middleware_max: usize,

    /// Method name -> HTTP method, used by [crate::route::Route::map_type].
    pub method_mapping: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            middleware_max: 256,
            method_mapping: default_method_mapping(),
        }
    }
}

fn default_method_mapping() -> BTreeMap<String, String> {
    [
        ("Create", "POST"),
        ("Delete", "DELETE"),
        ("Update", "PUT"),
        ("Get", "GET"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl Config {
    pub fn from_json(s: &str) -> Result<Self, ServerError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_file<P>(path: P) -> Result<Self, ServerError>
    where
        P: AsRef<std::path::Path>,
    {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

/// Certificate and private key files, both PEM encoded.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TlsConfig {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

/// Runner configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Included in log messages to tell servers apart.
    pub name: String,

    /// If set, [crate::runner::Runner::start] refuses any other address.
    pub addr: Option<String>,

    /// Signals that trigger a graceful shutdown.
    pub signals: Vec<Signal>,

    /// Serve TLS with these files.
    pub tls: Option<TlsConfig>,

    /// How long a shutdown waits for in-flight requests. Unbounded if unset.
    pub shutdown_timeout_secs: Option<u64>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            addr: None,
            signals: Signal::defaults(),
            tls: None,
            shutdown_timeout_secs: None,
        }
    }
}

impl RunnerConfig {
    pub fn from_json(s: &str) -> Result<Self, ServerError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn shutdown_timeout(&self) -> Option<Duration> {
        self.shutdown_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.middleware_max, 256);
        assert_eq!(config.method_mapping.get("Update").map(String::as_str), Some("PUT"));

        let config = Config::from_json(r#"{"middleware_max": 4, "method_mapping": {"List": "GET"}}"#)
            .unwrap();
        assert_eq!(config.middleware_max, 4);
        assert_eq!(config.method_mapping.len(), 1);

        assert!(Config::from_json("{\"middleware_max\": \"lots\"}").is_err());
    }

    #[test]
    fn test_runner_config() {
        let config = RunnerConfig::from_json("{}").unwrap();
        assert_eq!(config.signals, Signal::defaults());
        assert_eq!(config.shutdown_timeout(), None);

        let config = RunnerConfig::from_json(
            r#"{
                "name": "api",
                "addr": "127.0.0.1:8080",
                "signals": ["terminate"],
                "tls": {"cert_file": "cert.pem", "key_file": "key.pem"},
                "shutdown_timeout_secs": 5
            }"#,
        )
        .unwrap();

        assert_eq!(config.name, "api");
        assert_eq!(config.signals, vec![Signal::Terminate]);
        assert_eq!(config.tls.as_ref().unwrap().key_file, PathBuf::from("key.pem"));
        assert_eq!(config.shutdown_timeout(), Some(Duration::from_secs(5)));
    }
}

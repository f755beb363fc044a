use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_ENDPOINT_URL: &str = "opc.tcp://0.0.0.0:4840/sensor-sim/";
pub const DEFAULT_DEVICE_TICK_MS: u64 = 1000;
pub const DEFAULT_PUBLISH_INTERVAL_MS: u64 = 5000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config descriptor {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config descriptor {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("config descriptor field `{0}` is empty")]
    EmptyField(&'static str),
    #[error("invalid endpoint url `{0}`: {1}")]
    InvalidEndpoint(String, &'static str),
}

/// Config descriptor produced by the one-time provisioning step.
///
/// The serialized form is the contract with the provisioning tool, so field
/// names are fixed; `endpoint` also accepts the legacy descriptor key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    #[serde(alias = "aws_iot_endpoint")]
    pub endpoint: String,
    pub client_id: String,
    pub topic: String,
    pub cert_path: String,
    pub key_path: String,
    pub root_ca_path: String,
}

impl CloudConfig {
    /// Load and validate a config descriptor from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.is_empty() {
            return Err(ConfigError::EmptyField("endpoint"));
        }
        if self.client_id.is_empty() {
            return Err(ConfigError::EmptyField("client_id"));
        }
        if self.topic.is_empty() {
            return Err(ConfigError::EmptyField("topic"));
        }
        Ok(())
    }
}

/// Runtime settings for the simulator and bridge, assembled at startup and
/// passed into constructors. There is no process-global configuration.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub endpoint_url: String,
    pub device_tick: Duration,
    pub publish_interval: Duration,
    pub connect_timeout: Duration,
    pub operation_timeout: Duration,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            endpoint_url: DEFAULT_ENDPOINT_URL.to_string(),
            device_tick: Duration::from_millis(DEFAULT_DEVICE_TICK_MS),
            publish_interval: Duration::from_millis(DEFAULT_PUBLISH_INTERVAL_MS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            operation_timeout: Duration::from_millis(DEFAULT_OPERATION_TIMEOUT_MS),
        }
    }
}

/// Parsed form of an `opc.tcp://host:port/<namespace>/` endpoint URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub namespace: String,
}

impl Endpoint {
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let rest = url
            .strip_prefix("opc.tcp://")
            .ok_or_else(|| ConfigError::InvalidEndpoint(url.to_string(), "missing opc.tcp:// scheme"))?;

        let (authority, path) = match rest.split_once('/') {
            Some((authority, path)) => (authority, path),
            None => (rest, ""),
        };

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    ConfigError::InvalidEndpoint(url.to_string(), "port is not a number")
                })?;
                (host, port)
            }
            None => (authority, 4840),
        };
        if host.is_empty() {
            return Err(ConfigError::InvalidEndpoint(url.to_string(), "empty host"));
        }

        let namespace = path.trim_matches('/');
        if namespace.is_empty() {
            return Err(ConfigError::InvalidEndpoint(url.to_string(), "missing namespace path"));
        }
        if namespace.contains('/') {
            return Err(ConfigError::InvalidEndpoint(url.to_string(), "namespace must be a single path segment"));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            namespace: namespace.to_string(),
        })
    }

    /// Address to bind the protocol server on.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Address a local client should dial. A wildcard bind host is rewritten
    /// to loopback.
    pub fn client_addr(&self) -> String {
        let host = if self.host == "0.0.0.0" { "127.0.0.1" } else { &self.host };
        format!("{}:{}", host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_parsing() {
        let endpoint = Endpoint::parse("opc.tcp://0.0.0.0:4840/sensor-sim/").unwrap();
        assert_eq!(endpoint.host, "0.0.0.0");
        assert_eq!(endpoint.port, 4840);
        assert_eq!(endpoint.namespace, "sensor-sim");
        assert_eq!(endpoint.bind_addr(), "0.0.0.0:4840");
        assert_eq!(endpoint.client_addr(), "127.0.0.1:4840");
    }

    #[test]
    fn test_endpoint_default_port() {
        let endpoint = Endpoint::parse("opc.tcp://plant-gw/floor3/").unwrap();
        assert_eq!(endpoint.port, 4840);
        assert_eq!(endpoint.client_addr(), "plant-gw:4840");
    }

    #[test]
    fn test_endpoint_rejects_bad_urls() {
        assert!(Endpoint::parse("tcp://0.0.0.0:4840/x/").is_err());
        assert!(Endpoint::parse("opc.tcp://:4840/x/").is_err());
        assert!(Endpoint::parse("opc.tcp://0.0.0.0:4840/").is_err());
        assert!(Endpoint::parse("opc.tcp://0.0.0.0:notaport/x/").is_err());
        assert!(Endpoint::parse("opc.tcp://0.0.0.0:4840/a/b/").is_err());
    }

    #[test]
    fn test_descriptor_accepts_legacy_endpoint_key() {
        let raw = r#"{
            "aws_iot_endpoint": "example-ats.iot.eu-west-1.amazonaws.com",
            "client_id": "plant-sensor-01",
            "topic": "sensors/demo",
            "cert_path": "certs/plant-sensor-01-cert.pem",
            "key_path": "certs/plant-sensor-01-private.key",
            "root_ca_path": "certs/root-ca.pem"
        }"#;
        let config: CloudConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.endpoint, "example-ats.iot.eu-west-1.amazonaws.com");
        assert_eq!(config.topic, "sensors/demo");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_descriptor_rejects_empty_fields() {
        let config = CloudConfig {
            endpoint: String::new(),
            client_id: "c".to_string(),
            topic: "t".to_string(),
            cert_path: "a".to_string(),
            key_path: "b".to_string(),
            root_ca_path: "c".to_string(),
        };
        assert!(config.validate().is_err());
    }
}

/*
 *     Copyright 2025 The Switchyard Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use switchyard_core::{
    error::{ErrorType, OrErr},
    Result,
};
use tokio::fs;
use tracing::instrument;
use validator::{Validate, ValidationError};

/// NAME is the name of the gateway.
pub const NAME: &str = "switchyard";

/// Returns the default config path for the gateway.
#[inline]
pub fn default_gateway_config_path() -> PathBuf {
    crate::default_config_dir().join("gateway.yaml")
}

/// Returns the default log directory for the gateway.
#[inline]
pub fn default_gateway_log_dir() -> PathBuf {
    crate::default_log_dir().join(NAME)
}

/// default_response_header_timeout is the default time to wait for upstream response headers.
#[inline]
pub fn default_response_header_timeout() -> Duration {
    Duration::from_secs(300)
}

#[inline]
fn default_max_idle_conns() -> usize {
    240
}

#[inline]
fn default_max_idle_conns_per_host() -> usize {
    120
}

#[inline]
fn default_max_conns_per_host() -> usize {
    240
}

#[inline]
fn default_max_upstream_clients() -> usize {
    5000
}

#[inline]
fn default_client_idle_ttl() -> Duration {
    Duration::from_secs(900)
}

/// ConnectionPoolIsolation decides which requests may share a pooled upstream client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
pub enum ConnectionPoolIsolation {
    /// None shares one client per proxy between all accounts.
    #[serde(rename = "none", alias = "proxy")]
    None,

    /// Account gives every account its own client, replaced when the account's proxy changes.
    #[serde(rename = "account")]
    Account,

    /// AccountProxy gives every (account, proxy) pair its own client.
    #[default]
    #[serde(rename = "account_proxy", alias = "account+proxy")]
    AccountProxy,
}

/// ConnectionPoolIsolation implements the isolation helpers.
impl ConnectionPoolIsolation {
    /// is_account_scoped returns true if pooled clients are never shared between accounts.
    pub fn is_account_scoped(&self) -> bool {
        match self {
            ConnectionPoolIsolation::None => false,
            ConnectionPoolIsolation::Account | ConnectionPoolIsolation::AccountProxy => true,
        }
    }
}

/// ConnectionPoolIsolation implements Display.
impl fmt::Display for ConnectionPoolIsolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionPoolIsolation::None => write!(f, "none"),
            ConnectionPoolIsolation::Account => write!(f, "account"),
            ConnectionPoolIsolation::AccountProxy => write!(f, "account_proxy"),
        }
    }
}

/// Gateway is the upstream connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Validate, Deserialize)]
#[validate(schema(function = "validate_gateway"))]
#[serde(default, rename_all = "camelCase")]
pub struct Gateway {
    /// Response header timeout is the maximum time to wait for the upstream response headers,
    /// a zero value falls back to the default.
    #[serde(
        default = "default_response_header_timeout",
        with = "humantime_serde"
    )]
    pub response_header_timeout: Duration,

    /// Max idle conns is the maximum number of idle connections kept by one upstream client.
    #[serde(default = "default_max_idle_conns")]
    pub max_idle_conns: usize,

    /// Max idle conns per host is the maximum number of idle connections kept per upstream host.
    #[serde(default = "default_max_idle_conns_per_host")]
    pub max_idle_conns_per_host: usize,

    /// Max conns per host limits the concurrent requests dispatched to one upstream host,
    /// 0 means unlimited.
    #[serde(default = "default_max_conns_per_host")]
    pub max_conns_per_host: usize,

    /// Connection pool isolation decides how upstream clients are shared.
    pub connection_pool_isolation: ConnectionPoolIsolation,

    /// Max upstream clients bounds the number of cached upstream clients, 0 means unbounded.
    #[serde(default = "default_max_upstream_clients")]
    pub max_upstream_clients: usize,

    /// Client idle TTL is the time after which an unused upstream client is reclaimed,
    /// 0 means never.
    #[serde(
        default = "default_client_idle_ttl",
        rename = "clientIdleTTL",
        with = "humantime_serde"
    )]
    pub client_idle_ttl: Duration,
}

/// Gateway implements Default.
impl Default for Gateway {
    fn default() -> Self {
        Gateway {
            response_header_timeout: default_response_header_timeout(),
            max_idle_conns: default_max_idle_conns(),
            max_idle_conns_per_host: default_max_idle_conns_per_host(),
            max_conns_per_host: default_max_conns_per_host(),
            connection_pool_isolation: ConnectionPoolIsolation::default(),
            max_upstream_clients: default_max_upstream_clients(),
            client_idle_ttl: default_client_idle_ttl(),
        }
    }
}

/// validate_gateway checks the relations between the connection limits.
fn validate_gateway(gateway: &Gateway) -> std::result::Result<(), ValidationError> {
    if gateway.max_idle_conns > 0
        && gateway.max_idle_conns_per_host > 0
        && gateway.max_idle_conns_per_host > gateway.max_idle_conns
    {
        return Err(ValidationError::new(
            "maxIdleConnsPerHost must not exceed maxIdleConns",
        ));
    }

    Ok(())
}

/// Config is the configuration for the gateway.
#[derive(Debug, Clone, Default, Validate, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Gateway is the upstream connection pool configuration.
    #[validate]
    pub gateway: Gateway,
}

/// Config implements the config operation of the gateway.
impl Config {
    /// Load the configuration from file.
    #[instrument(skip_all)]
    pub async fn load(path: &Path) -> Result<Config> {
        // Load configuration from file.
        let content = fs::read_to_string(path).await?;
        let mut config: Config = serde_yaml::from_str(&content).or_context(
            ErrorType::ConfigError,
            format!("parse {}", path.display()),
        )?;

        // Convert configuration.
        config.convert();

        // Validate configuration.
        config.validate().or_err(ErrorType::ValidationError)?;
        Ok(config)
    }

    /// Convert converts the configuration.
    fn convert(&mut self) {
        if self.gateway.response_header_timeout.is_zero() {
            self.gateway.response_header_timeout = default_response_header_timeout();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn default_gateway() {
        let gateway = Gateway::default();
        assert_eq!(gateway.response_header_timeout, Duration::from_secs(300));
        assert_eq!(gateway.max_idle_conns, 240);
        assert_eq!(gateway.max_idle_conns_per_host, 120);
        assert_eq!(gateway.max_conns_per_host, 240);
        assert_eq!(
            gateway.connection_pool_isolation,
            ConnectionPoolIsolation::AccountProxy
        );
        assert_eq!(gateway.max_upstream_clients, 5000);
        assert_eq!(gateway.client_idle_ttl, Duration::from_secs(900));
        assert!(gateway.validate().is_ok());
    }

    #[test]
    fn deserialize_gateway_correctly() {
        let yaml = r#"
responseHeaderTimeout: 7s
maxIdleConns: 64
maxIdleConnsPerHost: 16
maxConnsPerHost: 32
connectionPoolIsolation: account
maxUpstreamClients: 2
clientIdleTTL: 1s
"#;

        let gateway: Gateway = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(gateway.response_header_timeout, Duration::from_secs(7));
        assert_eq!(gateway.max_idle_conns, 64);
        assert_eq!(gateway.max_idle_conns_per_host, 16);
        assert_eq!(gateway.max_conns_per_host, 32);
        assert_eq!(
            gateway.connection_pool_isolation,
            ConnectionPoolIsolation::Account
        );
        assert_eq!(gateway.max_upstream_clients, 2);
        assert_eq!(gateway.client_idle_ttl, Duration::from_secs(1));
    }

    #[test]
    fn deserialize_gateway_with_defaults() {
        let gateway: Gateway = serde_yaml::from_str("maxUpstreamClients: 0").unwrap();
        assert_eq!(gateway.max_upstream_clients, 0);
        assert_eq!(gateway.response_header_timeout, Duration::from_secs(300));
        assert_eq!(gateway.client_idle_ttl, Duration::from_secs(900));
    }

    #[test]
    fn deserialize_isolation_aliases() {
        let cases = [
            ("\"none\"", ConnectionPoolIsolation::None),
            ("\"proxy\"", ConnectionPoolIsolation::None),
            ("\"account\"", ConnectionPoolIsolation::Account),
            ("\"account_proxy\"", ConnectionPoolIsolation::AccountProxy),
            ("\"account+proxy\"", ConnectionPoolIsolation::AccountProxy),
        ];

        for (json, expected) in cases {
            let isolation: ConnectionPoolIsolation = serde_json::from_str(json).unwrap();
            assert_eq!(isolation, expected);
        }

        assert!(serde_json::from_str::<ConnectionPoolIsolation>("\"global\"").is_err());
    }

    #[test]
    fn display_isolation() {
        assert_eq!(ConnectionPoolIsolation::None.to_string(), "none");
        assert_eq!(ConnectionPoolIsolation::Account.to_string(), "account");
        assert_eq!(
            ConnectionPoolIsolation::AccountProxy.to_string(),
            "account_proxy"
        );
        assert!(!ConnectionPoolIsolation::None.is_account_scoped());
        assert!(ConnectionPoolIsolation::Account.is_account_scoped());
        assert!(ConnectionPoolIsolation::AccountProxy.is_account_scoped());
    }

    #[test]
    fn validate_gateway_idle_limits() {
        let gateway = Gateway {
            max_idle_conns: 10,
            max_idle_conns_per_host: 20,
            ..Default::default()
        };
        assert!(gateway.validate().is_err());

        let gateway = Gateway {
            max_idle_conns: 0,
            max_idle_conns_per_host: 20,
            ..Default::default()
        };
        assert!(gateway.validate().is_ok());
    }

    #[tokio::test]
    async fn load_config_from_file() {
        let yaml = r#"
gateway:
  responseHeaderTimeout: 0s
  connectionPoolIsolation: none
  maxUpstreamClients: 16
"#;
        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), yaml).await.unwrap();

        let config = Config::load(file.path()).await.unwrap();
        assert_eq!(
            config.gateway.response_header_timeout,
            Duration::from_secs(300)
        );
        assert_eq!(
            config.gateway.connection_pool_isolation,
            ConnectionPoolIsolation::None
        );
        assert_eq!(config.gateway.max_upstream_clients, 16);
    }

    #[tokio::test]
    async fn load_config_rejects_invalid_limits() {
        let yaml = r#"
gateway:
  maxIdleConns: 4
  maxIdleConnsPerHost: 8
"#;
        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), yaml).await.unwrap();

        let err = Config::load(file.path()).await.unwrap_err();
        assert!(err.to_string().starts_with("ValidationError"));
    }

    #[tokio::test]
    async fn load_config_rejects_malformed_yaml() {
        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), "gateway: [").await.unwrap();

        let err = Config::load(file.path()).await.unwrap_err();
        assert!(err.to_string().starts_with("ConfigError context: parse"));
    }

    #[tokio::test]
    async fn load_config_missing_file() {
        let err = Config::load(Path::new("/nonexistent/switchyard/gateway.yaml"))
            .await
            .unwrap_err();
        assert!(matches!(err, switchyard_core::Error::IO(_)));
    }
}

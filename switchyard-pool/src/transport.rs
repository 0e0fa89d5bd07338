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

use reqwest::{redirect, Client};
use std::time::Duration;
use switchyard_config::gateway::{default_response_header_timeout, Gateway};
use switchyard_core::{
    error::{ErrorType, OrErr},
    Result,
};
use url::Url;

/// DEFAULT_MAX_IDLE_CONNS is the maximum number of idle connections when the gateway leaves
/// it unset.
const DEFAULT_MAX_IDLE_CONNS: usize = 100;

/// DEFAULT_MAX_IDLE_CONNS_PER_HOST is the maximum number of idle connections per host when
/// the gateway leaves it unset.
const DEFAULT_MAX_IDLE_CONNS_PER_HOST: usize = 10;

/// IDLE_CONN_TIMEOUT is the time an idle connection stays in the pool of a client.
const IDLE_CONN_TIMEOUT: Duration = Duration::from_secs(90);

/// KEEP_ALIVE_INTERVAL is the tcp keepalive interval of the upstream connections.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// CONNECT_TIMEOUT is the timeout for establishing an upstream connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// TransportSettings are the connection settings of an upstream client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSettings {
    /// response_header_timeout bounds the wait for the upstream response headers.
    pub response_header_timeout: Duration,

    /// max_conns_per_host limits the concurrent requests per upstream host, 0 means unlimited.
    pub max_conns_per_host: usize,

    /// max_idle_conns is the maximum number of idle connections of the client.
    pub max_idle_conns: usize,

    /// max_idle_conns_per_host is the maximum number of idle connections per upstream host.
    pub max_idle_conns_per_host: usize,
}

/// TransportSettings implements the settings resolution.
impl TransportSettings {
    /// resolve returns the settings for an account. The account concurrency overrides the
    /// connection limits when the isolation is account scoped and the concurrency is positive,
    /// otherwise the gateway limits apply.
    pub fn resolve(gateway: &Gateway, concurrency: usize) -> TransportSettings {
        let response_header_timeout = if gateway.response_header_timeout.is_zero() {
            default_response_header_timeout()
        } else {
            gateway.response_header_timeout
        };

        if gateway.connection_pool_isolation.is_account_scoped() && concurrency > 0 {
            return TransportSettings {
                response_header_timeout,
                max_conns_per_host: concurrency,
                max_idle_conns: concurrency,
                max_idle_conns_per_host: concurrency,
            };
        }

        TransportSettings {
            response_header_timeout,
            max_conns_per_host: gateway.max_conns_per_host,
            max_idle_conns: match gateway.max_idle_conns {
                0 => DEFAULT_MAX_IDLE_CONNS,
                n => n,
            },
            max_idle_conns_per_host: match gateway.max_idle_conns_per_host {
                0 => DEFAULT_MAX_IDLE_CONNS_PER_HOST,
                n => n,
            },
        }
    }

    /// pool_max_idle_per_host returns the idle pool size of each upstream host. The client pools
    /// idle connections per host only, so the total limit caps the per host limit.
    pub fn pool_max_idle_per_host(&self) -> usize {
        self.max_idle_conns_per_host.min(self.max_idle_conns)
    }
}

/// ClientFactory creates the http clients of the upstream client entries.
pub trait ClientFactory: Send + Sync {
    /// make_client creates a new client with the settings, connecting through the proxy if
    /// one is given and directly otherwise.
    fn make_client(&self, settings: &TransportSettings, proxy: Option<&Url>) -> Result<Client>;
}

/// ReqwestClientFactory creates reqwest clients that pass the upstream responses through
/// unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReqwestClientFactory;

/// ReqwestClientFactory implements ClientFactory.
impl ClientFactory for ReqwestClientFactory {
    fn make_client(&self, settings: &TransportSettings, proxy: Option<&Url>) -> Result<Client> {
        let builder = Client::builder()
            .pool_max_idle_per_host(settings.pool_max_idle_per_host())
            .pool_idle_timeout(IDLE_CONN_TIMEOUT)
            .tcp_keepalive(KEEP_ALIVE_INTERVAL)
            .tcp_nodelay(true)
            .connect_timeout(CONNECT_TIMEOUT)
            .no_gzip()
            .no_brotli()
            .no_zstd()
            .no_deflate()
            .redirect(redirect::Policy::none());

        // Ambient proxy environment variables must never apply to the direct clients.
        let builder = match proxy {
            Some(url) => builder.proxy(
                reqwest::Proxy::all(url.clone())
                    .or_context(ErrorType::TransportError, format!("set proxy {}", url))?,
            ),
            None => builder.no_proxy(),
        };

        let client = builder
            .build()
            .or_context(ErrorType::TransportError, "build upstream client")?;
        Ok(client)
    }
}

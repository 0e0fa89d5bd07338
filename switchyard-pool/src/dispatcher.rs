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

use crate::cache::ClientCache;
use crate::proxy::{redact, ProxyRoute};
use crate::response::UpstreamResponse;
use crate::transport::{ClientFactory, ReqwestClientFactory};
use reqwest::{header::HOST, Request};
use std::sync::Arc;
use switchyard_core::{Error, Result};
use tracing::{debug, instrument, warn};

/// Dispatcher sends the requests of the accounts to the upstreams with the cached clients.
pub struct Dispatcher<F = ReqwestClientFactory> {
    /// cache is the cache of the upstream clients.
    cache: Arc<ClientCache<F>>,
}

/// Dispatcher implements the dispatching of the upstream requests.
impl<F: ClientFactory> Dispatcher<F> {
    /// Create a new dispatcher with the client cache.
    pub fn new(cache: Arc<ClientCache<F>>) -> Self {
        Self { cache }
    }

    /// cache returns the client cache of the dispatcher.
    pub fn cache(&self) -> &Arc<ClientCache<F>> {
        &self.cache
    }

    /// execute sends the request of the account through the proxy and returns the upstream
    /// response unchanged. The request stays in-flight, and holds its connection slot of the
    /// upstream host, until the response body is done or dropped. A failed or dropped
    /// request is released at once.
    #[instrument(skip_all, fields(account_id = account_id))]
    pub async fn execute(
        &self,
        mut request: Request,
        proxy_url: &str,
        account_id: i64,
        concurrency: usize,
    ) -> Result<UpstreamResponse> {
        let guard = self.cache.acquire(proxy_url, account_id, concurrency).await?;
        let entry = guard.entry().clone();

        let host = prepare_request(&mut request, entry.route())?;
        let timeout = entry.settings().response_header_timeout;
        debug!(
            "dispatching {} {} via {}",
            request.method(),
            request.url(),
            redact(entry.proxy_key())
        );

        let response = tokio::time::timeout(timeout, async {
            let permit = entry.acquire_host_permit(&host).await?;
            let response = entry.client().execute(request).await?;
            Ok::<UpstreamResponse, Error>(UpstreamResponse::new(response, permit, guard))
        })
        .await;

        match response {
            Ok(response) => response,
            Err(_) => {
                warn!(
                    "upstream {} did not send response headers in {:?}",
                    host, timeout
                );
                Err(Error::ResponseHeaderTimeout(timeout))
            }
        }
    }
}

/// prepare_request checks the request target and adjusts the headers for the route. It
/// returns the upstream host and port, which the per host connection limit applies to.
fn prepare_request(request: &mut Request, route: &ProxyRoute) -> Result<String> {
    let url = request.url();
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::InvalidURI(url.to_string()));
    }

    let host = match url.host_str() {
        Some(host) if !host.is_empty() => host,
        _ => return Err(Error::InvalidURI(url.to_string())),
    };

    let authority = match url.port_or_known_default() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    // The http proxy receives the absolute-form target, the host header is derived from it.
    if url.scheme() == "http" && route.is_http_proxy() {
        request.headers_mut().remove(HOST);
    }

    Ok(authority)
}

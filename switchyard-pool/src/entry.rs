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

use crate::proxy::ProxyRoute;
use crate::transport::TransportSettings;
use dashmap::DashMap;
use reqwest::Client;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchyard_core::{
    error::{ErrorType, OrErr},
    Result,
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// RequestGuard tracks an in-flight request of an upstream client entry.
#[derive(Debug)]
pub struct RequestGuard {
    entry: Arc<Entry>,
}

/// RequestGuard implements the request guard pattern.
impl RequestGuard {
    /// Create a new request guard.
    fn new(entry: Arc<Entry>) -> Self {
        entry.in_flight.fetch_add(1, Ordering::SeqCst);
        Self { entry }
    }

    /// entry returns the guarded entry.
    pub fn entry(&self) -> &Arc<Entry> {
        &self.entry
    }
}

/// RequestGuard finishes the in-flight request when dropped.
impl Drop for RequestGuard {
    /// Decrement the in-flight count and refresh the last used time.
    fn drop(&mut self) {
        self.entry.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.entry.touch(Instant::now());
    }
}

/// Entry is a cached upstream client with its bookkeeping.
#[derive(Debug)]
pub struct Entry {
    /// cache_key is the key of the entry in the client cache.
    cache_key: String,

    /// route is the proxy route of the client.
    route: ProxyRoute,

    /// settings are the transport settings the client was built with.
    settings: TransportSettings,

    /// client is the http client of the upstream.
    client: Client,

    /// in_flight is the number of the requests being dispatched by the client.
    in_flight: AtomicUsize,

    /// last_used_at is the last used time in nanoseconds since the epoch.
    last_used_at: AtomicU64,

    /// epoch is the reference time of last_used_at.
    epoch: Instant,

    /// host_limits are the connection limits of the upstream hosts, used when
    /// max_conns_per_host is positive.
    host_limits: DashMap<String, Arc<Semaphore>>,
}

/// Entry implements the bookkeeping of an upstream client.
impl Entry {
    /// Create a new entry, last used at creation.
    pub(crate) fn new(
        cache_key: String,
        route: ProxyRoute,
        settings: TransportSettings,
        client: Client,
        epoch: Instant,
    ) -> Self {
        let entry = Self {
            cache_key,
            route,
            settings,
            client,
            in_flight: AtomicUsize::new(0),
            last_used_at: AtomicU64::new(0),
            epoch,
            host_limits: DashMap::new(),
        };

        entry.touch(Instant::now());
        entry
    }

    /// cache_key returns the key of the entry in the client cache.
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    /// proxy_key returns the normalized proxy url of the client, or the direct key.
    pub fn proxy_key(&self) -> &str {
        self.route.key()
    }

    /// route returns the proxy route of the client.
    pub fn route(&self) -> &ProxyRoute {
        &self.route
    }

    /// settings returns the transport settings of the client.
    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    /// client returns the http client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Create a request guard to track an in-flight request.
    pub fn request_guard(self: &Arc<Self>) -> RequestGuard {
        RequestGuard::new(self.clone())
    }

    /// in_flight returns the number of the in-flight requests.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// has_in_flight returns true if the client is dispatching requests.
    pub fn has_in_flight(&self) -> bool {
        self.in_flight() > 0
    }

    /// touch moves the last used time forward to now, it never moves backward.
    pub fn touch(&self, now: Instant) {
        let nanos = u64::try_from(now.saturating_duration_since(self.epoch).as_nanos())
            .unwrap_or(u64::MAX);
        self.last_used_at.fetch_max(nanos, Ordering::SeqCst);
    }

    /// last_used_at returns the last used time.
    pub fn last_used_at(&self) -> Instant {
        self.epoch + Duration::from_nanos(self.last_used_at.load(Ordering::SeqCst))
    }

    /// idle_duration returns the time since the last use.
    pub fn idle_duration(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used_at())
    }

    /// acquire_host_permit waits for a connection slot of the upstream host. It returns None
    /// when the connections per host are unlimited.
    pub async fn acquire_host_permit(&self, host: &str) -> Result<Option<OwnedSemaphorePermit>> {
        let limit = self.settings.max_conns_per_host;
        if limit == 0 {
            return Ok(None);
        }

        let semaphore = self
            .host_limits
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(limit)))
            .clone();

        let permit = semaphore
            .acquire_owned()
            .await
            .or_context(ErrorType::TransportError, format!("acquire permit of {}", host))?;
        Ok(Some(permit))
    }
}

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

use crate::entry::{Entry, RequestGuard};
use crate::key::cache_key;
use crate::proxy::{redact, ProxyRoute};
use crate::transport::{ClientFactory, ReqwestClientFactory, TransportSettings};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use switchyard_config::gateway::Gateway;
use switchyard_core::{Error, Result};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Admission decides what happens when a new client does not fit in the full cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    /// Soft admits the client over the limit.
    Soft,

    /// Strict refuses the client with a capacity error.
    Strict,
}

/// Builder for creating a client cache.
pub struct Builder<F> {
    gateway: Gateway,
    factory: F,
}

/// Builder methods for configuring and building the client cache.
impl<F: ClientFactory> Builder<F> {
    /// Set the factory creating the http clients.
    pub fn factory<G: ClientFactory>(self, factory: G) -> Builder<G> {
        Builder {
            gateway: self.gateway,
            factory,
        }
    }

    /// Set the maximum number of cached clients, 0 means unbounded.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.gateway.max_upstream_clients = capacity;
        self
    }

    /// Set the idle time after which an unused client is reclaimed, zero means never.
    pub fn idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.gateway.client_idle_ttl = idle_timeout;
        self
    }

    /// Build the client cache.
    pub fn build(self) -> ClientCache<F> {
        ClientCache {
            gateway: self.gateway,
            factory: self.factory,
            clients: RwLock::new(HashMap::new()),
            epoch: Instant::now(),
        }
    }
}

/// ClientCache is the bounded cache of the upstream clients, keyed by the isolation key of
/// the account and proxy.
///
/// Lookups share the read lock, creation, replacement, eviction and reclamation take the
/// write lock. An entry with in-flight requests is never evicted or reclaimed. An entry that
/// is replaced or removed stays usable by the requests holding it until they finish.
pub struct ClientCache<F = ReqwestClientFactory> {
    /// gateway is the upstream connection pool configuration.
    gateway: Gateway,

    /// factory is the factory for creating new http clients.
    factory: F,

    /// clients is the map of the cache keys to the entries.
    clients: RwLock<HashMap<String, Arc<Entry>>>,

    /// epoch is the reference time of the entries.
    epoch: Instant,
}

/// ClientCache implements the constructor with the reqwest factory.
impl ClientCache<ReqwestClientFactory> {
    /// Create a new client cache builder.
    pub fn builder(gateway: Gateway) -> Builder<ReqwestClientFactory> {
        Builder {
            gateway,
            factory: ReqwestClientFactory,
        }
    }
}

/// ClientCache implements the operations of the client cache.
impl<F: ClientFactory> ClientCache<F> {
    /// gateway returns the configuration of the cache.
    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// get_or_create returns the client entry of the account and proxy, creating it on a miss.
    /// When the cache is full and no idle entry can be evicted, the new entry is admitted over
    /// the limit.
    pub async fn get_or_create(
        &self,
        proxy_url: &str,
        account_id: i64,
        concurrency: usize,
    ) -> Result<Arc<Entry>> {
        let guard = self
            .entry(proxy_url, account_id, concurrency, Admission::Soft)
            .await?;
        Ok(guard.entry().clone())
    }

    /// acquire returns a request guard on the client entry of the account and proxy, creating
    /// the entry on a miss. The entry is in-flight before the cache lock is released, so it can
    /// not be evicted before the request runs. When the cache is full and no idle entry can be
    /// evicted, it returns Error::UpstreamClientLimitReached.
    pub async fn acquire(
        &self,
        proxy_url: &str,
        account_id: i64,
        concurrency: usize,
    ) -> Result<RequestGuard> {
        self.entry(proxy_url, account_id, concurrency, Admission::Strict)
            .await
    }

    /// entry looks up the entry, creates it on a miss with the admission policy, and returns
    /// it guarded while the cache lock is held.
    async fn entry(
        &self,
        proxy_url: &str,
        account_id: i64,
        concurrency: usize,
        admission: Admission,
    ) -> Result<RequestGuard> {
        let route = ProxyRoute::resolve(proxy_url);
        let settings = TransportSettings::resolve(&self.gateway, concurrency);
        let key = cache_key(
            self.gateway.connection_pool_isolation,
            account_id,
            route.key(),
        );

        // Try to get existing client.
        {
            let clients = self.clients.read().await;
            if let Some(entry) = clients.get(&key) {
                if Self::matches(entry, &route, &settings) {
                    debug!("reusing upstream client: {}", redact(&key));
                    entry.touch(Instant::now());
                    return Ok(entry.request_guard());
                }
            }
        }

        let mut clients = self.clients.write().await;
        let now = Instant::now();

        // Check again, another task may have created or replaced the client.
        if let Some(entry) = clients.get(&key).cloned() {
            if Self::matches(&entry, &route, &settings) {
                debug!("reusing upstream client: {}", redact(&key));
                entry.touch(now);
                return Ok(entry.request_guard());
            }

            info!(
                "replacing upstream client: {}, proxy: {} -> {}, in_flight: {}",
                redact(&key),
                redact(entry.proxy_key()),
                redact(route.key()),
                entry.in_flight(),
            );
            clients.remove(&key);
        }

        Self::reclaim_idle_entries(&mut clients, self.gateway.client_idle_ttl, now);

        let limit = self.gateway.max_upstream_clients;
        if limit > 0 && clients.len() >= limit && !Self::evict_oldest_idle_entry(&mut clients, now)
        {
            match admission {
                Admission::Strict => {
                    warn!(
                        "upstream client cache limit {} reached, refusing client: {}",
                        limit,
                        redact(&key)
                    );
                    return Err(Error::UpstreamClientLimitReached(limit));
                }
                Admission::Soft => {
                    warn!(
                        "upstream client cache limit {} reached, admitting client over the limit: {}",
                        limit,
                        redact(&key)
                    );
                }
            }
        }

        // Create new client.
        let client = self.factory.make_client(&settings, route.url())?;
        let entry = Arc::new(Entry::new(key.clone(), route, settings, client, self.epoch));
        info!(
            "created upstream client: {}, max_conns_per_host: {}, max_idle_conns_per_host: {}",
            redact(&key),
            settings.max_conns_per_host,
            settings.pool_max_idle_per_host(),
        );

        let guard = entry.request_guard();
        clients.insert(key, entry);
        Ok(guard)
    }

    /// matches returns true if the entry was built for the route and settings.
    fn matches(entry: &Entry, route: &ProxyRoute, settings: &TransportSettings) -> bool {
        entry.proxy_key() == route.key() && entry.settings() == settings
    }

    /// evict_oldest_idle_entry removes the least recently used entry without in-flight
    /// requests. It returns false if every entry has in-flight requests.
    fn evict_oldest_idle_entry(clients: &mut HashMap<String, Arc<Entry>>, now: Instant) -> bool {
        let oldest = clients
            .iter()
            .filter(|(_, entry)| !entry.has_in_flight())
            .min_by_key(|(_, entry)| entry.last_used_at())
            .map(|(key, _)| key.clone());

        let Some(key) = oldest else {
            return false;
        };

        if let Some(entry) = clients.remove(&key) {
            info!(
                "evicting least recently used upstream client: {}, idle_duration: {}s",
                redact(&key),
                entry.idle_duration(now).as_secs(),
            );
        }

        true
    }

    /// reclaim_idle_entries removes the entries idle longer than the idle timeout without
    /// in-flight requests, and returns the number of the removed entries.
    fn reclaim_idle_entries(
        clients: &mut HashMap<String, Arc<Entry>>,
        idle_timeout: Duration,
        now: Instant,
    ) -> usize {
        if idle_timeout.is_zero() {
            return 0;
        }

        let before = clients.len();
        clients.retain(|key, entry| {
            let idle_duration = entry.idle_duration(now);
            let should_retain = entry.has_in_flight() || idle_duration <= idle_timeout;
            if !should_retain {
                info!(
                    "removing idle upstream client: {}, idle_duration: {}s",
                    redact(key),
                    idle_duration.as_secs(),
                );
            }

            should_retain
        });

        before - clients.len()
    }

    /// reclaim_idle removes the idle entries now, and returns the number of the removed
    /// entries.
    pub async fn reclaim_idle(&self) -> usize {
        let mut clients = self.clients.write().await;
        Self::reclaim_idle_entries(&mut clients, self.gateway.client_idle_ttl, Instant::now())
    }

    /// get returns the entry of the cache key.
    pub async fn get(&self, key: &str) -> Option<Arc<Entry>> {
        self.clients.read().await.get(key).cloned()
    }

    /// keys returns the sorted cache keys.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.clients.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Remove a client entry if it has no in-flight requests. It returns true if the entry
    /// was removed.
    pub async fn remove(&self, key: &str) -> bool {
        let mut clients = self.clients.write().await;
        match clients.get(key) {
            Some(entry) if !entry.has_in_flight() => {
                clients.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Get current cache size.
    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    /// is_empty returns true if the cache holds no client.
    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }

    /// Clear all clients from the cache.
    pub async fn clear(&self) {
        let mut clients = self.clients.write().await;
        info!("clearing {} upstream clients", clients.len());
        clients.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Client;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use switchyard_config::gateway::ConnectionPoolIsolation;
    use url::Url;

    /// CountingFactory counts the created clients.
    #[derive(Default, Clone)]
    struct CountingFactory {
        created: Arc<AtomicUsize>,
    }

    impl ClientFactory for CountingFactory {
        fn make_client(
            &self,
            settings: &TransportSettings,
            proxy: Option<&Url>,
        ) -> Result<Client> {
            self.created.fetch_add(1, Ordering::SeqCst);
            ReqwestClientFactory.make_client(settings, proxy)
        }
    }

    fn gateway(isolation: ConnectionPoolIsolation) -> Gateway {
        Gateway {
            connection_pool_isolation: isolation,
            max_upstream_clients: 0,
            client_idle_ttl: Duration::ZERO,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn reuse_entry_for_equivalent_proxy_urls() {
        let factory = CountingFactory::default();
        let cache = ClientCache::builder(gateway(ConnectionPoolIsolation::AccountProxy))
            .factory(factory.clone())
            .build();

        let first = cache
            .get_or_create("http://proxy.example.com:3128", 1, 0)
            .await
            .unwrap();
        let second = cache
            .get_or_create("HTTP://proxy.example.com:3128/", 1, 0)
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len().await, 1);
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert_eq!(
            cache.keys().await,
            vec!["account:1|proxy:http://proxy.example.com:3128".to_string()]
        );
    }

    #[tokio::test]
    async fn account_isolation_replaces_entry_on_proxy_change() {
        let cache = ClientCache::builder(gateway(ConnectionPoolIsolation::Account)).build();

        let old = cache
            .get_or_create("http://proxy-a.example.com:3128", 7, 0)
            .await
            .unwrap();
        let guard = old.request_guard();

        let new = cache
            .get_or_create("http://proxy-b.example.com:3128", 7, 0)
            .await
            .unwrap();

        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(cache.len().await, 1);
        assert_eq!(new.proxy_key(), "http://proxy-b.example.com:3128");
        assert_eq!(
            cache.get("account:7").await.unwrap().proxy_key(),
            "http://proxy-b.example.com:3128"
        );

        // The replaced client keeps serving its in-flight request.
        assert_eq!(guard.entry().in_flight(), 1);
        assert_eq!(old.proxy_key(), "http://proxy-a.example.com:3128");
        drop(guard);
        assert_eq!(old.in_flight(), 0);
    }

    #[tokio::test]
    async fn account_proxy_isolation_keeps_entry_per_proxy() {
        let cache = ClientCache::builder(gateway(ConnectionPoolIsolation::AccountProxy)).build();

        cache
            .get_or_create("http://proxy-a.example.com:3128", 7, 0)
            .await
            .unwrap();
        cache
            .get_or_create("http://proxy-b.example.com:3128", 7, 0)
            .await
            .unwrap();

        assert_eq!(
            cache.keys().await,
            vec![
                "account:7|proxy:http://proxy-a.example.com:3128".to_string(),
                "account:7|proxy:http://proxy-b.example.com:3128".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn none_isolation_shares_entry_between_accounts() {
        let cache = ClientCache::builder(gateway(ConnectionPoolIsolation::None)).build();

        let first = cache.get_or_create("", 1, 4).await.unwrap();
        let second = cache.get_or_create("", 2, 8).await.unwrap();
        let proxied = cache
            .get_or_create("socks5://10.0.0.1:1080", 1, 4)
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &proxied));
        assert_eq!(first.cache_key(), "proxy:direct");
        assert_eq!(proxied.cache_key(), "proxy:socks5://10.0.0.1");
    }

    #[tokio::test]
    async fn invalid_proxy_url_falls_back_to_direct() {
        let cache = ClientCache::builder(gateway(ConnectionPoolIsolation::AccountProxy)).build();

        let invalid = cache.get_or_create("::bogus::", 3, 0).await.unwrap();
        let direct = cache.get_or_create("", 3, 0).await.unwrap();

        assert!(Arc::ptr_eq(&invalid, &direct));
        assert_eq!(invalid.cache_key(), "account:3|proxy:direct");
        assert!(invalid.route().url().is_none());
    }

    #[tokio::test]
    async fn replace_entry_on_settings_change() {
        let cache = ClientCache::builder(gateway(ConnectionPoolIsolation::AccountProxy)).build();

        let first = cache.get_or_create("", 1, 4).await.unwrap();
        let second = cache.get_or_create("", 1, 8).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len().await, 1);
        assert_eq!(second.settings().max_conns_per_host, 8);
    }

    #[tokio::test]
    async fn acquire_refuses_when_full_of_in_flight_entries() {
        let cache = ClientCache::builder(gateway(ConnectionPoolIsolation::AccountProxy))
            .capacity(1)
            .build();

        let busy = cache.acquire("", 1, 0).await.unwrap();

        let err = cache.acquire("", 2, 0).await.unwrap_err();
        assert!(err.is_capacity_exceeded());
        assert!(matches!(err, Error::UpstreamClientLimitReached(1)));
        assert_eq!(cache.len().await, 1);

        // The cached client is still served.
        let again = cache.acquire("", 1, 0).await.unwrap();
        assert!(Arc::ptr_eq(busy.entry(), again.entry()));
        assert_eq!(busy.entry().in_flight(), 2);

        // The soft bound admits the client over the limit.
        cache.get_or_create("", 2, 0).await.unwrap();
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn acquire_keeps_returned_entry_cached_when_full() {
        let cache = ClientCache::builder(gateway(ConnectionPoolIsolation::AccountProxy))
            .capacity(1)
            .build();

        let guard = cache.acquire("", 1, 0).await.unwrap();
        assert_eq!(guard.entry().in_flight(), 1);

        // A miss while the first request has not started can not evict its entry.
        assert!(cache.acquire("", 2, 0).await.unwrap_err().is_capacity_exceeded());
        let cached = cache.get("account:1|proxy:direct").await.unwrap();
        assert!(Arc::ptr_eq(guard.entry(), &cached));
        assert_eq!(cache.len().await, 1);

        drop(guard);
        assert_eq!(cached.in_flight(), 0);
        cache.acquire("", 2, 0).await.unwrap();
        assert_eq!(cache.keys().await, vec!["account:2|proxy:direct".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn evict_least_recently_used_entry() {
        let cache = ClientCache::builder(gateway(ConnectionPoolIsolation::AccountProxy))
            .capacity(2)
            .build();

        cache.acquire("", 1, 0).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.acquire("", 2, 0).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;

        // Account 1 becomes the most recently used.
        cache.acquire("", 1, 0).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;

        cache.acquire("", 3, 0).await.unwrap();
        assert_eq!(
            cache.keys().await,
            vec![
                "account:1|proxy:direct".to_string(),
                "account:3|proxy:direct".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn evict_skips_in_flight_entries() {
        let cache = ClientCache::builder(gateway(ConnectionPoolIsolation::AccountProxy))
            .capacity(2)
            .build();

        let _oldest = cache.acquire("", 1, 0).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.acquire("", 2, 0).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;

        cache.acquire("", 3, 0).await.unwrap();
        assert_eq!(
            cache.keys().await,
            vec![
                "account:1|proxy:direct".to_string(),
                "account:3|proxy:direct".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reclaim_idle_entries_after_ttl() {
        let cache = ClientCache::builder(gateway(ConnectionPoolIsolation::AccountProxy))
            .idle_timeout(Duration::from_secs(10))
            .build();

        let busy = cache.get_or_create("", 1, 0).await.unwrap();
        let guard = busy.request_guard();
        cache.get_or_create("", 2, 0).await.unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.reclaim_idle().await, 0);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.reclaim_idle().await, 1);
        assert_eq!(cache.keys().await, vec!["account:1|proxy:direct".to_string()]);

        // The request finishing refreshes the last used time.
        drop(guard);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.reclaim_idle().await, 0);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.reclaim_idle().await, 1);
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn reclaim_idle_entries_on_miss() {
        let cache = ClientCache::builder(gateway(ConnectionPoolIsolation::AccountProxy))
            .idle_timeout(Duration::from_secs(10))
            .build();

        let guard = cache.get_or_create("", 1, 0).await.unwrap().request_guard();
        cache.get_or_create("", 2, 0).await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;

        // The busy entry survives the sweep of the miss, the idle one does not.
        cache.get_or_create("", 3, 0).await.unwrap();
        assert_eq!(
            cache.keys().await,
            vec![
                "account:1|proxy:direct".to_string(),
                "account:3|proxy:direct".to_string(),
            ]
        );
        assert_eq!(guard.entry().in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_ttl_never_reclaims() {
        let cache = ClientCache::builder(gateway(ConnectionPoolIsolation::AccountProxy)).build();

        cache.get_or_create("", 1, 0).await.unwrap();
        tokio::time::advance(Duration::from_secs(86400)).await;
        assert_eq!(cache.reclaim_idle().await, 0);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn remove_refuses_in_flight_entry() {
        let cache = ClientCache::builder(gateway(ConnectionPoolIsolation::Account)).build();

        let entry = cache.get_or_create("", 1, 0).await.unwrap();
        let guard = entry.request_guard();
        assert!(!cache.remove("account:1").await);
        assert_eq!(cache.len().await, 1);

        drop(guard);
        assert!(cache.remove("account:1").await);
        assert!(!cache.remove("account:1").await);
        assert!(cache.get("account:1").await.is_none());
    }

    #[tokio::test]
    async fn clear_removes_all_entries() {
        let cache = ClientCache::builder(gateway(ConnectionPoolIsolation::AccountProxy)).build();

        cache.get_or_create("", 1, 0).await.unwrap();
        cache.get_or_create("", 2, 0).await.unwrap();
        cache.clear().await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_create_one_entry() {
        let factory = CountingFactory::default();
        let cache = Arc::new(
            ClientCache::builder(gateway(ConnectionPoolIsolation::Account))
                .factory(factory.clone())
                .build(),
        );

        let mut handles = Vec::new();
        for _ in 0..32 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .acquire("http://proxy.example.com:3128", 9, 0)
                    .await
                    .unwrap()
            }));
        }

        let mut guards = Vec::new();
        for handle in handles {
            guards.push(handle.await.unwrap());
        }

        let entries: Vec<Arc<Entry>> = guards.iter().map(|guard| guard.entry().clone()).collect();
        assert_eq!(entries[0].in_flight(), 32);

        assert!(entries.iter().all(|entry| Arc::ptr_eq(entry, &entries[0])));
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len().await, 1);
    }
}

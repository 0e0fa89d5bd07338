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

use switchyard_config::gateway::ConnectionPoolIsolation;

/// cache_key returns the key of the upstream client shared by the requests of the account
/// through the proxy, according to the isolation mode.
pub fn cache_key(isolation: ConnectionPoolIsolation, account_id: i64, proxy_key: &str) -> String {
    match isolation {
        ConnectionPoolIsolation::None => format!("proxy:{}", proxy_key),
        ConnectionPoolIsolation::Account => format!("account:{}", account_id),
        ConnectionPoolIsolation::AccountProxy => {
            format!("account:{}|proxy:{}", account_id, proxy_key)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::DIRECT_PROXY_KEY;

    #[test]
    fn cache_key_by_isolation() {
        let proxy = "http://proxy.example.com:3128";

        assert_eq!(
            cache_key(ConnectionPoolIsolation::None, 1, proxy),
            "proxy:http://proxy.example.com:3128"
        );
        assert_eq!(
            cache_key(ConnectionPoolIsolation::None, 2, proxy),
            cache_key(ConnectionPoolIsolation::None, 1, proxy)
        );
        assert_eq!(
            cache_key(ConnectionPoolIsolation::Account, 1, proxy),
            "account:1"
        );
        assert_eq!(
            cache_key(ConnectionPoolIsolation::Account, 1, DIRECT_PROXY_KEY),
            "account:1"
        );
        assert_eq!(
            cache_key(ConnectionPoolIsolation::AccountProxy, 1, proxy),
            "account:1|proxy:http://proxy.example.com:3128"
        );
        assert_eq!(
            cache_key(ConnectionPoolIsolation::AccountProxy, 1, DIRECT_PROXY_KEY),
            "account:1|proxy:direct"
        );
    }

    #[test]
    fn cache_key_isolates_accounts() {
        for isolation in [
            ConnectionPoolIsolation::Account,
            ConnectionPoolIsolation::AccountProxy,
        ] {
            assert_ne!(
                cache_key(isolation, 1, DIRECT_PROXY_KEY),
                cache_key(isolation, 2, DIRECT_PROXY_KEY)
            );
        }
    }
}

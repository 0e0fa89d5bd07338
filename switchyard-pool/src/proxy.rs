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

use std::borrow::Cow;
use std::fmt;
use tracing::warn;
use url::Url;

/// DIRECT_PROXY_KEY is the proxy key of the upstream clients without proxy.
pub const DIRECT_PROXY_KEY: &str = "direct";

/// NormalizedProxy is a proxy url in its canonical form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedProxy {
    /// key is the canonical string of the proxy, equivalent proxy urls share the same key.
    key: String,

    /// url is the parsed canonical proxy url.
    url: Url,
}

/// NormalizedProxy implements the accessors of the normalized proxy.
impl NormalizedProxy {
    /// key returns the canonical string of the proxy.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// url returns the canonical proxy url.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

/// NormalizedProxy implements Display.
impl fmt::Display for NormalizedProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

/// default_port returns the port used by the proxy scheme when none is given,
/// None if the scheme is not supported.
fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        "socks5" | "socks5h" => Some(1080),
        _ => None,
    }
}

/// normalize parses the raw proxy url into its canonical form. It returns None for the
/// empty input and for any input that can not be used as a proxy.
pub fn normalize(raw: &str) -> Option<NormalizedProxy> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let parsed = Url::parse(raw).ok()?;
    let scheme = parsed.scheme().to_ascii_lowercase();
    let default_port = default_port(&scheme)?;

    let host = parsed.host_str()?.to_ascii_lowercase();
    if host.is_empty() {
        return None;
    }

    let mut key = format!("{}://", scheme);
    if !parsed.username().is_empty() {
        key.push_str(parsed.username());
        if let Some(password) = parsed.password() {
            key.push(':');
            key.push_str(password);
        }

        key.push('@');
    }

    key.push_str(&host);
    if let Some(port) = parsed.port() {
        if port != default_port {
            key.push_str(&format!(":{}", port));
        }
    }

    let url = Url::parse(&key).ok()?;
    Some(NormalizedProxy { key, url })
}

/// ProxyRoute is the route of the upstream requests of an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyRoute {
    /// Direct connects to the upstream without proxy.
    Direct,

    /// Proxied connects to the upstream through the proxy.
    Proxied(NormalizedProxy),
}

/// ProxyRoute implements the route resolution.
impl ProxyRoute {
    /// resolve returns the route for the raw proxy url. An unusable proxy url falls back
    /// to the direct route, it is never used as a key as is.
    pub fn resolve(raw: &str) -> ProxyRoute {
        if raw.trim().is_empty() {
            return ProxyRoute::Direct;
        }

        match normalize(raw) {
            Some(proxy) => ProxyRoute::Proxied(proxy),
            None => {
                warn!(
                    "invalid proxy url {:?}, falling back to direct connection",
                    redact(raw.trim())
                );
                ProxyRoute::Direct
            }
        }
    }

    /// key returns the proxy key of the route.
    pub fn key(&self) -> &str {
        match self {
            ProxyRoute::Direct => DIRECT_PROXY_KEY,
            ProxyRoute::Proxied(proxy) => proxy.key(),
        }
    }

    /// url returns the proxy url of the route, None for the direct route.
    pub fn url(&self) -> Option<&Url> {
        match self {
            ProxyRoute::Direct => None,
            ProxyRoute::Proxied(proxy) => Some(proxy.url()),
        }
    }

    /// is_http_proxy returns true if the requests are forwarded by an http or https proxy,
    /// which receives plain http requests in absolute-form.
    pub fn is_http_proxy(&self) -> bool {
        matches!(
            self,
            ProxyRoute::Proxied(proxy) if matches!(proxy.url().scheme(), "http" | "https")
        )
    }
}

/// redact hides the password of the proxy url embedded in the string, so cache keys and
/// proxy urls can be logged.
pub fn redact(s: &str) -> Cow<'_, str> {
    let Some(scheme_end) = s.find("://") else {
        return Cow::Borrowed(s);
    };

    let authority = scheme_end + 3;
    let Some(at) = s[authority..].find('@') else {
        return Cow::Borrowed(s);
    };

    match s[authority..authority + at].find(':') {
        Some(colon) => Cow::Owned(format!(
            "{}:***{}",
            &s[..authority + colon],
            &s[authority + at..]
        )),
        None => Cow::Borrowed(s),
    }
}

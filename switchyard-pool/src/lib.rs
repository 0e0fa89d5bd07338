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

pub mod cache;
pub mod dispatcher;
pub mod entry;
pub mod key;
pub mod proxy;
pub mod response;
pub mod transport;

pub use cache::ClientCache;
pub use dispatcher::Dispatcher;
pub use entry::{Entry, RequestGuard};
pub use proxy::{normalize, NormalizedProxy, ProxyRoute, DIRECT_PROXY_KEY};
pub use response::UpstreamResponse;
pub use transport::{ClientFactory, ReqwestClientFactory, TransportSettings};

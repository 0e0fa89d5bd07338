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
use bytes::Bytes;
use reqwest::{header::HeaderMap, Response, StatusCode, Url, Version};
use std::sync::Arc;
use switchyard_core::Result;
use tokio::sync::OwnedSemaphorePermit;

/// UpstreamResponse is the response of an upstream request. It keeps the request in-flight
/// and holds the connection slot of the upstream host until the body is read to the end,
/// fails, or the response is dropped.
#[derive(Debug)]
pub struct UpstreamResponse {
    /// response is the upstream response, passed through unchanged.
    response: Response,

    /// permit is the connection slot of the upstream host, None when unlimited or released.
    permit: Option<OwnedSemaphorePermit>,

    /// guard tracks the request as in-flight, None when released.
    guard: Option<RequestGuard>,
}

/// UpstreamResponse implements the accessors and the body reading of the response.
impl UpstreamResponse {
    /// Create a new upstream response.
    pub(crate) fn new(
        response: Response,
        permit: Option<OwnedSemaphorePermit>,
        guard: RequestGuard,
    ) -> Self {
        Self {
            response,
            permit,
            guard: Some(guard),
        }
    }

    /// status returns the status code of the response.
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    /// version returns the http version of the response.
    pub fn version(&self) -> Version {
        self.response.version()
    }

    /// headers returns the headers of the response.
    pub fn headers(&self) -> &HeaderMap {
        self.response.headers()
    }

    /// url returns the final url of the response.
    pub fn url(&self) -> &Url {
        self.response.url()
    }

    /// content_length returns the content length of the body, if known.
    pub fn content_length(&self) -> Option<u64> {
        self.response.content_length()
    }

    /// entry returns the client entry serving the response, None once the body is done.
    pub fn entry(&self) -> Option<&Arc<Entry>> {
        self.guard.as_ref().map(RequestGuard::entry)
    }

    /// chunk streams the next chunk of the body. The request is finished when the body
    /// ends or fails.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        match self.response.chunk().await {
            Ok(Some(chunk)) => Ok(Some(chunk)),
            Ok(None) => {
                self.release();
                Ok(None)
            }
            Err(err) => {
                self.release();
                Err(err.into())
            }
        }
    }

    /// bytes reads the whole body.
    pub async fn bytes(self) -> Result<Bytes> {
        let UpstreamResponse {
            response,
            permit: _permit,
            guard: _guard,
        } = self;

        Ok(response.bytes().await?)
    }

    /// text reads the whole body as text.
    pub async fn text(self) -> Result<String> {
        let UpstreamResponse {
            response,
            permit: _permit,
            guard: _guard,
        } = self;

        Ok(response.text().await?)
    }

    /// release finishes the request and frees the connection slot.
    fn release(&mut self) {
        self.permit.take();
        self.guard.take();
    }
}

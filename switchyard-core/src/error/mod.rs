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

pub mod errors;
pub mod message;

pub use errors::ErrorType;
pub use errors::ExternalError;
pub use errors::OrErr;

use std::time::Duration;

// SwitchyardError is the error for switchyard.
#[derive(thiserror::Error, Debug)]
pub enum SwitchyardError {
    // IO is the error for IO operation.
    #[error(transparent)]
    IO(#[from] std::io::Error),

    // UpstreamClientLimitReached is the error when the upstream client cache is full and
    // every cached client still has requests in flight.
    #[error("upstream client cache limit {0} reached")]
    UpstreamClientLimitReached(usize),

    // ResponseHeaderTimeout is the error when the upstream does not send response headers in time.
    #[error("upstream response header timeout after {0:?}")]
    ResponseHeaderTimeout(Duration),

    // InvalidURI is the error when the uri is invalid.
    #[error("invalid uri {0}")]
    InvalidURI(String),

    // ReqwestError is the error for reqwest.
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),

    // ExternalError is the error for external error.
    #[error(transparent)]
    ExternalError(#[from] ExternalError),

    // ValidationError is the error for validate.
    #[error("validate failed: {0}")]
    ValidationError(String),
}

impl SwitchyardError {
    // is_capacity_exceeded returns true if the error is raised by the upstream client cache
    // refusing admission of a new client.
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, SwitchyardError::UpstreamClientLimitReached(_))
    }
}

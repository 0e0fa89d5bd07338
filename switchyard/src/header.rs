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

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use switchyard_core::{
    error::{ErrorType, OrErr},
    Error, Result,
};

/// header_vec_to_headermap converts the raw headers in `Name: value` form to a headermap.
/// Repeated names are appended.
pub fn header_vec_to_headermap(raw_header: Vec<String>) -> Result<HeaderMap> {
    let mut header = HeaderMap::new();
    for h in raw_header {
        let Some((name, value)) = h.split_once(':') else {
            return Err(Error::ValidationError(format!("invalid header {:?}", h)));
        };

        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .or_context(ErrorType::ParseError, format!("header name {:?}", name.trim()))?;
        let value = HeaderValue::from_str(value.trim())
            .or_context(ErrorType::ParseError, format!("header value of {}", name))?;
        header.append(name, value);
    }

    Ok(header)
}

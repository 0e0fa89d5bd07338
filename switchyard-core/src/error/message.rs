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

// Message is the context message attached to an external error.
#[derive(Debug)]
pub struct Message(Cow<'static, str>);

impl From<&'static str> for Message {
    fn from(s: &'static str) -> Self {
        Message(Cow::Borrowed(s))
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Message(Cow::Owned(s))
    }
}

impl Message {
    // as_str returns the string of the message.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

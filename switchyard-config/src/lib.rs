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

use std::path::PathBuf;

pub mod gateway;

/// CARGO_PKG_VERSION is the version of the cargo package.
pub const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// GIT_HASH is the git hash of the package.
pub const GIT_HASH: Option<&str> = option_env!("GIT_HASH");

/// default_config_dir is the default config directory for switchyard.
pub fn default_config_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    return home::home_dir()
        .unwrap_or_default()
        .join(".switchyard")
        .join("config");

    #[cfg(not(target_os = "macos"))]
    return PathBuf::from("/etc/switchyard/");
}

/// default_log_dir is the default log directory for switchyard.
pub fn default_log_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    return home::home_dir()
        .unwrap_or_default()
        .join(".switchyard")
        .join("logs");

    #[cfg(not(target_os = "macos"))]
    return PathBuf::from("/var/log/switchyard/");
}

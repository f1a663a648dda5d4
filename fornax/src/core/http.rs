/*
 *  Copyright 2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Shared HTTP client.
//!
//! One client per worker process so connections to the sandbox and the
//! repository are reused across requests. No overall request timeout:
//! report and archive downloads can be large and slow.

use std::time::Duration;

/// Builds the process-wide client. `verify_ssl = false` accepts the
/// self-signed certificates common on lab-network sandbox installs.
pub fn build_client(verify_ssl: bool) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(!verify_ssl)
        .connect_timeout(Duration::from_secs(15))
        .build()
}

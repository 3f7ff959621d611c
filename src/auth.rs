// Copyright (c) 2025 ADBC Drivers Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Authentication providers.
//!
//! Token acquisition lives outside this crate. The HTTP client only asks a
//! provider for the `Authorization` header value before each API call.

use crate::error::{Error, Result};

/// Supplies the `Authorization` header for API requests.
pub trait AuthProvider: Send + Sync + std::fmt::Debug {
    fn get_auth_header(&self) -> Result<String>;
}

/// Personal access token authentication (`Bearer <token>`).
pub struct PersonalAccessToken {
    token: String,
}

impl PersonalAccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for PersonalAccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersonalAccessToken")
            .field("token", &"<redacted>")
            .finish()
    }
}

impl AuthProvider for PersonalAccessToken {
    fn get_auth_header(&self) -> Result<String> {
        if self.token.is_empty() {
            return Err(Error::InvalidConfig(
                "personal access token is empty".to_string(),
            ));
        }
        Ok(format!("Bearer {}", self.token))
    }
}

// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::time::Duration;

use rpc_common::{Kwargs, RpcError, Value};
use serde::de::DeserializeOwned;

use crate::RpcClient;

/// A named remote operation bound to a client, so it can be invoked like a local function:
///
/// ```ignore
/// let echo = client.remote("echo");
/// let value = echo.call(vec![json!(42)])?;
/// ```
pub struct RemoteProc<'a> {
    client: &'a RpcClient,
    name: String,
    timeout: Option<Duration>,
}

impl<'a> RemoteProc<'a> {
    pub(crate) fn new(client: &'a RpcClient, name: String) -> Self {
        Self {
            client,
            name,
            timeout: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Use `timeout` instead of the client's default for calls through this handle.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn call(&self, args: Vec<Value>) -> Result<Value, RpcError> {
        self.call_kw(args, Kwargs::new())
    }

    pub fn call_kw(&self, args: Vec<Value>, kwargs: Kwargs) -> Result<Value, RpcError> {
        let timeout = self.timeout.unwrap_or(self.client.config().call_timeout);
        self.client
            .call_with_timeout(&self.name, args, kwargs, timeout)
    }

    pub fn call_as<T: DeserializeOwned>(&self, args: Vec<Value>) -> Result<T, RpcError> {
        let value = self.call(args)?;
        serde_json::from_value(value)
            .map_err(|e| RpcError::UnexpectedResult(format!("result of {}: {e}", self.name)))
    }
}

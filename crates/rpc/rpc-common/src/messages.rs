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

use serde::{Deserialize, Serialize};

use crate::{Kwargs, RemoteFault, Value};

/// A call of a named operation, sent by a client over the request/reply channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Kwargs,
}

impl Request {
    pub fn new(name: impl Into<String>, args: Vec<Value>, kwargs: Kwargs) -> Self {
        Self {
            name: name.into(),
            args,
            kwargs,
        }
    }
}

/// The server's answer to exactly one `Request`. When `ok` is false the payload is a string
/// describing the fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    pub payload: Value,
}

impl Response {
    pub fn success(payload: Value) -> Self {
        Self { ok: true, payload }
    }

    pub fn failure(description: impl Into<String>) -> Self {
        Self {
            ok: false,
            payload: Value::String(description.into()),
        }
    }

    /// Unpack into the returned value, or the fault the server reported for `operation`.
    pub fn into_result(self, operation: &str) -> Result<Value, RemoteFault> {
        if self.ok {
            return Ok(self.payload);
        }
        let description = match self.payload {
            Value::String(description) => description,
            other => other.to_string(),
        };
        Err(RemoteFault::new(operation, description))
    }
}

/// A topic-tagged event published by the server to all subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub topic: String,
    pub data: Value,
}

impl BroadcastMessage {
    pub fn new(topic: impl Into<String>, data: Value) -> Self {
        Self {
            topic: topic.into(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failed_response_carries_description_verbatim() {
        let fault = Response::failure("Traceback: boom")
            .into_result("fail")
            .unwrap_err();
        assert_eq!(fault.operation, "fail");
        assert_eq!(fault.to_string(), "Traceback: boom");
    }

    #[test]
    fn non_string_failure_payload_is_rendered() {
        let response = Response {
            ok: false,
            payload: json!({"error": "bad"}),
        };
        let fault = response.into_result("op").unwrap_err();
        assert_eq!(fault.description, r#"{"error":"bad"}"#);
    }

    #[test]
    fn request_without_arguments_decodes() {
        let request: Request = serde_json::from_str(r#"{"name": "balance"}"#).unwrap();
        assert_eq!(request.name, "balance");
        assert!(request.args.is_empty());
        assert!(request.kwargs.is_empty());
    }
}

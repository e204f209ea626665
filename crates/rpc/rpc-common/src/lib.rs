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

//! Entities shared by the RPC server and its clients: the envelopes that travel over the
//! request/reply and publish/subscribe channels, the wire codec, configuration and the error
//! types surfaced to embedding applications.

use std::time::Duration;
use thiserror::Error;

pub use config::RpcConfig;
pub use fault::RemoteFault;
pub use messages::{BroadcastMessage, Request, Response};

pub mod client_args;
pub mod codec;
mod config;
mod fault;
mod messages;
pub mod tracing;

/// Values carried in requests, responses and broadcasts.
pub type Value = serde_json::Value;

/// Keyword arguments of a request.
pub type Kwargs = serde_json::Map<String, Value>;

/// The reserved topic used for liveness broadcasts.
pub const HEARTBEAT_TOPIC: &str = "heartbeat";

/// Errors surfaced by the RPC server and client.
///
/// Transport failures (`is_transport`) are distinct from the two call-level outcomes a caller
/// usually wants to branch on: the server never answering in time, and the server answering with
/// a fault.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("could not bind {0}")]
    CouldNotBind(String),
    #[error("could not connect {0}")]
    CouldNotConnect(String),
    #[error("could not send RPC message: {0}")]
    CouldNotSend(String),
    #[error("could not receive RPC message: {0}")]
    CouldNotReceive(String),
    #[error("could not encode RPC message: {0}")]
    CouldNotEncode(String),
    #[error("could not decode RPC message: {0}")]
    CouldNotDecode(String),
    #[error("could not release endpoint {0}")]
    CouldNotRelease(String),
    #[error("could not start RPC worker thread: {0}")]
    CouldNotStartWorker(String),
    #[error("RPC endpoint is not active")]
    NotActive,
    #[error("RPC worker thread panicked: {0}")]
    WorkerPanicked(String),
    #[error("unexpected result type: {0}")]
    UnexpectedResult(String),
    #[error("timeout of {}ms reached for {operation}", timeout.as_millis())]
    RemoteTimeout {
        operation: String,
        timeout: Duration,
    },
    #[error(transparent)]
    RemoteFault(#[from] RemoteFault),
}

impl RpcError {
    /// True for failures at the socket/encoding layer, as opposed to timeouts and faults
    /// reported by the remote side.
    ///
    /// A result that arrived intact but didn't deserialize into the caller's type, and a local
    /// worker thread that panicked, are not transport failures either.
    pub fn is_transport(&self) -> bool {
        !matches!(
            self,
            RpcError::RemoteTimeout { .. }
                | RpcError::RemoteFault(_)
                | RpcError::NotActive
                | RpcError::WorkerPanicked(_)
                | RpcError::UnexpectedResult(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::RemoteTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_socket_and_wire_failures_are_transport() {
        assert!(RpcError::CouldNotSend("socket closed".into()).is_transport());
        assert!(RpcError::CouldNotDecode("garbled frame".into()).is_transport());
        assert!(RpcError::CouldNotConnect("tcp://nowhere".into()).is_transport());

        let timeout = RpcError::RemoteTimeout {
            operation: "slow".into(),
            timeout: Duration::from_millis(50),
        };
        assert!(timeout.is_timeout());
        assert!(!timeout.is_transport());
        assert!(!RpcError::NotActive.is_transport());
        assert!(!RpcError::WorkerPanicked("boom".into()).is_transport());
        assert!(!RpcError::UnexpectedResult("result of echo: not a u32".into()).is_transport());
    }
}

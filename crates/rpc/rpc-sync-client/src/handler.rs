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

use eyre::eyre;
use rpc_common::Value;
use tracing::warn;

/// Application hooks invoked from the client's subscribe loop.
///
/// Both run on the loop's thread, so a slow handler delays the delivery of later broadcasts
/// (and the detection of lost heartbeats) by as long as it takes.
pub trait BroadcastHandler: Send + Sync {
    /// A broadcast arrived on a subscribed topic other than the heartbeat topic. Errors are
    /// logged; they never stop the loop.
    fn on_message(&self, topic: &str, _data: &Value) -> eyre::Result<()> {
        Err(eyre!("on_message is not implemented (topic '{topic}')"))
    }

    /// Nothing at all arrived on the events channel for a whole tolerance window. Called again
    /// for every further window of silence.
    fn on_disconnected(&self, tolerance: Duration) {
        warn!(
            "RPC server has been silent for more than {}, please check your connection",
            humantime::format_duration(tolerance)
        );
    }
}

/// Handler with the default behaviour for both hooks.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHandler;

impl BroadcastHandler for DefaultHandler {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_handler_rejects_broadcasts_by_name() {
        let err = DefaultHandler.on_message("price", &json!(42)).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("not implemented"), "{message}");
        assert!(message.contains("price"), "{message}");
    }
}

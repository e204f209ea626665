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

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::Ordering;
use std::time::{Instant, SystemTime};

use rpc_common::{BroadcastMessage, RpcConfig, RpcError, codec};
use tracing::{debug, error, info, trace, warn};
use zmq::Socket;

use crate::rpc_client::{ClientInner, locked};

impl ClientInner {
    /// Body of the "rpc-subscribe" thread: apply new subscriptions, deliver broadcasts and watch
    /// for the server going quiet, until the client is stopped.
    pub(crate) fn subscribe_loop(&self, subscribe: Socket) -> Result<(), RpcError> {
        let tolerance = self.config.heartbeat_tolerance;
        let mut window_start = Instant::now();

        let result = loop {
            if !self.active.load(Ordering::SeqCst) {
                break Ok(());
            }

            if let Err(e) = self.apply_new_topics(&subscribe) {
                break Err(e);
            }

            // Poll in short slices so that stop() is noticed promptly even with a long tolerance.
            let window_end = window_start + tolerance;
            let remaining = window_end.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                if self.liveness.record_lost() {
                    warn!(?tolerance, "Lost contact with RPC server");
                }
                self.handler.on_disconnected(tolerance);
                window_start = Instant::now();
                continue;
            }
            let slice = remaining.min(self.config.poll_interval);

            match subscribe.poll(zmq::POLLIN, RpcConfig::poll_millis(slice)) {
                Ok(0) => continue,
                Ok(_) => {}
                Err(e) => {
                    error!(error = ?e, "Error polling events socket. Bailing out.");
                    break Err(RpcError::CouldNotReceive(e.to_string()));
                }
            }

            let frames = match subscribe.recv_multipart(0) {
                Ok(frames) => frames,
                Err(e) => {
                    error!(error = ?e, "Unable to receive broadcast");
                    break Err(RpcError::CouldNotReceive(e.to_string()));
                }
            };
            window_start = Instant::now();

            match codec::decode_broadcast(&frames) {
                Ok(message) => self.deliver(message),
                Err(e) => {
                    // Still proof of life, even if we can't make sense of it.
                    self.liveness.record_message();
                    warn!(error = ?e, "Discarding undecodable broadcast");
                }
            }
        };

        self.active.store(false, Ordering::SeqCst);
        drop(subscribe);
        locked(&self.request).release();
        info!("RPC subscribe loop exited");
        result
    }

    fn apply_new_topics(&self, subscribe: &Socket) -> Result<(), RpcError> {
        for topic in self.topics_recv.try_iter() {
            debug!(topic = topic.as_str(), "Subscribing");
            subscribe
                .set_subscribe(topic.as_bytes())
                .map_err(|e| RpcError::CouldNotConnect(format!("subscribe {topic}: {e}")))?;
        }
        Ok(())
    }

    fn deliver(&self, message: BroadcastMessage) {
        if message.topic == self.config.heartbeat_topic {
            let sent_at = codec::heartbeat_time(&message.data).unwrap_or_else(|| {
                warn!(data = %message.data, "Heartbeat without a usable timestamp");
                SystemTime::now()
            });
            trace!("Heartbeat received");
            if !self.liveness.is_alive() {
                info!("Contact with RPC server restored");
            }
            self.liveness.record_heartbeat(sent_at);
            return;
        }

        if !self.liveness.is_alive() {
            info!("Contact with RPC server restored");
        }
        self.liveness.record_message();
        let topic = message.topic.as_str();
        match catch_unwind(AssertUnwindSafe(|| {
            self.handler.on_message(topic, &message.data)
        })) {
            Ok(Ok(())) => {}
            Ok(Err(report)) => {
                error!(topic, error = ?report, "Broadcast handler failed");
            }
            Err(_) => {
                error!(topic, "Broadcast handler panicked");
            }
        }
    }
}

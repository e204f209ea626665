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

//! ZMQ server: a REP socket serving named operations and a PUB socket for heartbeats and
//! application broadcasts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use rpc_common::{BroadcastMessage, Response, RpcConfig, RpcError, Value, codec};
use tracing::{debug, error, info, trace, warn};
use zmq::Socket;

use crate::registry::{DispatchFault, OperationRegistry};
use crate::Arguments;

/// The addresses the server's sockets actually ended up bound to. Differs from what was asked
/// for when a wildcard port (`tcp://127.0.0.1:*`) was used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundEndpoints {
    pub rpc: String,
    pub events: String,
}

/// Serves named operations over request/reply and publishes broadcasts.
///
/// `S` is the session object every operation is handed. There is exactly one per server, owned
/// by it; operations that need mutable state use interior mutability inside `S`.
///
/// Operations may be registered at any time, including while the server is active; a request
/// always sees the registry as it was when that request was looked up.
pub struct RpcServer<S: Send + Sync + 'static = ()> {
    inner: Arc<Inner<S>>,
}

struct Inner<S> {
    config: RpcConfig,
    zmq_context: zmq::Context,
    session: S,
    registry: OperationRegistry<S>,
    active: AtomicBool,
    // Shared between the dispatch loop (heartbeats) and application threads calling publish().
    publisher: Mutex<Option<Socket>>,
    endpoints: Mutex<Option<BoundEndpoints>>,
    worker: Mutex<Option<JoinHandle<Result<(), RpcError>>>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S: Send + Sync + 'static> RpcServer<S> {
    pub fn new(config: RpcConfig, session: S) -> Self {
        Self::with_context(zmq::Context::new(), config, session)
    }

    pub fn with_context(zmq_context: zmq::Context, config: RpcConfig, session: S) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                zmq_context,
                session,
                registry: OperationRegistry::default(),
                active: AtomicBool::new(false),
                publisher: Mutex::new(None),
                endpoints: Mutex::new(None),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Bind `name` to an operation. A later registration of the same name replaces this one.
    pub fn register<F>(&self, name: impl Into<String>, operation: F)
    where
        F: Fn(&S, &Arguments) -> eyre::Result<Value> + Send + Sync + 'static,
    {
        self.inner.registry.register(name, operation);
    }

    pub fn operation_names(&self) -> Vec<String> {
        self.inner.registry.names()
    }

    pub fn session(&self) -> &S {
        &self.inner.session
    }

    pub fn config(&self) -> &RpcConfig {
        &self.inner.config
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn endpoints(&self) -> Option<BoundEndpoints> {
        locked(&self.inner.endpoints).clone()
    }

    /// Bind both sockets and start the dispatch loop on its own thread. Does nothing if the
    /// server is already active.
    pub fn start(&self, rpc_address: &str, events_address: &str) -> Result<(), RpcError> {
        if self.is_active() {
            return Ok(());
        }
        // A previous run may still be winding down after stop().
        if let Err(e) = self.join() {
            warn!(error = ?e, "Previous RPC dispatch loop ended with an error");
        }

        let reply = self.bind_socket(zmq::REP, rpc_address)?;
        let publish = self.bind_socket(zmq::PUB, events_address)?;
        let endpoints = BoundEndpoints {
            rpc: last_endpoint(&reply, rpc_address),
            events: last_endpoint(&publish, events_address),
        };
        info!(
            rpc_endpoint = endpoints.rpc.as_str(),
            events_endpoint = endpoints.events.as_str(),
            "RPC server listening"
        );

        *locked(&self.inner.publisher) = Some(publish);
        *locked(&self.inner.endpoints) = Some(endpoints);
        self.inner.active.store(true, Ordering::SeqCst);

        let next_heartbeat = Instant::now() + self.inner.config.heartbeat_interval;
        let inner = self.inner.clone();
        let spawned = std::thread::Builder::new()
            .name("rpc-dispatch".to_string())
            .spawn(move || inner.dispatch_loop(reply, next_heartbeat));
        match spawned {
            Ok(handle) => {
                *locked(&self.inner.worker) = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.inner.active.store(false, Ordering::SeqCst);
                locked(&self.inner.publisher).take();
                locked(&self.inner.endpoints).take();
                Err(RpcError::CouldNotStartWorker(e.to_string()))
            }
        }
    }

    /// Ask the dispatch loop to exit. It notices at its next poll boundary, finishing any request
    /// it is in the middle of first.
    pub fn stop(&self) {
        if self.inner.active.swap(false, Ordering::SeqCst) {
            info!("Stopping RPC server");
        }
    }

    /// Wait for the dispatch loop to exit, returning whatever ended it. Returns immediately if
    /// there is no loop to wait for.
    pub fn join(&self) -> Result<(), RpcError> {
        let Some(handle) = locked(&self.inner.worker).take() else {
            return Ok(());
        };
        match handle.join() {
            Ok(result) => result,
            Err(_) => Err(RpcError::WorkerPanicked(
                "RPC dispatch thread panicked".to_string(),
            )),
        }
    }

    /// Send a broadcast to all subscribers of `topic`. Safe to call from any thread.
    pub fn publish(&self, topic: &str, data: Value) -> Result<(), RpcError> {
        if !self.is_active() {
            return Err(RpcError::NotActive);
        }
        self.inner
            .publish_message(&BroadcastMessage::new(topic, data))
    }

    fn bind_socket(&self, kind: zmq::SocketType, address: &str) -> Result<Socket, RpcError> {
        let socket = self
            .inner
            .zmq_context
            .socket(kind)
            .map_err(|e| RpcError::CouldNotBind(format!("{address}: {e}")))?;
        socket
            .set_linger(0)
            .map_err(|e| RpcError::CouldNotBind(format!("{address}: {e}")))?;
        socket
            .bind(address)
            .map_err(|e| RpcError::CouldNotBind(format!("{address}: {e}")))?;
        Ok(socket)
    }
}

impl<S: Send + Sync + 'static> Drop for RpcServer<S> {
    fn drop(&mut self) {
        self.stop();
        if let Err(e) = self.join() {
            warn!(error = ?e, "RPC server did not shut down cleanly");
        }
    }
}

impl<S> Inner<S> {
    fn dispatch_loop(&self, reply: Socket, mut next_heartbeat: Instant) -> Result<(), RpcError> {
        let interval = self.config.heartbeat_interval;

        let result = loop {
            if !self.active.load(Ordering::SeqCst) {
                break Ok(());
            }

            // Never sleep past the next heartbeat.
            let until_heartbeat = next_heartbeat.saturating_duration_since(Instant::now());
            let poll_ms = RpcConfig::poll_millis(until_heartbeat.min(self.config.poll_interval));
            let ready = match reply.poll(zmq::POLLIN, poll_ms) {
                Ok(ready) => ready,
                Err(e) => {
                    error!(error = ?e, "Error polling RPC socket. Bailing out.");
                    break Err(RpcError::CouldNotReceive(e.to_string()));
                }
            };

            // Evaluated every iteration, so an idle server still heartbeats on time.
            let now = Instant::now();
            if now >= next_heartbeat {
                self.heartbeat();
                next_heartbeat = next_heartbeat_after(next_heartbeat, interval, now);
            }

            if ready == 0 {
                continue;
            }

            let frames = match reply.recv_multipart(0) {
                Ok(frames) => frames,
                Err(e) => {
                    error!(error = ?e, "Unable to receive RPC request");
                    break Err(RpcError::CouldNotReceive(e.to_string()));
                }
            };

            // REP sockets strictly alternate, so this must be answered before the next poll.
            let response = self.handle_request(&frames);
            if let Err(e) = send_response(&reply, &response) {
                error!(error = ?e, "Unable to send RPC response");
                break Err(e);
            }
        };

        self.active.store(false, Ordering::SeqCst);
        let released = self.release(reply);
        info!("RPC dispatch loop exited");
        result.and(released)
    }

    fn handle_request(&self, frames: &[Vec<u8>]) -> Response {
        let request = match codec::decode_request(frames) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = ?e, "Invalid request received, replying with error");
                return DispatchFault::InvalidRequest(e.to_string()).into();
            }
        };
        debug!(
            operation = request.name.as_str(),
            args = request.args.len(),
            kwargs = request.kwargs.len(),
            "Dispatching request"
        );
        let response = self.registry.dispatch(&self.session, request);
        trace!(ok = response.ok, "Request complete");
        response
    }

    fn heartbeat(&self) {
        let message = BroadcastMessage::new(
            self.config.heartbeat_topic.clone(),
            codec::heartbeat_payload(SystemTime::now()),
        );
        trace!("Publishing heartbeat");
        if let Err(e) = self.publish_message(&message) {
            error!(error = ?e, "Unable to publish heartbeat");
        }
    }

    fn publish_message(&self, message: &BroadcastMessage) -> Result<(), RpcError> {
        let payload = codec::encode_broadcast(message)?;
        let publisher = locked(&self.publisher);
        let Some(socket) = publisher.as_ref() else {
            return Err(RpcError::NotActive);
        };
        socket.send_multipart(payload, 0).map_err(|e| {
            error!(error = ?e, topic = message.topic.as_str(), "Unable to send broadcast");
            RpcError::CouldNotSend(e.to_string())
        })
    }

    /// Unbind both endpoints and close the sockets.
    fn release(&self, reply: Socket) -> Result<(), RpcError> {
        let publisher = locked(&self.publisher).take();
        let Some(endpoints) = locked(&self.endpoints).take() else {
            return Ok(());
        };

        let mut result = Ok(());
        if let Some(publisher) = publisher {
            if let Err(e) = publisher.unbind(&endpoints.events) {
                result = Err(RpcError::CouldNotRelease(format!("{}: {e}", endpoints.events)));
            }
        }
        if let Err(e) = reply.unbind(&endpoints.rpc) {
            result = Err(RpcError::CouldNotRelease(format!("{}: {e}", endpoints.rpc)));
        }
        result
    }
}

fn send_response(reply: &Socket, response: &Response) -> Result<(), RpcError> {
    let bytes = match codec::encode_response(response) {
        Ok(bytes) => bytes,
        Err(e) => codec::encode_response(&Response::failure(e.to_string()))?,
    };
    reply
        .send(bytes, 0)
        .map_err(|e| RpcError::CouldNotSend(e.to_string()))
}

/// Advance the heartbeat schedule by one interval, so beats don't drift by however late each
/// check happened to run. If the schedule fell behind entirely (a long-running operation held the
/// loop), restart it from `now` rather than sending the missed beats in a burst.
fn next_heartbeat_after(deadline: Instant, interval: Duration, now: Instant) -> Instant {
    let next = deadline + interval;
    if next <= now { now + interval } else { next }
}

fn last_endpoint(socket: &Socket, requested: &str) -> String {
    match socket.get_last_endpoint() {
        Ok(Ok(endpoint)) => endpoint,
        _ => requested.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpc_common::{Kwargs, Request};
    use serde_json::json;

    fn fast_config() -> RpcConfig {
        RpcConfig {
            heartbeat_interval: Duration::from_millis(50),
            poll_interval: Duration::from_millis(10),
            ..RpcConfig::default()
        }
    }

    fn request_socket(ctx: &zmq::Context, endpoint: &str) -> Socket {
        let socket = ctx.socket(zmq::REQ).unwrap();
        socket.set_linger(0).unwrap();
        socket.set_rcvtimeo(5000).unwrap();
        socket.connect(endpoint).unwrap();
        socket
    }

    fn round_trip(socket: &Socket, frames: Vec<Vec<u8>>) -> Response {
        socket.send_multipart(frames, 0).unwrap();
        let reply = socket.recv_multipart(0).unwrap();
        codec::decode_response(&reply).unwrap()
    }

    #[test]
    fn serves_registered_operations() {
        let server = RpcServer::new(fast_config(), ());
        server.register("add", |_: &(), args: &Arguments| {
            let a: i64 = args.get(0, "a")?;
            let b: i64 = args.get(1, "b")?;
            Ok(json!(a + b))
        });
        server.start("tcp://127.0.0.1:*", "tcp://127.0.0.1:*").unwrap();
        let endpoints = server.endpoints().unwrap();

        let ctx = zmq::Context::new();
        let socket = request_socket(&ctx, &endpoints.rpc);
        let mut kwargs = Kwargs::new();
        kwargs.insert("b".to_string(), json!(5));
        let request = Request::new("add", vec![json!(2)], kwargs);
        let response = round_trip(&socket, vec![codec::encode_request(&request).unwrap()]);
        assert_eq!(response, Response::success(json!(7)));

        server.stop();
        server.join().unwrap();
        assert!(!server.is_active());
        assert_eq!(server.endpoints(), None);
    }

    #[test]
    fn malformed_requests_still_get_an_answer() {
        let server = RpcServer::new(fast_config(), ());
        server.start("tcp://127.0.0.1:*", "tcp://127.0.0.1:*").unwrap();
        let endpoints = server.endpoints().unwrap();

        let ctx = zmq::Context::new();
        let socket = request_socket(&ctx, &endpoints.rpc);
        let response = round_trip(&socket, vec![b"{ nope".to_vec()]);
        assert!(!response.ok);
        assert!(response.payload.as_str().unwrap().starts_with("invalid request"));

        let response = round_trip(&socket, vec![b"a".to_vec(), b"b".to_vec()]);
        assert!(!response.ok);
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let server = RpcServer::new(fast_config(), ());
        server.start("tcp://127.0.0.1:*", "tcp://127.0.0.1:*").unwrap();
        let first = server.endpoints().unwrap();
        server.start("tcp://127.0.0.1:*", "tcp://127.0.0.1:*").unwrap();
        assert_eq!(server.endpoints().unwrap(), first);

        server.stop();
        server.stop();
        server.join().unwrap();
        server.join().unwrap();
    }

    #[test]
    fn heartbeat_schedule_does_not_drift() {
        let interval = Duration::from_millis(100);
        let start = Instant::now();
        // Checked 20ms late: the next beat is still due one interval after the last deadline.
        let next = next_heartbeat_after(start, interval, start + Duration::from_millis(20));
        assert_eq!(next, start + interval);
        // Fell behind by several intervals: start over from now instead of bursting.
        let now = start + Duration::from_millis(450);
        assert_eq!(next_heartbeat_after(start, interval, now), now + interval);
    }

    #[test]
    fn publish_requires_an_active_server() {
        let server = RpcServer::new(fast_config(), ());
        assert!(matches!(
            server.publish("price", json!(1)),
            Err(RpcError::NotActive)
        ));
    }

    #[test]
    fn bind_failures_are_reported_to_the_caller() {
        let server = RpcServer::new(fast_config(), ());
        let err = server
            .start("bogus://nowhere", "tcp://127.0.0.1:*")
            .unwrap_err();
        assert!(matches!(err, RpcError::CouldNotBind(_)));
        assert!(!server.is_active());
    }

    #[test]
    fn heartbeats_are_published_while_idle() {
        let server = RpcServer::new(fast_config(), ());
        server.start("tcp://127.0.0.1:*", "tcp://127.0.0.1:*").unwrap();
        let endpoints = server.endpoints().unwrap();

        let ctx = zmq::Context::new();
        let sub = ctx.socket(zmq::SUB).unwrap();
        sub.set_linger(0).unwrap();
        sub.set_rcvtimeo(2000).unwrap();
        sub.connect(&endpoints.events).unwrap();
        sub.set_subscribe(b"heartbeat").unwrap();

        let frames = sub.recv_multipart(0).unwrap();
        let message = codec::decode_broadcast(&frames).unwrap();
        assert_eq!(message.topic, "heartbeat");
        assert!(codec::heartbeat_time(&message.data).is_some());
    }
}

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

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use flume::{Receiver, Sender};
use rpc_common::{Kwargs, Request, RpcConfig, RpcError, Value, codec};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};
use zmq::Socket;

use crate::handler::{BroadcastHandler, DefaultHandler};
use crate::liveness::Liveness;
use crate::remote::RemoteProc;

/// Blocking client for an `RpcServer`.
///
/// Calls go over a REQ socket and are serialized: concurrent callers queue up on a mutex and
/// each gets the socket for one full send/receive round-trip. Broadcasts are received on a
/// background thread and handed to the `BroadcastHandler`.
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    pub(crate) config: RpcConfig,
    pub(crate) zmq_context: zmq::Context,
    pub(crate) handler: Arc<dyn BroadcastHandler>,
    pub(crate) active: AtomicBool,
    pub(crate) request: Mutex<RequestChannel>,
    pub(crate) topics: Mutex<BTreeSet<String>>,
    pub(crate) topics_send: Sender<String>,
    pub(crate) topics_recv: Receiver<String>,
    pub(crate) liveness: Liveness,
    worker: Mutex<Option<JoinHandle<Result<(), RpcError>>>>,
}

/// The REQ side of the request/reply channel.
// Note: `socket` becomes None while a request is in flight, and is put back once the reply has
// been received. A request that times out leaves it None, so the next call starts over on a
// freshly connected socket instead of one that is still waiting for a reply.
#[derive(Default)]
pub(crate) struct RequestChannel {
    address: Option<String>,
    socket: Option<Socket>,
}

impl RequestChannel {
    pub(crate) fn release(&mut self) {
        self.socket = None;
        self.address = None;
    }
}

pub(crate) fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RpcClient {
    /// A client whose broadcast hooks have the default behaviour.
    pub fn new(config: RpcConfig) -> Self {
        Self::with_handler(config, Arc::new(DefaultHandler))
    }

    pub fn with_handler(config: RpcConfig, handler: Arc<dyn BroadcastHandler>) -> Self {
        Self::with_context(zmq::Context::new(), config, handler)
    }

    pub fn with_context(
        zmq_context: zmq::Context,
        config: RpcConfig,
        handler: Arc<dyn BroadcastHandler>,
    ) -> Self {
        let (topics_send, topics_recv) = flume::unbounded();
        Self {
            inner: Arc::new(ClientInner {
                config,
                zmq_context,
                handler,
                active: AtomicBool::new(false),
                request: Mutex::new(RequestChannel::default()),
                topics: Mutex::new(BTreeSet::new()),
                topics_send,
                topics_recv,
                liveness: Liveness::new(SystemTime::now()),
                worker: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &RpcConfig {
        &self.inner.config
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Connect both sockets and start the subscribe loop. Does nothing if already active.
    pub fn start(&self, rpc_address: &str, events_address: &str) -> Result<(), RpcError> {
        if self.is_active() {
            return Ok(());
        }
        if let Err(e) = self.join() {
            warn!(error = ?e, "Previous RPC subscribe loop ended with an error");
        }

        let request = self.inner.connect_socket(zmq::REQ, rpc_address)?;
        let subscribe = self.inner.connect_socket(zmq::SUB, events_address)?;

        // Anything queued by subscribe_topic() so far is also in the topic set.
        while self.inner.topics_recv.try_recv().is_ok() {}
        let heartbeat_topic = self.inner.config.heartbeat_topic.clone();
        let topics = locked(&self.inner.topics).clone();
        for topic in std::iter::once(&heartbeat_topic).chain(topics.iter()) {
            subscribe
                .set_subscribe(topic.as_bytes())
                .map_err(|e| RpcError::CouldNotConnect(format!("{events_address}: {e}")))?;
        }

        *locked(&self.inner.request) = RequestChannel {
            address: Some(rpc_address.to_string()),
            socket: Some(request),
        };
        self.inner.liveness.reset(SystemTime::now());
        self.inner.active.store(true, Ordering::SeqCst);

        let inner = self.inner.clone();
        let spawned = std::thread::Builder::new()
            .name("rpc-subscribe".to_string())
            .spawn(move || inner.subscribe_loop(subscribe));
        match spawned {
            Ok(handle) => {
                *locked(&self.inner.worker) = Some(handle);
                info!(rpc_address, events_address, "RPC client connected");
                Ok(())
            }
            Err(e) => {
                self.inner.active.store(false, Ordering::SeqCst);
                locked(&self.inner.request).release();
                Err(RpcError::CouldNotStartWorker(e.to_string()))
            }
        }
    }

    /// Ask the subscribe loop to exit; it notices within one poll interval.
    pub fn stop(&self) {
        if self.inner.active.swap(false, Ordering::SeqCst) {
            info!("Stopping RPC client");
        }
    }

    pub fn join(&self) -> Result<(), RpcError> {
        let Some(handle) = locked(&self.inner.worker).take() else {
            return Ok(());
        };
        match handle.join() {
            Ok(result) => result,
            Err(_) => Err(RpcError::WorkerPanicked(
                "RPC subscribe thread panicked".to_string(),
            )),
        }
    }

    /// Receive broadcasts on `topic` (a prefix match) from now on. May be called before
    /// `start`; subscriptions survive a stop/start cycle.
    pub fn subscribe_topic(&self, topic: &str) {
        if locked(&self.inner.topics).insert(topic.to_string()) {
            self.inner.topics_send.send(topic.to_string()).ok();
        }
    }

    /// The server timestamp carried by the most recent heartbeat, or the time the client
    /// started if none has arrived yet.
    pub fn last_heartbeat(&self) -> SystemTime {
        self.inner.liveness.last_heartbeat()
    }

    /// False once a whole tolerance window went by without any broadcast; true again as soon as
    /// one arrives. Calls are not refused while this is false.
    pub fn is_server_alive(&self) -> bool {
        self.inner.liveness.is_alive()
    }

    /// How many tolerance windows of silence have been observed since the client was created.
    pub fn lost_heartbeat_windows(&self) -> u64 {
        self.inner.liveness.lost_windows()
    }

    /// A handle for calling one remote operation by name.
    pub fn remote(&self, name: impl Into<String>) -> RemoteProc<'_> {
        RemoteProc::new(self, name.into())
    }

    /// Call `name` with the default timeout.
    pub fn call(&self, name: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Value, RpcError> {
        self.call_with_timeout(name, args, kwargs, self.inner.config.call_timeout)
    }

    /// Call `name` and decode what it returned.
    pub fn call_as<T: DeserializeOwned>(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> Result<T, RpcError> {
        let value = self.call(name, args, kwargs)?;
        serde_json::from_value(value)
            .map_err(|e| RpcError::UnexpectedResult(format!("result of {name}: {e}")))
    }

    /// Send one request and block until its response arrives or `timeout` elapses.
    pub fn call_with_timeout(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        if !self.is_active() {
            return Err(RpcError::NotActive);
        }
        let payload = codec::encode_request(&Request::new(name, args, kwargs))?;

        let mut channel = locked(&self.inner.request);
        let socket = self.inner.take_request_socket(&mut channel)?;
        debug!(operation = name, "Sending RPC request");
        if let Err(e) = socket.send(payload, 0) {
            error!(error = ?e, operation = name, "Unable to send RPC request");
            return Err(RpcError::CouldNotSend(e.to_string()));
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(operation = name, ?timeout, "RPC request timed out");
                return Err(RpcError::RemoteTimeout {
                    operation: name.to_string(),
                    timeout,
                });
            }
            match socket.poll(zmq::POLLIN, RpcConfig::poll_millis(remaining)) {
                Ok(0) => continue,
                Ok(_) => break,
                Err(e) => {
                    error!(error = ?e, operation = name, "Unable to poll for RPC response");
                    return Err(RpcError::CouldNotReceive(e.to_string()));
                }
            }
        }

        let frames = socket.recv_multipart(0).map_err(|e| {
            error!(error = ?e, operation = name, "Unable to receive RPC response");
            RpcError::CouldNotReceive(e.to_string())
        })?;
        channel.socket = Some(socket);
        drop(channel);

        let response = codec::decode_response(&frames)?;
        Ok(response.into_result(name)?)
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.stop();
        if let Err(e) = self.join() {
            warn!(error = ?e, "RPC client did not shut down cleanly");
        }
    }
}

impl ClientInner {
    fn connect_socket(&self, kind: zmq::SocketType, address: &str) -> Result<Socket, RpcError> {
        let fail = |e: zmq::Error| RpcError::CouldNotConnect(format!("{address}: {e}"));
        let socket = self.zmq_context.socket(kind).map_err(fail)?;
        socket.set_linger(0).map_err(fail)?;
        if self.config.tcp_keepalive {
            let idle = i32::try_from(self.config.tcp_keepalive_idle.as_secs()).unwrap_or(i32::MAX);
            socket.set_tcp_keepalive(1).map_err(fail)?;
            socket.set_tcp_keepalive_idle(idle).map_err(fail)?;
        }
        socket.connect(address).map_err(fail)?;
        Ok(socket)
    }

    /// Take the REQ socket for one round-trip, reconnecting if the last call abandoned it.
    fn take_request_socket(&self, channel: &mut RequestChannel) -> Result<Socket, RpcError> {
        if let Some(socket) = channel.socket.take() {
            return Ok(socket);
        }
        let Some(address) = channel.address.as_deref() else {
            return Err(RpcError::NotActive);
        };
        debug!(address, "Reconnecting RPC request socket");
        self.connect_socket(zmq::REQ, address)
    }
}

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

//! Blocking client for the RPC server: synchronous calls with a timeout, plus a background
//! thread that receives broadcasts and keeps track of the server's heartbeat.

mod handler;
mod liveness;
mod pubsub_client;
mod remote;
mod rpc_client;

pub use handler::{BroadcastHandler, DefaultHandler};
pub use remote::RemoteProc;
pub use rpc_client::RpcClient;

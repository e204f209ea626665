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

//! RPC server: exposes named operations on a ZMQ REP socket and publishes heartbeats and
//! application events on a PUB socket.

mod arguments;
mod registry;
mod server;

pub use arguments::{ArgumentError, Arguments};
pub use registry::{DispatchFault, Operation, OperationRegistry};
pub use server::{BoundEndpoints, RpcServer};

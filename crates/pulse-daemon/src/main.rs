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

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use clap::Parser;
use eyre::{Report, eyre};
use mimalloc::MiMalloc;
use rpc_common::tracing;
use rpc_server::RpcServer;
use ::tracing::{error, info, warn};

use crate::args::Args;
use crate::operations::{DaemonSession, register_operations};

mod args;
mod operations;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// How often the main thread wakes to check for shutdown and due status broadcasts.
const MAIN_LOOP_TICK: Duration = Duration::from_millis(100);

const STATUS_TOPIC: &str = "status";

fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let args = Args::parse();

    tracing::init_tracing(args.debug).map_err(|e| eyre!("Unable to configure logging: {}", e))?;

    let config = args.tuning_args.load_config()?;
    info!(
        heartbeat_interval = %humantime::format_duration(config.heartbeat_interval),
        poll_interval = %humantime::format_duration(config.poll_interval),
        "Configuration loaded"
    );

    let zmq_ctx = zmq::Context::new();
    zmq_ctx
        .set_io_threads(args.num_io_threads)
        .map_err(|e| eyre!("Failed to set ZMQ IO threads: {}", e))?;

    let server = RpcServer::with_context(zmq_ctx, config, DaemonSession::new());
    register_operations(&server);

    let rpc_listen = args.server_args.rpc_listen.as_str();
    let events_listen = args.server_args.events_listen.as_str();
    server
        .start(rpc_listen, events_listen)
        .map_err(|e| eyre!("Failed to start RPC server on {}: {}", rpc_listen, e))?;

    let kill_switch = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, kill_switch.clone())?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, kill_switch.clone())?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        rpc_endpoint = rpc_listen,
        events_endpoint = events_listen,
        operations = ?server.operation_names(),
        "Daemon started. Listening for RPC requests."
    );

    let mut next_status = args.status_interval.map(|interval| Instant::now() + interval);
    while !kill_switch.load(Ordering::Relaxed) {
        if !server.is_active() {
            error!("RPC server stopped unexpectedly");
            break;
        }
        if let (Some(due), Some(interval)) = (next_status, args.status_interval) {
            if Instant::now() >= due {
                if let Err(e) = server.publish(STATUS_TOPIC, server.session().status()) {
                    warn!(error = ?e, "Unable to publish status");
                }
                next_status = Some(Instant::now() + interval);
            }
        }
        std::thread::sleep(MAIN_LOOP_TICK);
    }

    info!("Shutting down...");
    server.stop();
    let result = server.join();
    info!(
        requests = server.session().requests(),
        "RPC server exited. Departing..."
    );
    result.map_err(|e| eyre!("RPC server failed: {}", e))
}

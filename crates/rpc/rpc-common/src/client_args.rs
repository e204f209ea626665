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

use clap::builder::ValueHint;
use clap_derive::Parser;
use eyre::eyre;
use figment::Figment;
use figment::providers::{Format, Serialized, Yaml};
use std::path::PathBuf;
use std::time::Duration;

use crate::RpcConfig;

/// Common command line arguments for clients
#[derive(Parser, Debug)] // requires `derive` feature
pub struct RpcClientArgs {
    #[arg(
        long,
        value_name = "rpc-address",
        help = "RPC ZMQ req-reply socket address",
        default_value = "ipc:///tmp/pulse_rpc.sock"
    )]
    pub rpc_address: String,

    #[arg(
        long,
        value_name = "events-address",
        help = "Events ZMQ pub-sub address",
        default_value = "ipc:///tmp/pulse_events.sock"
    )]
    pub events_address: String,
}

/// Common command line arguments for servers
#[derive(Parser, Debug)]
pub struct RpcServerArgs {
    #[arg(
        long,
        value_name = "rpc-listen",
        help = "RPC server address",
        default_value = "ipc:///tmp/pulse_rpc.sock"
    )]
    pub rpc_listen: String,

    #[arg(
        long,
        value_name = "events-listen",
        help = "Events publisher listen address",
        default_value = "ipc:///tmp/pulse_events.sock"
    )]
    pub events_listen: String,
}

/// Overrides for `RpcConfig`, applied on top of whatever the configuration file said.
#[derive(Parser, Debug, Default)]
pub struct RpcTuningArgs {
    #[arg(
        long,
        value_name = "config",
        help = "Path to configuration (YAML) file to use, if any. If not specified, defaults are used.\
                Configuration file values can be overridden by command line arguments.",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[arg(
        long,
        value_name = "heartbeat-interval",
        help = "Interval between server heartbeats (e.g. 10s)",
        value_parser = humantime::parse_duration
    )]
    pub heartbeat_interval: Option<Duration>,

    #[arg(
        long,
        value_name = "heartbeat-tolerance",
        help = "Silence on the events channel after which the server is considered lost (e.g. 60s)",
        value_parser = humantime::parse_duration
    )]
    pub heartbeat_tolerance: Option<Duration>,

    #[arg(
        long,
        value_name = "poll-interval",
        help = "Upper bound on a single socket poll in the worker loops (e.g. 1s)",
        value_parser = humantime::parse_duration
    )]
    pub poll_interval: Option<Duration>,

    #[arg(
        long,
        value_name = "call-timeout",
        help = "Default timeout for remote calls (e.g. 30s)",
        value_parser = humantime::parse_duration
    )]
    pub call_timeout: Option<Duration>,

    #[arg(
        long,
        value_name = "heartbeat-topic",
        help = "Topic the server publishes heartbeats on"
    )]
    pub heartbeat_topic: Option<String>,

    #[arg(
        long,
        value_name = "tcp-keepalive",
        help = "Enable TCP keepalive on tcp:// sockets (true or false)"
    )]
    pub tcp_keepalive: Option<bool>,

    #[arg(
        long,
        value_name = "tcp-keepalive-idle",
        help = "Idle time before the first TCP keepalive probe (e.g. 60s)",
        value_parser = humantime::parse_duration
    )]
    pub tcp_keepalive_idle: Option<Duration>,
}

impl RpcTuningArgs {
    pub fn merge_config(&self, config: &mut RpcConfig) {
        if let Some(interval) = self.heartbeat_interval {
            config.heartbeat_interval = interval;
        }
        if let Some(tolerance) = self.heartbeat_tolerance {
            config.heartbeat_tolerance = tolerance;
        }
        if let Some(poll) = self.poll_interval {
            config.poll_interval = poll;
        }
        if let Some(timeout) = self.call_timeout {
            config.call_timeout = timeout;
        }
        if let Some(topic) = &self.heartbeat_topic {
            config.heartbeat_topic = topic.clone();
        }
        if let Some(keepalive) = self.tcp_keepalive {
            config.tcp_keepalive = keepalive;
        }
        if let Some(idle) = self.tcp_keepalive_idle {
            config.tcp_keepalive_idle = idle;
        }
    }

    /// Load the configuration file if we have it, and then merge the arguments into it.
    pub fn load_config(&self) -> Result<RpcConfig, eyre::Report> {
        let mut config = match &self.config_file {
            Some(config_path) => Figment::new()
                .merge(Serialized::defaults(RpcConfig::default()))
                .merge(Yaml::file(config_path))
                .extract::<RpcConfig>()
                .map_err(|e| {
                    eyre!(
                        "Failed to parse configuration from {:?}: {}",
                        config_path,
                        e
                    )
                })?,
            None => RpcConfig::default(),
        };
        self.merge_config(&mut config);
        Ok(config)
    }
}

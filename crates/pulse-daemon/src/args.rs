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

use clap_derive::Parser;
use rpc_common::client_args::{RpcServerArgs, RpcTuningArgs};
use std::time::Duration;

#[derive(Parser, Debug)] // requires `derive` feature
#[command(version, about = "Serve diagnostic operations over RPC")]
pub struct Args {
    #[command(flatten)]
    pub server_args: RpcServerArgs,

    #[command(flatten)]
    pub tuning_args: RpcTuningArgs,

    #[arg(
        long,
        value_name = "status-interval",
        help = "Publish a `status` broadcast at this interval (e.g. 5s). Disabled if not given.",
        value_parser = humantime::parse_duration
    )]
    pub status_interval: Option<Duration>,

    #[arg(
        long,
        value_name = "num-io-threads",
        help = "Number of ZeroMQ IO threads to use",
        default_value = "1"
    )]
    pub num_io_threads: i32,

    #[arg(long, help = "Enable debug logging", default_value = "false")]
    pub debug: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn status_interval_is_a_human_duration() {
        let args = Args::parse_from([
            "pulse-daemon",
            "--rpc-listen",
            "tcp://0.0.0.0:7899",
            "--status-interval",
            "2s 500ms",
        ]);
        assert_eq!(args.server_args.rpc_listen, "tcp://0.0.0.0:7899");
        assert_eq!(args.status_interval, Some(Duration::from_millis(2500)));
        assert!(!args.debug);
    }
}

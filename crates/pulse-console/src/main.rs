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
use std::time::Duration;

use clap::Parser;
use clap_derive::{Parser, Subcommand};
use eyre::{Error, eyre};
use rpc_common::client_args::{RpcClientArgs, RpcTuningArgs};
use rpc_common::{Kwargs, RpcError, Value};
use rpc_sync_client::{BroadcastHandler, RpcClient};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(version, about = "Talk to an RPC daemon from the command line")]
struct Args {
    #[command(flatten)]
    client_args: RpcClientArgs,

    #[command(flatten)]
    tuning_args: RpcTuningArgs,

    #[arg(long, help = "Enable debug logging", default_value = "false")]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Call an operation and print what it returned.
    Call {
        #[arg(value_name = "name", help = "Operation to call")]
        name: String,

        #[arg(
            value_name = "args",
            help = "Positional arguments as JSON; anything that isn't valid JSON is sent as a string"
        )]
        args: Vec<String>,

        #[arg(
            long = "kw",
            value_name = "key=json",
            help = "Keyword argument, may be repeated"
        )]
        kwargs: Vec<String>,

        #[arg(
            long,
            value_name = "timeout",
            help = "Give up waiting for the reply after this long (e.g. 500ms)",
            value_parser = humantime::parse_duration
        )]
        timeout: Option<Duration>,
    },
    /// Print broadcasts on the given topics until interrupted.
    Listen {
        #[arg(value_name = "topics", required = true)]
        topics: Vec<String>,
    },
}

/// Prints every broadcast it is handed, one per line.
struct PrintingHandler;

impl BroadcastHandler for PrintingHandler {
    fn on_message(&self, topic: &str, data: &Value) -> eyre::Result<()> {
        println!("{topic} {data}");
        Ok(())
    }

    fn on_disconnected(&self, tolerance: Duration) {
        eprintln!(
            "No word from the server for {}; is it still running?",
            humantime::format_duration(tolerance)
        );
    }
}

/// Interpret a command line argument as JSON, falling back to a plain string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn parse_kwargs(raw: &[String]) -> Result<Kwargs, Error> {
    let mut kwargs = Kwargs::new();
    for pair in raw {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(eyre!("Keyword argument {:?} is not of the form key=value", pair));
        };
        if key.is_empty() {
            return Err(eyre!("Keyword argument {:?} has an empty key", pair));
        }
        kwargs.insert(key.to_string(), parse_value(value));
    }
    Ok(kwargs)
}

fn call(
    client: &RpcClient,
    name: &str,
    args: &[String],
    kwargs: &[String],
    timeout: Option<Duration>,
) -> Result<(), Error> {
    let args = args.iter().map(|a| parse_value(a)).collect();
    let kwargs = parse_kwargs(kwargs)?;
    let timeout = timeout.unwrap_or(client.config().call_timeout);
    match client.call_with_timeout(name, args, kwargs, timeout) {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(RpcError::RemoteFault(fault)) => Err(eyre!("{} failed: {}", name, fault)),
        Err(e) => Err(e.into()),
    }
}

fn listen(client: &RpcClient) -> Result<(), Error> {
    let kill_switch = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, kill_switch.clone())?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, kill_switch.clone())?;
    while !kill_switch.load(Ordering::Relaxed) {
        if !client.is_active() {
            warn!("Subscription loop stopped unexpectedly");
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    info!("Stopped listening");
    Ok(())
}

fn main() -> Result<(), Error> {
    color_eyre::install()?;

    let args: Args = Args::parse();

    rpc_common::tracing::init_tracing(args.debug)
        .map_err(|e| eyre!("Unable to configure logging: {}", e))?;
    let config = args.tuning_args.load_config()?;

    let client = RpcClient::with_handler(config, Arc::new(PrintingHandler));
    if let Command::Listen { topics } = &args.command {
        for topic in topics {
            client.subscribe_topic(topic);
        }
    }
    client.start(
        &args.client_args.rpc_address,
        &args.client_args.events_address,
    )?;

    let result = match &args.command {
        Command::Call {
            name,
            args,
            kwargs,
            timeout,
        } => call(&client, name, args, kwargs, *timeout),
        Command::Listen { .. } => listen(&client),
    };

    client.stop();
    client.join()?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn arguments_are_json_or_strings() {
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value("[1, {\"a\": null}]"), json!([1, {"a": null}]));
        assert_eq!(parse_value("hello"), json!("hello"));
        assert_eq!(parse_value("\"quoted\""), json!("quoted"));
    }

    #[test]
    fn keyword_arguments_split_on_the_first_equals() {
        let kwargs =
            parse_kwargs(&["x=1".to_string(), "expr=a=b".to_string()]).unwrap();
        assert_eq!(kwargs.get("x"), Some(&json!(1)));
        assert_eq!(kwargs.get("expr"), Some(&json!("a=b")));

        assert!(parse_kwargs(&["novalue".to_string()]).is_err());
        assert!(parse_kwargs(&["=1".to_string()]).is_err());
    }

    #[test]
    fn call_subcommand_parses() {
        let args = Args::parse_from([
            "pulse-console",
            "--rpc-address",
            "tcp://127.0.0.1:7899",
            "call",
            "sleep",
            "--kw",
            "ms=250",
            "--timeout",
            "100ms",
        ]);
        assert_eq!(args.client_args.rpc_address, "tcp://127.0.0.1:7899");
        let Command::Call {
            name,
            args,
            kwargs,
            timeout,
        } = args.command
        else {
            panic!("expected the call subcommand");
        };
        assert_eq!(name, "sleep");
        assert!(args.is_empty());
        assert_eq!(kwargs, vec!["ms=250".to_string()]);
        assert_eq!(timeout, Some(Duration::from_millis(100)));
    }
}

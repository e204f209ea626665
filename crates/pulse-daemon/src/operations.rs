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

//! The operations the daemon serves, and the session state they share.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use eyre::bail;
use rpc_common::Value;
use rpc_server::{Arguments, RpcServer};
use serde_json::json;

/// Longest `sleep` a caller may ask for.
const MAX_SLEEP: Duration = Duration::from_secs(60);

pub struct DaemonSession {
    started_at: DateTime<Utc>,
    requests: AtomicU64,
}

impl DaemonSession {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            requests: AtomicU64::new(0),
        }
    }

    /// Count one served request, returning the new total.
    fn count(&self) -> u64 {
        self.requests.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> Value {
        let uptime = (Utc::now() - self.started_at).num_milliseconds().max(0);
        json!({
            "started_at": self.started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            "uptime_ms": uptime,
            "requests": self.requests(),
        })
    }
}

impl Default for DaemonSession {
    fn default() -> Self {
        Self::new()
    }
}

pub fn register_operations(server: &RpcServer<DaemonSession>) {
    server.register("echo", echo);
    server.register("ping", ping);
    server.register("sleep", sleep);

    let mut names = server.operation_names();
    names.push("operations".to_string());
    names.sort();
    server.register("operations", move |session: &DaemonSession, _: &Arguments| {
        session.count();
        Ok(json!(names))
    });
}

/// Returns its argument (`x`) unchanged.
fn echo(session: &DaemonSession, args: &Arguments) -> eyre::Result<Value> {
    session.count();
    Ok(args.get(0, "x")?)
}

fn ping(session: &DaemonSession, _args: &Arguments) -> eyre::Result<Value> {
    let requests = session.count();
    Ok(json!({
        "time": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "requests": requests,
    }))
}

/// Blocks the dispatch loop for `ms` milliseconds. Handy for exercising client timeouts.
fn sleep(session: &DaemonSession, args: &Arguments) -> eyre::Result<Value> {
    session.count();
    let ms: u64 = args.get(0, "ms")?;
    let duration = Duration::from_millis(ms);
    if duration > MAX_SLEEP {
        bail!(
            "refusing to sleep for {}, the limit is {}",
            humantime::format_duration(duration),
            humantime::format_duration(MAX_SLEEP)
        );
    }
    std::thread::sleep(duration);
    Ok(json!(ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rpc_common::{Kwargs, RpcConfig};

    fn args(positional: Vec<Value>) -> Arguments {
        Arguments::new(positional, Kwargs::new())
    }

    #[test]
    fn echo_and_ping_count_requests() {
        let session = DaemonSession::new();
        assert_eq!(echo(&session, &args(vec![json!([1, "two"])])).unwrap(), json!([1, "two"]));
        let pong = ping(&session, &args(vec![])).unwrap();
        assert_eq!(pong["requests"], json!(2));
        assert!(pong["time"].as_str().unwrap().ends_with('Z'));
        assert_eq!(session.status()["requests"], json!(2));
    }

    #[test]
    fn sleep_is_bounded() {
        let session = DaemonSession::new();
        let mut kwargs = Kwargs::new();
        kwargs.insert("ms".to_string(), json!(5));
        assert_eq!(sleep(&session, &Arguments::new(vec![], kwargs)).unwrap(), json!(5));

        let err = sleep(&session, &args(vec![json!(3_600_000)])).unwrap_err();
        assert!(err.to_string().starts_with("refusing to sleep for 1h"));
        assert!(sleep(&session, &args(vec![json!("soon")])).is_err());
    }

    #[test]
    fn operations_are_listed() {
        let server = RpcServer::new(RpcConfig::default(), DaemonSession::new());
        register_operations(&server);
        assert_eq!(
            server.operation_names(),
            vec!["echo", "operations", "ping", "sleep"]
        );
    }
}

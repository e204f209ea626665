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

//! Tunables shared by both ends of the RPC channels. Created by the embedding binary (usually
//! from a YAML file merged with command line flags) and handed to the server or client.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::HEARTBEAT_TOPIC;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Topic the server publishes liveness signals on.
    pub heartbeat_topic: String,
    /// How often an active server publishes a heartbeat.
    #[serde(with = "humantime_duration")]
    pub heartbeat_interval: Duration,
    /// How long a client tolerates silence on the broadcast channel before it considers the
    /// server lost.
    #[serde(with = "humantime_duration")]
    pub heartbeat_tolerance: Duration,
    /// Upper bound on a single socket poll in either worker loop. Also bounds how long `stop()`
    /// takes to be observed.
    #[serde(with = "humantime_duration")]
    pub poll_interval: Duration,
    /// Timeout applied to calls that don't specify their own.
    #[serde(with = "humantime_duration")]
    pub call_timeout: Duration,
    pub tcp_keepalive: bool,
    #[serde(with = "humantime_duration")]
    pub tcp_keepalive_idle: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            heartbeat_topic: HEARTBEAT_TOPIC.to_string(),
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_tolerance: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
            call_timeout: Duration::from_millis(30000),
            tcp_keepalive: true,
            tcp_keepalive_idle: Duration::from_secs(60),
        }
    }
}

impl RpcConfig {
    /// Milliseconds for a ZMQ poll. Never zero, since a zero poll would spin.
    pub fn poll_millis(d: Duration) -> i64 {
        i64::try_from(d.as_millis()).unwrap_or(i64::MAX).max(1)
    }
}

mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Figment;
    use figment::providers::{Format, Serialized, Yaml};
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_the_documented_constants() {
        let config = RpcConfig::default();
        assert_eq!(config.heartbeat_topic, "heartbeat");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.heartbeat_tolerance, Duration::from_secs(60));
        assert_eq!(config.call_timeout, Duration::from_millis(30000));
    }

    #[test]
    fn yaml_overrides_merge_over_defaults() {
        let yaml = r#"
heartbeat_interval: 2s
call_timeout: 1500ms
"#;
        let config: RpcConfig = Figment::new()
            .merge(Serialized::defaults(RpcConfig::default()))
            .merge(Yaml::string(yaml))
            .extract()
            .unwrap();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(2));
        assert_eq!(config.call_timeout, Duration::from_millis(1500));
        assert_eq!(config.heartbeat_tolerance, Duration::from_secs(60));
    }

    #[test]
    fn poll_millis_is_never_zero() {
        assert_eq!(RpcConfig::poll_millis(Duration::ZERO), 1);
        assert_eq!(RpcConfig::poll_millis(Duration::from_millis(250)), 250);
    }
}

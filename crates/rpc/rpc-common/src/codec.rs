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

//! Framing of envelopes onto ZMQ multipart messages.
//!
//! Requests and responses are a single JSON frame. Broadcasts are `[topic, JSON data]` so that
//! the SUB side's prefix filter sees the raw topic bytes.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::{BroadcastMessage, Request, Response, RpcError, Value};

pub fn encode_request(request: &Request) -> Result<Vec<u8>, RpcError> {
    serde_json::to_vec(request).map_err(|e| RpcError::CouldNotEncode(e.to_string()))
}

pub fn decode_request(frames: &[Vec<u8>]) -> Result<Request, RpcError> {
    let [body] = frames else {
        return Err(RpcError::CouldNotDecode(format!(
            "Unexpected request length: {}",
            frames.len()
        )));
    };
    serde_json::from_slice(body)
        .map_err(|e| RpcError::CouldNotDecode(format!("Unable to decode request: {e}")))
}

pub fn encode_response(response: &Response) -> Result<Vec<u8>, RpcError> {
    serde_json::to_vec(response).map_err(|e| RpcError::CouldNotEncode(e.to_string()))
}

pub fn decode_response(frames: &[Vec<u8>]) -> Result<Response, RpcError> {
    let [body] = frames else {
        return Err(RpcError::CouldNotDecode(format!(
            "Unexpected response length: {}",
            frames.len()
        )));
    };
    serde_json::from_slice(body)
        .map_err(|e| RpcError::CouldNotDecode(format!("Unable to decode response: {e}")))
}

pub fn encode_broadcast(message: &BroadcastMessage) -> Result<Vec<Vec<u8>>, RpcError> {
    let data = serde_json::to_vec(&message.data)
        .map_err(|e| RpcError::CouldNotEncode(e.to_string()))?;
    Ok(vec![message.topic.as_bytes().to_vec(), data])
}

pub fn decode_broadcast(frames: &[Vec<u8>]) -> Result<BroadcastMessage, RpcError> {
    let [topic, data] = frames else {
        return Err(RpcError::CouldNotDecode(format!(
            "Unexpected broadcast length: {}",
            frames.len()
        )));
    };
    let topic = String::from_utf8(topic.clone())
        .map_err(|_| RpcError::CouldNotDecode(format!("Non UTF-8 topic: {topic:?}")))?;
    let data = serde_json::from_slice(data).map_err(|e| {
        RpcError::CouldNotDecode(format!("Unable to decode broadcast on {topic}: {e}"))
    })?;
    Ok(BroadcastMessage { topic, data })
}

/// Heartbeats carry the server's wall clock as fractional seconds since the epoch.
pub fn heartbeat_payload(now: SystemTime) -> Value {
    let secs = now
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs_f64();
    Value::from(secs)
}

pub fn heartbeat_time(data: &Value) -> Option<SystemTime> {
    let secs = data.as_f64()?;
    let offset = Duration::try_from_secs_f64(secs).ok()?;
    UNIX_EPOCH.checked_add(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn request_preserves_structure() {
        let request = Request::new(
            "buy",
            vec![json!("600036"), json!(35.2), json!(100)],
            json!({"price_type": "limit", "tags": [1, 2, {"a": null}]})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let frames = vec![encode_request(&request).unwrap()];
        assert_eq!(decode_request(&frames).unwrap(), request);
    }

    #[test]
    fn broadcast_topic_is_first_frame() {
        let frames = encode_broadcast(&BroadcastMessage::new("price", json!(101.5))).unwrap();
        assert_eq!(frames[0], b"price".to_vec());
        let decoded = decode_broadcast(&frames).unwrap();
        assert_eq!(decoded.topic, "price");
        assert_eq!(decoded.data, json!(101.5));
    }

    #[test]
    fn wrong_frame_counts_are_rejected() {
        assert!(matches!(
            decode_request(&[]),
            Err(RpcError::CouldNotDecode(_))
        ));
        assert!(matches!(
            decode_response(&[b"{}".to_vec(), b"{}".to_vec()]),
            Err(RpcError::CouldNotDecode(_))
        ));
        assert!(matches!(
            decode_broadcast(&[b"price".to_vec()]),
            Err(RpcError::CouldNotDecode(_))
        ));
    }

    #[test]
    fn garbage_response_is_a_decode_error() {
        let err = decode_response(&[b"not json".to_vec()]).unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn heartbeat_time_survives_the_wire() {
        let now = UNIX_EPOCH + Duration::from_millis(1_700_000_000_250);
        let payload = heartbeat_payload(now);
        let back = heartbeat_time(&payload).unwrap();
        let drift = back
            .duration_since(now)
            .unwrap_or_else(|e| e.duration());
        assert!(drift < Duration::from_millis(1));
        assert_eq!(heartbeat_time(&json!("yesterday")), None);
        assert_eq!(heartbeat_time(&json!(-5.0)), None);
    }
}

//! Engine.IO v4 / Socket.IO v5 text packet codec.
//!
//! Over a WebSocket every frame carries exactly one Engine.IO packet. Socket.IO
//! packets ride inside Engine.IO `message` packets, so an event on the default
//! namespace looks like `42["res_handsign",{...}]`.

use serde::Deserialize;
use serde_json::Value;

/// Errors produced while decoding a packet.
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("empty packet")]
    Empty,
    #[error("unknown engine packet type '{0}'")]
    UnknownEngineType(char),
    #[error("unknown socket packet type '{0}'")]
    UnknownSocketType(char),
    #[error("event packet has no name")]
    MissingEventName,
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Handshake parameters sent by the server in the `open` packet.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPayload {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Interval between server pings, in milliseconds.
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    /// Grace period after a missed ping, in milliseconds.
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    20_000
}

/// Engine.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenPayload),
    Close,
    Ping,
    Pong,
    Message(SocketPacket),
    Upgrade,
    Noop,
}

/// Socket.IO packet on the default namespace.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, payload: Value },
    ConnectError(Value),
    /// Any packet addressed to another namespace. The body is not decoded.
    OtherNamespace(String),
}

impl EnginePacket {
    /// Build an event packet.
    pub fn event(name: impl Into<String>, payload: Value) -> Self {
        Self::Message(SocketPacket::Event {
            name: name.into(),
            payload,
        })
    }

    /// Encode into the text frame representation.
    pub fn encode(&self) -> String {
        match self {
            // Only servers send `open`; encoded for completeness in tests.
            EnginePacket::Open(open) => format!("0{{\"sid\":\"{}\"}}", open.sid),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping => "2".to_string(),
            EnginePacket::Pong => "3".to_string(),
            EnginePacket::Message(packet) => format!("4{}", packet.encode()),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }

    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self, PacketError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        let rest = chars.as_str();

        match kind {
            '0' => Ok(EnginePacket::Open(serde_json::from_str(rest)?)),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping),
            '3' => Ok(EnginePacket::Pong),
            '4' => Ok(EnginePacket::Message(SocketPacket::decode(rest)?)),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            other => Err(PacketError::UnknownEngineType(other)),
        }
    }
}

impl SocketPacket {
    pub fn encode(&self) -> String {
        match self {
            SocketPacket::Connect(None) => "0".to_string(),
            SocketPacket::Connect(Some(data)) => format!("0{data}"),
            SocketPacket::Disconnect => "1".to_string(),
            SocketPacket::Event { name, payload } => {
                let args = match payload {
                    Value::Null => Value::Array(vec![Value::String(name.clone())]),
                    other => Value::Array(vec![Value::String(name.clone()), other.clone()]),
                };
                format!("2{args}")
            }
            SocketPacket::ConnectError(data) => format!("4{data}"),
            // Only ever sent to leave a namespace the server put us in.
            SocketPacket::OtherNamespace(namespace) => format!("1{namespace},"),
        }
    }

    pub fn decode(text: &str) -> Result<Self, PacketError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        let (namespace, body) = split_namespace(chars.as_str());
        if let Some(namespace) = namespace {
            return Ok(SocketPacket::OtherNamespace(namespace.to_string()));
        }

        match kind {
            '0' => {
                if body.is_empty() {
                    Ok(SocketPacket::Connect(None))
                } else {
                    Ok(SocketPacket::Connect(Some(serde_json::from_str(body)?)))
                }
            }
            '1' => Ok(SocketPacket::Disconnect),
            '2' => decode_event(strip_ack_id(body)),
            '4' => {
                let data = if body.is_empty() {
                    Value::Null
                } else {
                    serde_json::from_str(body)?
                };
                Ok(SocketPacket::ConnectError(data))
            }
            other => Err(PacketError::UnknownSocketType(other)),
        }
    }
}

/// `/admin,["x"]` -> `(Some("/admin"), ["x"])`. The default namespace has no
/// prefix, or an explicit `/`.
fn split_namespace(body: &str) -> (Option<&str>, &str) {
    if !body.starts_with('/') {
        return (None, body);
    }
    let (namespace, rest) = match body.find(',') {
        Some(idx) => (&body[..idx], &body[idx + 1..]),
        None => (body, ""),
    };
    if namespace == "/" {
        (None, rest)
    } else {
        (Some(namespace), rest)
    }
}

/// `12["x"]` -> `["x"]`. Acknowledgements are not used by this client.
fn strip_ack_id(body: &str) -> &str {
    body.trim_start_matches(|c: char| c.is_ascii_digit())
}

fn decode_event(body: &str) -> Result<SocketPacket, PacketError> {
    let args: Vec<Value> = serde_json::from_str(body)?;
    let mut args = args.into_iter();
    let name = match args.next() {
        Some(Value::String(name)) => name,
        _ => return Err(PacketError::MissingEventName),
    };
    let payload = args.next().unwrap_or(Value::Null);
    Ok(SocketPacket::Event { name, payload })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_open() {
        let packet = EnginePacket::decode(
            r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#,
        )
        .unwrap();
        match packet {
            EnginePacket::Open(open) => {
                assert_eq!(open.sid, "abc");
                assert_eq!(open.ping_interval, 25_000);
                assert_eq!(open.ping_timeout, 20_000);
                assert_eq!(open.max_payload, Some(1_000_000));
            }
            other => panic!("expected open, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_open_with_defaults() {
        let packet = EnginePacket::decode(r#"0{"sid":"xyz"}"#).unwrap();
        let EnginePacket::Open(open) = packet else {
            panic!("expected open");
        };
        assert_eq!(open.ping_interval, 25_000);
        assert_eq!(open.ping_timeout, 20_000);
    }

    #[test]
    fn test_decode_event() {
        let packet =
            EnginePacket::decode(r#"42["res_handsign",{"time":1,"pred":"A","prob":0.9,"infer":3}]"#)
                .unwrap();
        assert_eq!(
            packet,
            EnginePacket::event("res_handsign", json!({"time":1,"pred":"A","prob":0.9,"infer":3}))
        );
    }

    #[test]
    fn test_decode_event_with_ack_id() {
        let packet = EnginePacket::decode(r#"4217["ping",{"n":1}]"#).unwrap();
        assert_eq!(packet, EnginePacket::event("ping", json!({"n": 1})));

        let packet = EnginePacket::decode(r#"42/,17["ping",{"n":1}]"#).unwrap();
        assert_eq!(packet, EnginePacket::event("ping", json!({"n": 1})));
    }

    #[test]
    fn test_other_namespaces_are_not_decoded() {
        let other = |ns: &str| EnginePacket::Message(SocketPacket::OtherNamespace(ns.to_string()));

        assert_eq!(
            EnginePacket::decode(r#"42/admin,17["res_handsign",{"pred":"A"}]"#).unwrap(),
            other("/admin")
        );
        assert_eq!(EnginePacket::decode("41/admin,").unwrap(), other("/admin"));
        assert_eq!(EnginePacket::decode("40/chat").unwrap(), other("/chat"));
    }

    #[test]
    fn test_decode_event_without_payload() {
        let packet = EnginePacket::decode(r#"42["hello"]"#).unwrap();
        assert_eq!(packet, EnginePacket::event("hello", Value::Null));
    }

    #[test]
    fn test_encode_event() {
        let packet = EnginePacket::event("req_autocomp", json!({"text": "HEL"}));
        assert_eq!(packet.encode(), r#"42["req_autocomp",{"text":"HEL"}]"#);
    }

    #[test]
    fn test_connect_handshake_packets() {
        assert_eq!(EnginePacket::Message(SocketPacket::Connect(None)).encode(), "40");
        assert_eq!(
            EnginePacket::decode(r#"40{"sid":"s1"}"#).unwrap(),
            EnginePacket::Message(SocketPacket::Connect(Some(json!({"sid": "s1"}))))
        );
        assert_eq!(
            EnginePacket::decode(r#"44{"message":"Not authorized"}"#).unwrap(),
            EnginePacket::Message(SocketPacket::ConnectError(json!({"message": "Not authorized"})))
        );
    }

    #[test]
    fn test_control_packets() {
        assert_eq!(EnginePacket::decode("2").unwrap(), EnginePacket::Ping);
        assert_eq!(EnginePacket::Pong.encode(), "3");
        assert_eq!(EnginePacket::decode("1").unwrap(), EnginePacket::Close);
        assert_eq!(
            EnginePacket::decode("41").unwrap(),
            EnginePacket::Message(SocketPacket::Disconnect)
        );
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(EnginePacket::decode(""), Err(PacketError::Empty)));
        assert!(matches!(
            EnginePacket::decode("9"),
            Err(PacketError::UnknownEngineType('9'))
        ));
        assert!(matches!(
            EnginePacket::decode("42[1,2]"),
            Err(PacketError::MissingEventName)
        ));
        assert!(matches!(
            EnginePacket::decode("42not json"),
            Err(PacketError::Json(_))
        ));
    }
}

// src/transport/message.rs
use crate::topology::ProxyCapabilities;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reply text a routing proxy puts in `msg` when answering a probe.
pub const ROUTER_MSG: &str = "isdbgrid";

/// A command to run on whichever proxy gets selected. The proxy owns its
/// meaning; the topology only moves it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub documents: Vec<Value>,
}

impl Command {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            documents: Vec::new(),
        }
    }

    pub fn insert(namespace: impl Into<String>, documents: Vec<Value>) -> Self {
        Self {
            name: "insert".to_string(),
            namespace: namespace.into(),
            documents,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Request {
    Probe,
    Command(Command),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeReply {
    pub ok: bool,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub min_wire_version: i32,
    #[serde(default)]
    pub max_wire_version: i32,
    #[serde(default)]
    pub max_bson_object_size: u64,
    #[serde(default)]
    pub max_message_size_bytes: u64,
    #[serde(default)]
    pub max_write_batch_size: u64,
    #[serde(default)]
    pub local_time: Option<DateTime<Utc>>,
}

impl ProbeReply {
    /// Reply a healthy routing proxy gives.
    pub fn router() -> Self {
        Self {
            ok: true,
            msg: Some(ROUTER_MSG.to_string()),
            min_wire_version: 0,
            max_wire_version: 3,
            max_bson_object_size: 16_777_216,
            max_message_size_bytes: 48_000_000,
            max_write_batch_size: 1000,
            local_time: Some(Utc::now()),
        }
    }

    pub fn is_router(&self) -> bool {
        self.ok && self.msg.as_deref() == Some(ROUTER_MSG)
    }

    pub fn capabilities(&self) -> ProxyCapabilities {
        ProxyCapabilities {
            min_wire_version: self.min_wire_version,
            max_wire_version: self.max_wire_version,
            max_bson_object_size: self.max_bson_object_size,
            max_message_size_bytes: self.max_message_size_bytes,
            max_write_batch_size: self.max_write_batch_size,
            local_time: self.local_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandReply {
    pub ok: bool,
    /// Documents affected.
    #[serde(default)]
    pub n: u64,
    #[serde(default)]
    pub op_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub errmsg: Option<String>,
}

impl CommandReply {
    pub fn success(n: u64) -> Self {
        Self {
            ok: true,
            n,
            op_time: Some(Utc::now()),
            errmsg: None,
        }
    }

    pub fn failure(errmsg: impl Into<String>) -> Self {
        Self {
            ok: false,
            n: 0,
            op_time: None,
            errmsg: Some(errmsg.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        assert_eq!(serde_json::to_string(&Request::Probe).unwrap(), r#""probe""#);

        let request = Request::Command(Command::insert("test.test", vec![json!({"a": 1})]));
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["command"]["name"], "insert");
        assert_eq!(value["command"]["namespace"], "test.test");
    }

    #[test]
    fn test_probe_reply_with_missing_fields() {
        let reply: ProbeReply = serde_json::from_str(r#"{"ok": true, "msg": "isdbgrid"}"#).unwrap();
        assert!(reply.is_router());
        assert_eq!(reply.max_write_batch_size, 0);

        let reply: ProbeReply = serde_json::from_str(r#"{"ok": true}"#).unwrap();
        assert!(!reply.is_router());
    }
}

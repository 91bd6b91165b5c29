//! https://www.jsonrpc.org/specification#response_object
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Serialize, Deserialize, Debug)]
#[serde(untagged)]
pub enum Message {
    StandardRequest(StandardRequest),
    Notification(Notification),
    Response(Response),
}

impl Message {
    pub fn is_response(&self) -> bool {
        matches!(self, Message::Response(_))
    }

    /// The method name, for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::StandardRequest(r) => Some(&r.method),
            Message::Notification(n) => Some(&n.method),
            Message::Response(_) => None,
        }
    }
}

/// A request that expects a response. The id may be a number or a string;
/// clients that send a literal null id are treated as having sent none.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct StandardRequest {
    pub id: Value,
    pub method: String,
    pub params: Value,
}

/// A request that expects no response. On the wire the id member is always
/// serialized as null, which is what the installed miner population expects.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Notification {
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    pub params: Value,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            id: None,
            method: method.into(),
            params,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Response {
    pub id: Value,
    pub result: Value,
    pub error: Option<RpcError>,
}

impl Response {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            result,
            error: None,
        }
    }
}

/// Wire shape of a Stratum error: a three-element array
/// `[code, message, traceback]`. The traceback member is always null here.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct RpcError(pub i32, pub String, pub Option<Value>);

impl From<Response> for Message {
    fn from(res: Response) -> Self {
        Message::Response(res)
    }
}

impl From<StandardRequest> for Message {
    fn from(sr: StandardRequest) -> Self {
        Message::StandardRequest(sr)
    }
}

impl From<Notification> for Message {
    fn from(n: Notification) -> Self {
        Message::Notification(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_with_numeric_id_parses_as_standard_request() {
        let line = r#"{"id":1,"method":"mining.subscribe","params":["cgminer/4.11"]}"#;
        let msg: Message = serde_json::from_str(line).unwrap();
        match msg {
            Message::StandardRequest(r) => {
                assert_eq!(r.id, json!(1));
                assert_eq!(r.method, "mining.subscribe");
            }
            other => panic!("unexpected message kind: {other:?}"),
        }
    }

    #[test]
    fn request_with_null_id_still_parses_as_standard_request() {
        let line = r#"{"id":null,"method":"mining.submit","params":[]}"#;
        let msg: Message = serde_json::from_str(line).unwrap();
        match msg {
            Message::StandardRequest(r) => assert!(r.id.is_null()),
            other => panic!("unexpected message kind: {other:?}"),
        }
    }

    #[test]
    fn message_without_id_parses_as_notification() {
        let line = r#"{"method":"mining.notify","params":["ab"]}"#;
        let msg: Message = serde_json::from_str(line).unwrap();
        match msg {
            Message::Notification(n) => assert_eq!(n.method, "mining.notify"),
            other => panic!("unexpected message kind: {other:?}"),
        }
    }

    #[test]
    fn notification_serializes_with_null_id() {
        let n = Notification::new("mining.set_difficulty", json!([16.0]));
        let line = serde_json::to_string(&Message::from(n)).unwrap();
        assert!(line.contains(r#""id":null"#));
        assert!(line.contains(r#""mining.set_difficulty""#));
    }

    #[test]
    fn error_serializes_as_three_tuple() {
        let res = Response {
            id: json!(7),
            result: Value::Null,
            error: Some(RpcError(24, "Unauthorized worker".into(), None)),
        };
        let line = serde_json::to_string(&res).unwrap();
        assert!(line.contains(r#"[24,"Unauthorized worker",null]"#));
    }

    #[test]
    fn response_roundtrip() {
        let line = r#"{"id":"a1","result":true,"error":null}"#;
        let msg: Message = serde_json::from_str(line).unwrap();
        assert!(msg.is_response());
        assert!(msg.method().is_none());
    }
}

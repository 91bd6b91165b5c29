use serde_json::Value;
use std::convert::TryFrom;

use crate::{
    json_rpc::{Message, Notification},
    methods::{MethodError, ParsingMethodError},
};

/// mining.notify(...)
///
/// The job parameters are built upstream from the block template and are
/// forwarded verbatim as an opaque array; only the first element (the job
/// id) is ever inspected here, for log lines.
#[derive(Debug, Clone, PartialEq)]
pub struct Notify {
    pub job_params: Vec<Value>,
}

impl Notify {
    pub fn job_id(&self) -> Option<&str> {
        self.job_params.first().and_then(|v| v.as_str())
    }
}

impl From<Notify> for Message {
    fn from(notify: Notify) -> Self {
        Message::Notification(Notification::new(
            "mining.notify",
            Value::Array(notify.job_params),
        ))
    }
}

impl TryFrom<Notification> for Notify {
    type Error = MethodError;

    fn try_from(msg: Notification) -> Result<Self, Self::Error> {
        match msg.params.as_array() {
            Some(params) => Ok(Notify {
                job_params: params.clone(),
            }),
            None => Err(ParsingMethodError::not_array_from_value(msg.params).into()),
        }
    }
}

/// mining.set_difficulty(difficulty)
///
/// The miner begins enforcing the new difficulty on the next job received,
/// which is why a pending promotion is always flushed right before a
/// mining.notify.
#[derive(Debug, Clone, PartialEq)]
pub struct SetDifficulty {
    pub value: f64,
}

impl From<SetDifficulty> for Message {
    fn from(sd: SetDifficulty) -> Self {
        let value: Value = sd.value.into();
        Message::Notification(Notification::new(
            "mining.set_difficulty",
            Value::Array(vec![value]),
        ))
    }
}

impl TryFrom<Notification> for SetDifficulty {
    type Error = MethodError;

    fn try_from(msg: Notification) -> Result<Self, Self::Error> {
        let params = msg
            .params
            .as_array()
            .ok_or_else(|| ParsingMethodError::not_array_from_value(msg.params.clone()))?;
        let value = match &params[..] {
            [v] => v
                .as_f64()
                .ok_or_else(|| ParsingMethodError::not_float_from_value(v.clone()))?,
            _ => return Err(ParsingMethodError::wrong_args_from_value(msg.params).into()),
        };
        Ok(SetDifficulty { value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn notify_forwards_params_verbatim() {
        let job = vec![
            json!("42"),
            json!("00000000000000000001"),
            json!("cb1"),
            json!("cb2"),
            json!(["mb1", "mb2"]),
            json!("20000000"),
            json!("170d21b9"),
            json!("5e0f4241"),
            json!(true),
        ];
        let notify = Notify {
            job_params: job.clone(),
        };
        assert_eq!(notify.job_id(), Some("42"));
        match Message::from(notify) {
            Message::Notification(n) => {
                assert_eq!(n.method, "mining.notify");
                assert_eq!(n.params, Value::Array(job));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn set_difficulty_roundtrip() {
        let msg = Message::from(SetDifficulty { value: 1024.0 });
        let notification = match msg {
            Message::Notification(n) => n,
            other => panic!("unexpected message: {other:?}"),
        };
        let parsed = SetDifficulty::try_from(notification).unwrap();
        assert_eq!(parsed.value, 1024.0);
    }
}

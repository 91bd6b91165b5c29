use serde_json::{
    json,
    Value,
    Value::{Array as JArray, String as JString},
};
use std::convert::{TryFrom, TryInto};

use crate::{
    json_rpc::{Response, StandardRequest},
    methods::{MethodError, ParsingMethodError},
    utils::{HexBytes, HexU32Be},
};

/// _mining.subscribe("user agent/version", "extranonce1")_
///
/// First message of a session. The optional second parameter is a previous
/// extranonce1 the client wishes to resume with; it is accepted on the wire
/// and ignored by this pool.
#[derive(Debug, Clone)]
pub struct Subscribe {
    pub id: Value,
    pub user_agent: Option<String>,
}

impl Subscribe {
    /// The response carries a two-deep nested array: the subscription
    /// tuples keyed by the connection id, then the extranonce1 and the
    /// extranonce2 size assigned to this connection.
    pub fn respond(self, connection_id: &str, extra_nonce1: &str, extra_nonce2_size: usize) -> Response {
        let result = json!([
            [
                ["mining.set_difficulty", connection_id],
                ["mining.notify", connection_id]
            ],
            extra_nonce1,
            extra_nonce2_size
        ]);
        Response::ok(self.id, result)
    }
}

impl TryFrom<StandardRequest> for Subscribe {
    type Error = MethodError;

    fn try_from(msg: StandardRequest) -> Result<Self, Self::Error> {
        match msg.params.as_array() {
            Some(params) => {
                let user_agent = match &params[..] {
                    [] => None,
                    [JString(a), ..] => Some(a.clone()),
                    _ => return Err(ParsingMethodError::wrong_args_from_value(msg.params).into()),
                };
                Ok(Self {
                    id: msg.id,
                    user_agent,
                })
            }
            None => Err(ParsingMethodError::not_array_from_value(msg.params).into()),
        }
    }
}

/// _mining.authorize("username.worker", "password")_
#[derive(Debug, Clone, PartialEq)]
pub struct Authorize {
    pub id: Value,
    pub name: String,
    pub password: String,
}

impl Authorize {
    pub fn respond(self, is_ok: bool) -> Response {
        Response::ok(self.id, Value::Bool(is_ok))
    }
}

impl TryFrom<StandardRequest> for Authorize {
    type Error = MethodError;

    fn try_from(msg: StandardRequest) -> Result<Self, Self::Error> {
        match msg.params.as_array() {
            Some(params) => {
                let (name, password) = match &params[..] {
                    [JString(a), JString(b)] => (a.clone(), b.clone()),
                    // password may be omitted entirely
                    [JString(a)] => (a.clone(), String::new()),
                    _ => return Err(ParsingMethodError::wrong_args_from_value(msg.params).into()),
                };
                Ok(Self {
                    id: msg.id,
                    name,
                    password,
                })
            }
            None => Err(ParsingMethodError::not_array_from_value(msg.params).into()),
        }
    }
}

/// _mining.submit("username", "job id", "ExtraNonce2", "nTime", "nOnce")_
///
/// A sixth parameter carries the rolled version bits when the
/// version-rolling extension was negotiated. nTime and nonce stay opaque
/// strings here; the share validator owns their interpretation.
#[derive(Debug, Clone, PartialEq)]
pub struct Submit {
    pub id: Value,
    pub worker_name: String,
    pub job_id: String,
    pub extra_nonce2: HexBytes,
    pub ntime: String,
    pub nonce: String,
    pub version_bits: Option<HexU32Be>,
}

impl Submit {
    pub fn respond(self, is_ok: bool) -> Response {
        Response::ok(self.id, Value::Bool(is_ok))
    }
}

impl TryFrom<StandardRequest> for Submit {
    type Error = MethodError;

    fn try_from(msg: StandardRequest) -> Result<Self, Self::Error> {
        match msg.params.as_array() {
            Some(params) => {
                let (worker_name, job_id, extra_nonce2, ntime, nonce, version_bits) =
                    match &params[..] {
                        [JString(a), JString(b), JString(c), JString(d), JString(e), JString(f)] => {
                            (
                                a.clone(),
                                b.clone(),
                                c.as_str().try_into()?,
                                d.clone(),
                                e.clone(),
                                Some(f.as_str().try_into()?),
                            )
                        }
                        [JString(a), JString(b), JString(c), JString(d), JString(e)] => (
                            a.clone(),
                            b.clone(),
                            c.as_str().try_into()?,
                            d.clone(),
                            e.clone(),
                            None,
                        ),
                        _ => {
                            return Err(ParsingMethodError::wrong_args_from_value(msg.params).into())
                        }
                    };
                Ok(Self {
                    id: msg.id,
                    worker_name,
                    job_id,
                    extra_nonce2,
                    ntime,
                    nonce,
                    version_bits,
                })
            }
            None => Err(ParsingMethodError::not_array_from_value(msg.params).into()),
        }
    }
}

/// _mining.suggest_difficulty(difficulty)_
///
/// Parse failures are not an error: the request is still acknowledged and
/// the unparseable suggestion is dropped, so `value` is optional.
#[derive(Debug, Clone, PartialEq)]
pub struct SuggestDifficulty {
    pub id: Value,
    pub value: Option<f64>,
}

impl SuggestDifficulty {
    pub fn respond(self) -> Response {
        Response::ok(self.id, Value::Bool(true))
    }
}

impl TryFrom<StandardRequest> for SuggestDifficulty {
    type Error = MethodError;

    fn try_from(msg: StandardRequest) -> Result<Self, Self::Error> {
        let value = msg.params.as_array().and_then(|params| {
            params.first().and_then(|v| match v {
                Value::Number(n) => n.as_f64(),
                JString(s) => s.parse::<f64>().ok(),
                _ => None,
            })
        });
        Ok(Self { id: msg.id, value })
    }
}

/// _mining.extranonce.subscribe()_
///
/// Indicates the client supports the mining.set_extranonce method.
/// https://en.bitcoin.it/wiki/BIP_0310
#[derive(Debug, Clone)]
pub struct ExtranonceSubscribe {
    pub id: Value,
}

impl ExtranonceSubscribe {
    pub fn respond(self) -> Response {
        Response::ok(self.id, Value::Bool(true))
    }
}

/// _mining.configure(extensions, extension-parameters)_
#[derive(Debug, Clone)]
pub struct Configure {
    pub id: Value,
    pub extensions: Vec<ConfigureExtension>,
}

impl Configure {
    /// The handler accumulates the result map extension by extension;
    /// unknown extensions are simply absent from it.
    pub fn respond(self, result: serde_json::Map<String, Value>) -> Response {
        Response::ok(self.id, Value::Object(result))
    }
}

#[derive(Debug, Clone)]
pub enum ConfigureExtension {
    VersionRolling {
        mask: Option<HexU32Be>,
        min_bit_count: Option<u64>,
    },
    MinimumDifficulty {
        value: Option<f64>,
    },
    Unknown(String),
}

impl TryFrom<StandardRequest> for Configure {
    type Error = MethodError;

    fn try_from(msg: StandardRequest) -> Result<Self, Self::Error> {
        let (names, params) = match msg.params.as_array() {
            Some(root) => match &root[..] {
                [JArray(names), Value::Object(params)] => (names.clone(), params.clone()),
                [JArray(names)] => (names.clone(), serde_json::Map::new()),
                _ => return Err(ParsingMethodError::wrong_args_from_value(msg.params).into()),
            },
            None => return Err(ParsingMethodError::not_array_from_value(msg.params).into()),
        };

        let mut extensions = Vec::with_capacity(names.len());
        for name in &names {
            let name = name
                .as_str()
                .ok_or_else(|| ParsingMethodError::not_string_from_value(name.clone()))?;
            match name {
                "version-rolling" => {
                    let mask = match params.get("version-rolling.mask") {
                        Some(JString(s)) => Some(s.as_str().try_into()?),
                        Some(v) => {
                            return Err(
                                ParsingMethodError::unexpected_value_from_value(v.clone()).into()
                            )
                        }
                        None => None,
                    };
                    let min_bit_count = params
                        .get("version-rolling.min-bit-count")
                        .and_then(|v| v.as_u64());
                    extensions.push(ConfigureExtension::VersionRolling {
                        mask,
                        min_bit_count,
                    });
                }
                "minimum-difficulty" => {
                    let value = params.get("minimum-difficulty.value").and_then(|v| v.as_f64());
                    extensions.push(ConfigureExtension::MinimumDifficulty { value });
                }
                other => extensions.push(ConfigureExtension::Unknown(other.to_string())),
            }
        }
        Ok(Self {
            id: msg.id,
            extensions,
        })
    }
}

use hex::FromHexError;
use std::convert::TryFrom;

pub mod client_to_server;
pub mod server_to_client;

use crate::json_rpc::StandardRequest;
use serde_json::Value;

/// Errors encountered while converting valid json-rpc messages into typed
/// Stratum methods.
#[derive(Debug)]
pub enum MethodError {
    /// The request named a method this protocol does not define. Carries the
    /// offending method name.
    MethodNotFound(String),
    /// The method is known but its parameters could not be parsed.
    ParsingMethodError(ParsingMethodError),
}

impl From<ParsingMethodError> for MethodError {
    fn from(pars_err: ParsingMethodError) -> Self {
        MethodError::ParsingMethodError(pars_err)
    }
}

impl From<FromHexError> for MethodError {
    fn from(hex_err: FromHexError) -> Self {
        MethodError::ParsingMethodError(ParsingMethodError::HexError(Box::new(hex_err)))
    }
}

#[derive(Debug)]
pub enum ParsingMethodError {
    HexError(Box<FromHexError>),
    ValueNotAnArray(Box<Value>),
    WrongArgs(Box<Value>),
    ValueNotAString(Box<Value>),
    ValueNotAFloat(Box<Value>),
    UnexpectedValue(Box<Value>),
}

impl ParsingMethodError {
    pub fn not_array_from_value(v: Value) -> Self {
        ParsingMethodError::ValueNotAnArray(Box::new(v))
    }

    pub fn not_string_from_value(v: Value) -> Self {
        ParsingMethodError::ValueNotAString(Box::new(v))
    }

    pub fn not_float_from_value(v: Value) -> Self {
        ParsingMethodError::ValueNotAFloat(Box::new(v))
    }

    pub fn wrong_args_from_value(v: Value) -> Self {
        ParsingMethodError::WrongArgs(Box::new(v))
    }

    pub fn unexpected_value_from_value(v: Value) -> Self {
        ParsingMethodError::UnexpectedValue(Box::new(v))
    }
}

/// Every client→server method a pool front-end dispatches on.
#[derive(Debug)]
pub enum Client2Server {
    Subscribe(client_to_server::Subscribe),
    Authorize(client_to_server::Authorize),
    Submit(client_to_server::Submit),
    SuggestDifficulty(client_to_server::SuggestDifficulty),
    Configure(client_to_server::Configure),
    ExtranonceSubscribe(client_to_server::ExtranonceSubscribe),
    /// Legacy methods some firmwares emit; servers ignore them.
    GetTransactions { id: Value },
    MultiVersion { id: Value },
}

impl TryFrom<StandardRequest> for Client2Server {
    type Error = MethodError;

    fn try_from(msg: StandardRequest) -> Result<Self, Self::Error> {
        match msg.method.as_str() {
            "mining.subscribe" => Ok(Client2Server::Subscribe(msg.try_into()?)),
            "mining.authorize" => Ok(Client2Server::Authorize(msg.try_into()?)),
            "mining.submit" => Ok(Client2Server::Submit(msg.try_into()?)),
            "mining.suggest_difficulty" => Ok(Client2Server::SuggestDifficulty(msg.try_into()?)),
            "mining.configure" => Ok(Client2Server::Configure(msg.try_into()?)),
            "mining.extranonce.subscribe" => Ok(Client2Server::ExtranonceSubscribe(
                client_to_server::ExtranonceSubscribe { id: msg.id },
            )),
            "mining.get_transactions" => Ok(Client2Server::GetTransactions { id: msg.id }),
            "mining.multi_version" => Ok(Client2Server::MultiVersion { id: msg.id }),
            _ => Err(MethodError::MethodNotFound(msg.method)),
        }
    }
}

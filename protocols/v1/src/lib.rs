#![allow(clippy::result_unit_err)]
//! Stratum V1 application protocol.
//!
//! Stratum V1 is line-delimited JSON-RPC over TCP. There are two kinds of
//! messages: **requests** and **responses**. A request carrying a non-null
//! message id expects a response; a **notification** carries no id (or a null
//! one) and expects none. A typical notification is the server broadcasting a
//! new mining job.
//!
//! Every request contains three parts:
//! * message id: integer or string
//! * remote method: unicode string
//! * parameters: list of parameters
//!
//! Every response contains:
//! * message id: same id as the paired request
//! * result: any json-encoded value
//! * error: null, or a three-element list `[code, message, traceback]`
//!
//! References:
//! [https://braiins.com/stratum-v1/docs]
//! [https://en.bitcoin.it/wiki/Stratum_mining_protocol]
//! [https://en.bitcoin.it/wiki/BIP_0310]

pub mod error;
pub mod json_rpc;
pub mod methods;
pub mod utils;

pub use error::StratumError;
pub use json_rpc::Message;
pub use methods::{client_to_server, server_to_client, Client2Server};

//! Message types for the pool protocol.
//!
//! Outbound commands serialize as `{"method", "id", "params"}`. Inbound text
//! is either a notification (it has a `method` key) or a response to one of
//! our commands (it has a `result` key).

use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// Method tokens understood by the pool.
pub mod methods {
    /// Capability negotiation, sent first after connect
    pub const CAPABILITY: &str = "jinakdnien";
    /// Login with `[user, password]`
    pub const LOGIN: &str = "vuehainoienf";
    /// Share submission with `[user, hex nonce, hex solution]`
    pub const SUBMIT: &str = "kateyondienn";
    /// New work: `[block id, base64 nonce]`
    pub const NOTIFY: &str = "zesopalconen";
    /// Difficulty change: `[difficulty]`
    pub const SET_DIFFICULTY: &str = "bafomnakeni";
}

/// Command sent to the pool.
///
/// Field order is part of the wire format.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    pub method: &'static str,
    pub id: u32,
    pub params: Vec<Value>,
}

impl Request {
    pub fn capability(id: u32) -> Self {
        Self {
            method: methods::CAPABILITY,
            id,
            params: Vec::new(),
        }
    }

    pub fn login(id: u32, user: &str, password: &str) -> Self {
        Self {
            method: methods::LOGIN,
            id,
            params: vec![Value::from(user), Value::from(password)],
        }
    }

    pub fn submit(id: u32, user: &str, nonce_hex: String, solution_hex: String) -> Self {
        Self {
            method: methods::SUBMIT,
            id,
            params: vec![
                Value::from(user),
                Value::from(nonce_hex),
                Value::from(solution_hex),
            ],
        }
    }
}

/// A parsed inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolMessage {
    /// New work for the given block
    Notify { block_height: u64, nonce: Vec<u8> },

    /// New share difficulty
    SetDifficulty(Decimal),

    /// Boolean verdict on the last command
    Ack(bool),

    /// Notification with a method we do not handle
    Unhandled(String),

    /// Response whose result is not a boolean, or a notification whose
    /// method is not a string
    Ignored,
}

impl PoolMessage {
    /// Parse one JSON message.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let object = value
            .as_object()
            .ok_or_else(|| Error::Protocol("message is not a JSON object".into()))?;

        // Any message carrying a `method` key is a notification, never a
        // response.
        if let Some(method) = object.get("method") {
            let Some(method) = method.as_str() else {
                return Ok(PoolMessage::Ignored);
            };
            let params = object
                .get("params")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();

            return match method {
                methods::NOTIFY => Ok(PoolMessage::Notify {
                    block_height: parse_block_height(param(params, 0, method)?)?,
                    nonce: parse_nonce(param(params, 1, method)?)?,
                }),
                methods::SET_DIFFICULTY => Ok(PoolMessage::SetDifficulty(parse_difficulty(
                    param(params, 0, method)?,
                )?)),
                other => Ok(PoolMessage::Unhandled(other.to_string())),
            };
        }

        Ok(match object.get("result").and_then(parse_ack) {
            Some(accepted) => PoolMessage::Ack(accepted),
            None => PoolMessage::Ignored,
        })
    }
}

fn param<'a>(params: &'a [Value], index: usize, method: &str) -> Result<&'a Value> {
    params
        .get(index)
        .ok_or_else(|| Error::Protocol(format!("{method}: missing parameter {index}")))
}

fn parse_block_height(value: &Value) -> Result<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| Error::Protocol(format!("invalid block id: {value}")))
}

fn parse_nonce(value: &Value) -> Result<Vec<u8>> {
    let text = value
        .as_str()
        .ok_or_else(|| Error::Protocol(format!("invalid nonce: {value}")))?;
    Ok(STANDARD.decode(text.trim())?)
}

fn parse_difficulty(value: &Value) -> Result<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return Err(Error::Protocol(format!("invalid difficulty: {value}"))),
    };

    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| Error::Protocol(format!("invalid difficulty {text}: {e}")))
}

/// Booleans, and strings spelling a boolean in any case, are acknowledgements.
fn parse_ack(result: &Value) -> Option<bool> {
    match result {
        Value::Bool(b) => Some(*b),
        Value::String(s) => {
            let s = s.trim();
            if s.eq_ignore_ascii_case("true") {
                Some(true)
            } else if s.eq_ignore_ascii_case("false") {
                Some(false)
            } else {
                None
            }
        }
        _ => None,
    }
}

//! Minimal Solidity ABI encoding for the method shapes the gateway uses.
//!
//! The contract surface is small and fixed (see the signature sets in
//! [`crate::registry`]), so this implements exactly the types those
//! signatures need: `address`, `uint256`, and `string` arguments, plus
//! `uint256` and `bool` return decoding. Dynamic values follow the
//! standard head/tail layout with offsets relative to the start of the
//! argument area.

use alloy_primitives::{keccak256, Address, B256, U256};

use crate::errors::{GatewayError, Result};

/// An argument value for a contract call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiValue {
    Address(Address),
    Uint(U256),
    Str(String),
}

/// First four bytes of the keccak-256 hash of the canonical signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Full keccak-256 hash of an event signature (log topic zero).
pub fn event_topic(signature: &str) -> B256 {
    keccak256(signature.as_bytes())
}

/// Encode a complete calldata payload: selector followed by arguments.
pub fn encode_call(signature: &str, args: &[AbiValue]) -> Vec<u8> {
    debug_assert_eq!(
        param_count(signature),
        args.len(),
        "argument count does not match signature {signature}"
    );
    let mut data = Vec::with_capacity(4 + 32 * args.len());
    data.extend_from_slice(&selector(signature));
    data.extend_from_slice(&encode_args(args));
    data
}

/// Encode an argument list using the head/tail layout.
pub fn encode_args(args: &[AbiValue]) -> Vec<u8> {
    let head_len = 32 * args.len();
    let mut head = Vec::with_capacity(head_len);
    let mut tail: Vec<u8> = Vec::new();

    for arg in args {
        match arg {
            AbiValue::Address(a) => head.extend_from_slice(&address_word(a)),
            AbiValue::Uint(u) => head.extend_from_slice(&u.to_be_bytes::<32>()),
            AbiValue::Str(s) => {
                // Head word holds the byte offset of the tail entry.
                let offset = U256::from(head_len + tail.len());
                head.extend_from_slice(&offset.to_be_bytes::<32>());

                let bytes = s.as_bytes();
                tail.extend_from_slice(&U256::from(bytes.len()).to_be_bytes::<32>());
                tail.extend_from_slice(bytes);
                let rem = bytes.len() % 32;
                if rem != 0 {
                    tail.resize(tail.len() + 32 - rem, 0);
                }
            }
        }
    }

    head.extend_from_slice(&tail);
    head
}

/// Decode a single `uint256` return value.
pub fn decode_uint(data: &[u8]) -> Result<U256> {
    if data.len() < 32 {
        return Err(GatewayError::Parse(format!(
            "uint256 return needs 32 bytes, got {}",
            data.len()
        )));
    }
    Ok(U256::from_be_slice(&data[..32]))
}

/// Decode a single `bool` return value.
pub fn decode_bool(data: &[u8]) -> Result<bool> {
    let word = decode_uint(data)?;
    Ok(!word.is_zero())
}

/// Read the `uint256` at word `index` of an argument area (no selector).
pub fn word_at(data: &[u8], index: usize) -> Result<U256> {
    let start = index * 32;
    if data.len() < start + 32 {
        return Err(GatewayError::Parse(format!(
            "data too short for word {index}"
        )));
    }
    Ok(U256::from_be_slice(&data[start..start + 32]))
}

fn address_word(a: &Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(a.as_slice());
    word
}

fn param_count(signature: &str) -> usize {
    let inner = signature
        .split_once('(')
        .and_then(|(_, rest)| rest.strip_suffix(')'))
        .unwrap_or("");
    if inner.is_empty() {
        0
    } else {
        inner.split(',').count()
    }
}

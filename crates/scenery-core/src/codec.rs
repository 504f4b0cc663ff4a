//! Storage encoding of identifiers and binary buffers
//!
//! Documents use MongoDB extended JSON for binary data:
//! `{"$binary": {"base64": "...", "subType": "03"}}`. Identifiers are written
//! with subtype `03` and opaque buffers with subtype `00`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};

use crate::error::{CodecError, IdError};
use crate::ids::{Identifier, id_to_bytes};

pub const BINARY_KEY: &str = "$binary";
pub const UUID_KEY: &str = "$uuid";

pub const SUBTYPE_GENERIC: u8 = 0x00;
pub const SUBTYPE_UUID_LEGACY: u8 = 0x03;
pub const SUBTYPE_UUID: u8 = 0x04;

const ID_SUBTYPES: &[u8] = &[SUBTYPE_UUID_LEGACY, SUBTYPE_UUID];
const BUFFER_SUBTYPES: &[u8] = &[SUBTYPE_GENERIC];

/// Wrap raw bytes in an extended-JSON binary value.
pub fn encode_binary(bytes: &[u8], subtype: u8) -> Value {
    json!({
        BINARY_KEY: {
            "base64": STANDARD.encode(bytes),
            "subType": format!("{subtype:02x}"),
        }
    })
}

/// Unwrap an extended-JSON binary value into its subtype and bytes.
///
/// Both the canonical form and the legacy `{"$binary": "...", "$type": "03"}`
/// form are accepted.
pub fn decode_binary(value: &Value) -> Result<(u8, Vec<u8>), CodecError> {
    let not_binary = || CodecError::NotBinary(short(value));
    let obj = value.as_object().ok_or_else(not_binary)?;
    let binary = obj.get(BINARY_KEY).ok_or_else(not_binary)?;

    let (payload, subtype) = match binary {
        Value::Object(inner) => (
            inner.get("base64").and_then(Value::as_str),
            inner.get("subType").and_then(Value::as_str),
        ),
        Value::String(payload) => (
            Some(payload.as_str()),
            obj.get("$type").and_then(Value::as_str),
        ),
        _ => (None, None),
    };
    let payload = payload.ok_or_else(not_binary)?;
    let subtype = match subtype {
        Some(text) => u8::from_str_radix(text, 16).map_err(|_| not_binary())?,
        None => SUBTYPE_GENERIC,
    };

    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| CodecError::Base64(e.to_string()))?;
    Ok((subtype, bytes))
}

pub fn encode_id(id: &Identifier) -> Value {
    encode_binary(id.as_bytes(), SUBTYPE_UUID_LEGACY)
}

/// Decode an identifier from its storage form.
///
/// Accepts the binary form, `{"$uuid": "..."}` and a plain textual UUID, since
/// raw input from clients carries identifiers as text.
pub fn decode_id(value: &Value) -> Result<Identifier, IdError> {
    match value {
        Value::String(text) => id_to_bytes(text),
        Value::Object(obj) if obj.contains_key(UUID_KEY) => match obj.get(UUID_KEY) {
            Some(Value::String(text)) => id_to_bytes(text),
            _ => Err(CodecError::NotBinary(short(value)).into()),
        },
        _ => {
            let (subtype, bytes) = decode_binary(value)?;
            if !ID_SUBTYPES.contains(&subtype) {
                return Err(CodecError::Subtype {
                    found: subtype,
                    expected: ID_SUBTYPES,
                }
                .into());
            }
            Identifier::from_slice(&bytes)
        }
    }
}

pub fn encode_ids<'a, I>(ids: I) -> Value
where
    I: IntoIterator<Item = &'a Identifier>,
{
    Value::Array(ids.into_iter().map(encode_id).collect())
}

pub fn decode_ids(value: &Value) -> Result<Vec<Identifier>, IdError> {
    match value {
        Value::Array(items) => items.iter().map(decode_id).collect(),
        other => Err(CodecError::NotBinary(short(other)).into()),
    }
}

pub fn encode_bytes(bytes: &[u8]) -> Value {
    encode_binary(bytes, SUBTYPE_GENERIC)
}

pub fn decode_bytes(value: &Value) -> Result<Vec<u8>, CodecError> {
    let (subtype, bytes) = decode_binary(value)?;
    if !BUFFER_SUBTYPES.contains(&subtype) {
        return Err(CodecError::Subtype {
            found: subtype,
            expected: BUFFER_SUBTYPES,
        });
    }
    Ok(bytes)
}

/// Whether a value is an extended-JSON binary.
pub fn is_binary(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|obj| obj.contains_key(BINARY_KEY))
}

/// Canonical text of an identifier-valued field, used for comparisons across
/// the binary and textual encodings.
pub fn id_text(value: &Value) -> Option<String> {
    decode_id(value).ok().map(|id| id.to_string())
}

fn short(value: &Value) -> String {
    let text = value.to_string();
    if text.chars().count() > 48 {
        format!("{}...", text.chars().take(48).collect::<String>())
    } else {
        text
    }
}

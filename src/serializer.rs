//! Conversion between session objects and stored payloads

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::error::SessionResult;
use crate::session::SessionData;

/// Stored form of a session object.
///
/// `Text` is written to the document as a JSON string, `Structured` as a
/// nested object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Text(String),
    Structured(Value),
}

impl Payload {
    /// Textual view of the payload, encoding structured values as JSON
    pub fn into_text(self) -> SessionResult<String> {
        match self {
            Payload::Text(text) => Ok(text),
            Payload::Structured(value) => Ok(serde_json::to_string(&value)?),
        }
    }
}

/// Caller-supplied serialize function
pub type SerializeFn = Arc<dyn Fn(&SessionData) -> SessionResult<Payload> + Send + Sync>;

/// Caller-supplied unserialize function
pub type UnserializeFn = Arc<dyn Fn(Payload) -> SessionResult<SessionData> + Send + Sync>;

/// Serialization policy, fixed for the lifetime of a store
#[derive(Clone)]
pub enum Serializer {
    /// Caller-supplied pair
    Custom {
        serialize: SerializeFn,
        unserialize: UnserializeFn,
    },
    /// Shallow structural copy with the cookie in its flattened form
    Structural,
    /// JSON text encode/decode
    Textual,
}

impl Serializer {
    /// Pick the policy from the store options.
    ///
    /// Any override wins; a missing half of the pair falls back to the
    /// structural copy or the identity decode.
    pub fn from_options(
        serialize: Option<SerializeFn>,
        unserialize: Option<UnserializeFn>,
        stringify: bool,
    ) -> Self {
        if serialize.is_some() || unserialize.is_some() {
            return Serializer::Custom {
                serialize: serialize.unwrap_or_else(|| Arc::new(structural_copy)),
                unserialize: unserialize.unwrap_or_else(|| Arc::new(identity)),
            };
        }

        if stringify {
            Serializer::Textual
        } else {
            Serializer::Structural
        }
    }

    pub fn serialize(&self, session: &SessionData) -> SessionResult<Payload> {
        match self {
            Serializer::Custom { serialize, .. } => serialize(session),
            Serializer::Structural => structural_copy(session),
            Serializer::Textual => Ok(Payload::Text(serde_json::to_string(session)?)),
        }
    }

    pub fn unserialize(&self, payload: Payload) -> SessionResult<SessionData> {
        match self {
            Serializer::Custom { unserialize, .. } => unserialize(payload),
            Serializer::Structural => identity(payload),
            Serializer::Textual => {
                let text = payload.into_text()?;
                Ok(serde_json::from_str(&text)?)
            }
        }
    }
}

impl fmt::Debug for Serializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Serializer::Custom { .. } => f.write_str("Serializer::Custom"),
            Serializer::Structural => f.write_str("Serializer::Structural"),
            Serializer::Textual => f.write_str("Serializer::Textual"),
        }
    }
}

/// Default serialize function: a copy of the session as a JSON object, with
/// the cookie reduced to its plain `toJSON` fields.
pub fn structural_copy(session: &SessionData) -> SessionResult<Payload> {
    Ok(Payload::Structured(serde_json::to_value(session)?))
}

/// Default unserialize function: decode the stored value as-is.
pub fn identity(payload: Payload) -> SessionResult<SessionData> {
    match payload {
        Payload::Structured(value) => Ok(serde_json::from_value(value)?),
        // Text written by a stringifying store is still a JSON document
        Payload::Text(text) => Ok(serde_json::from_str(&text)?),
    }
}

//! Wire model and request classification.
//!
//! Classification decides the acknowledgment shape from shallow fields of
//! the raw body (the request type, the `hidden` flag of a commit, the
//! custom id of a component), so the acknowledgment is never deferred
//! behind a full parse or any store access.

use serde::Deserialize;
use serde_json::Value;
use veil_core::Error;

/// Liveness probe.
pub const REQUEST_TYPE_PROBE: u64 = 1;
/// Slash-style command invocation.
pub const REQUEST_TYPE_COMMAND: u64 = 2;
/// A control on an existing message was invoked.
pub const REQUEST_TYPE_COMPONENT: u64 = 3;

/// Acknowledgment response types on the wire.
const ACK_TYPE_PONG: u64 = 1;
const ACK_TYPE_DEFERRED_REPLY: u64 = 5;
const ACK_TYPE_DEFERRED_UPDATE: u64 = 6;

/// Message flag marking a reply visible only to the invoking actor.
const FLAG_PRIVATE: u64 = 1 << 6;

/// Custom-id prefix for disclosure controls.
pub const DISCLOSE_PREFIX: &str = "disclose:";

/// The closed set of acknowledgment shapes. One of these is always the
/// entire synchronous response; final content arrives later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckShape {
    /// Fixed reply to a liveness probe; no further processing.
    Pong,
    /// A fresh deferred reply, optionally private.
    DeferredReply { private: bool },
    /// Defer while updating the message the control lives on.
    DeferredUpdate,
}

impl AckShape {
    /// Wire encoding of the acknowledgment.
    pub fn to_body(&self) -> Value {
        match self {
            AckShape::Pong => serde_json::json!({ "type": ACK_TYPE_PONG }),
            AckShape::DeferredReply { private: false } => {
                serde_json::json!({ "type": ACK_TYPE_DEFERRED_REPLY })
            }
            AckShape::DeferredReply { private: true } => serde_json::json!({
                "type": ACK_TYPE_DEFERRED_REPLY,
                "data": { "flags": FLAG_PRIVATE },
            }),
            AckShape::DeferredUpdate => serde_json::json!({ "type": ACK_TYPE_DEFERRED_UPDATE }),
        }
    }
}

/// Decide the acknowledgment shape from the raw, unparsed request.
///
/// Reads only `type`, `data.options.hidden` and `data.custom_id`.
pub fn classify(raw: &[u8]) -> veil_core::Result<AckShape> {
    let value: Value = serde_json::from_slice(raw).map_err(|e| Error::Validation {
        field: "body".to_string(),
        reason: format!("not valid JSON: {}", e),
    })?;

    let kind = value.get("type").and_then(Value::as_u64).ok_or_else(|| {
        Error::Validation {
            field: "type".to_string(),
            reason: "missing or non-numeric request type".to_string(),
        }
    })?;

    match kind {
        REQUEST_TYPE_PROBE => Ok(AckShape::Pong),
        REQUEST_TYPE_COMMAND => {
            let hidden = value
                .pointer("/data/options/hidden")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            Ok(AckShape::DeferredReply { private: hidden })
        }
        REQUEST_TYPE_COMPONENT => {
            let custom_id = value
                .pointer("/data/custom_id")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if custom_id.starts_with(DISCLOSE_PREFIX) {
                // Disclosure edits the placeholder in place.
                Ok(AckShape::DeferredUpdate)
            } else {
                Ok(AckShape::DeferredReply { private: true })
            }
        }
        other => Err(Error::Validation {
            field: "type".to_string(),
            reason: format!("unknown request type {}", other),
        }),
    }
}

// =============================================================================
// Full parse
// =============================================================================

/// A command carried by an inbound request.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Commit an action whose outcome stays hidden until disclosed.
    Commit { input: String, hidden: bool },
    /// Start a recurring notifier.
    TimerStart {
        name: String,
        interval_minutes: u64,
        occurrences: Option<u32>,
    },
    /// Stop a timer in this scope.
    TimerStop { id: u64 },
    /// List live timers in this scope.
    TimerList,
}

/// What a fully parsed request asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Probe,
    Command(Command),
    /// The disclosure control on a placeholder message was invoked.
    Disclose { session_id: String },
}

/// A fully parsed inbound request.
#[derive(Debug, Clone)]
pub struct Interaction {
    pub id: String,
    /// Per-request token used by the outbound channel for follow-ups.
    pub token: String,
    pub actor_id: String,
    pub scope_id: String,
    pub action: Action,
}

#[derive(Debug, Deserialize)]
struct RawRequest {
    id: String,
    #[serde(rename = "type")]
    kind: u64,
    #[serde(default)]
    token: String,
    #[serde(default)]
    actor_id: String,
    #[serde(default)]
    scope_id: String,
    #[serde(default)]
    data: Option<RawData>,
}

#[derive(Debug, Deserialize)]
struct RawData {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    custom_id: Option<String>,
    #[serde(default)]
    options: Option<Value>,
}

/// Parse the full request. Classification has already run; this is the
/// post-acknowledgment parse.
pub fn parse(raw: &[u8]) -> veil_core::Result<Interaction> {
    let request: RawRequest = serde_json::from_slice(raw).map_err(|e| Error::Validation {
        field: "body".to_string(),
        reason: format!("malformed request: {}", e),
    })?;

    let action = match request.kind {
        REQUEST_TYPE_PROBE => Action::Probe,
        REQUEST_TYPE_COMMAND => {
            let data = request.data.as_ref().ok_or_else(|| missing("data"))?;
            let name = data.name.as_deref().ok_or_else(|| missing("data.name"))?;
            let options = data.options.clone().unwrap_or(Value::Null);
            Action::Command(parse_command(name, &options)?)
        }
        REQUEST_TYPE_COMPONENT => {
            let custom_id = request
                .data
                .as_ref()
                .and_then(|d| d.custom_id.as_deref())
                .ok_or_else(|| missing("data.custom_id"))?;
            let session_id = custom_id.strip_prefix(DISCLOSE_PREFIX).ok_or_else(|| {
                Error::Validation {
                    field: "data.custom_id".to_string(),
                    reason: format!("unknown control '{}'", custom_id),
                }
            })?;
            Action::Disclose {
                session_id: session_id.to_string(),
            }
        }
        other => {
            return Err(Error::Validation {
                field: "type".to_string(),
                reason: format!("unknown request type {}", other),
            })
        }
    };

    if !matches!(action, Action::Probe) && (request.actor_id.is_empty() || request.scope_id.is_empty())
    {
        return Err(missing("actor_id/scope_id"));
    }

    Ok(Interaction {
        id: request.id,
        token: request.token,
        actor_id: request.actor_id,
        scope_id: request.scope_id,
        action,
    })
}

fn parse_command(name: &str, options: &Value) -> veil_core::Result<Command> {
    match name {
        "commit" => Ok(Command::Commit {
            input: options
                .get("input")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            hidden: options
                .get("hidden")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }),
        "timer-start" => Ok(Command::TimerStart {
            name: options
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| missing("options.name"))?
                .to_string(),
            interval_minutes: options
                .get("interval_minutes")
                .and_then(Value::as_u64)
                .ok_or_else(|| missing("options.interval_minutes"))?,
            occurrences: options
                .get("occurrences")
                .and_then(Value::as_u64)
                .map(|n| {
                    // Bounds proper are enforced at admission; this only
                    // guards the narrowing so huge values cannot wrap into
                    // accepted ones.
                    u32::try_from(n).map_err(|_| Error::Validation {
                        field: "options.occurrences".to_string(),
                        reason: format!("occurrences {} is out of range", n),
                    })
                })
                .transpose()?,
        }),
        "timer-stop" => Ok(Command::TimerStop {
            id: options
                .get("id")
                .and_then(Value::as_u64)
                .ok_or_else(|| missing("options.id"))?,
        }),
        "timer-list" => Ok(Command::TimerList),
        other => Err(Error::Validation {
            field: "data.name".to_string(),
            reason: format!("unknown command '{}'", other),
        }),
    }
}

fn missing(field: &str) -> Error {
    Error::Validation {
        field: field.to_string(),
        reason: "required field missing".to_string(),
    }
}

//! Shared types for the inbound SMS pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sms::phone::normalize_phone;

// ── Logged messages ─────────────────────────────────────────────────

/// Which way a message travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inbound" => Ok(Self::Inbound),
            "outbound" => Ok(Self::Outbound),
            _ => Err(format!("Unknown direction: {}", s)),
        }
    }
}

/// Classification stored with every logged message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    General,
    OptIn,
    OptOut,
    EstimateApproval,
    /// Outbound estimate notification. A later `YES` is correlated against it.
    Estimate,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::OptIn => "opt_in",
            Self::OptOut => "opt_out",
            Self::EstimateApproval => "estimate_approval",
            Self::Estimate => "estimate",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "general" => Ok(Self::General),
            "opt_in" => Ok(Self::OptIn),
            "opt_out" => Ok(Self::OptOut),
            "estimate_approval" => Ok(Self::EstimateApproval),
            "estimate" => Ok(Self::Estimate),
            _ => Err(format!("Unknown message type: {}", s)),
        }
    }
}

/// A logged SMS. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsMessage {
    pub id: Uuid,
    /// Provider message id (`MessageSid`), when known.
    pub provider_sid: Option<String>,
    pub direction: Direction,
    pub from_number: String,
    pub to_number: String,
    pub body: String,
    pub client_id: Option<i64>,
    pub repair_id: Option<i64>,
    pub message_type: MessageType,
    pub created_at: DateTime<Utc>,
}

/// Fields for appending a message to the log.
///
/// Numbers are normalized by the constructors; the store writes them as given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSmsMessage {
    pub provider_sid: Option<String>,
    pub direction: Direction,
    pub from_number: String,
    pub to_number: String,
    pub body: String,
    pub client_id: Option<i64>,
    pub repair_id: Option<i64>,
    pub message_type: MessageType,
}

impl NewSmsMessage {
    pub fn inbound(sms: &InboundSms, message_type: MessageType) -> Self {
        Self {
            provider_sid: sms.message_sid.clone(),
            direction: Direction::Inbound,
            from_number: sms.from.clone(),
            to_number: sms.to.clone(),
            body: sms.body.clone(),
            client_id: None,
            repair_id: None,
            message_type,
        }
    }

    pub fn outbound(from: &str, to: &str, body: &str, message_type: MessageType) -> Self {
        Self {
            provider_sid: None,
            direction: Direction::Outbound,
            from_number: normalize_phone(from),
            to_number: normalize_phone(to),
            body: body.to_string(),
            client_id: None,
            repair_id: None,
            message_type,
        }
    }

    pub fn with_sid(mut self, sid: impl Into<String>) -> Self {
        self.provider_sid = Some(sid.into());
        self
    }

    pub fn with_client(mut self, client_id: Option<i64>) -> Self {
        self.client_id = client_id;
        self
    }

    pub fn with_repair(mut self, repair_id: Option<i64>) -> Self {
        self.repair_id = repair_id;
        self
    }
}

// ── Inbound message ─────────────────────────────────────────────────

/// An inbound SMS as delivered by the webhook, numbers already normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundSms {
    pub message_sid: Option<String>,
    /// Sender (the client), normalized.
    pub from: String,
    /// Recipient (the shop's number), normalized.
    pub to: String,
    /// Body exactly as received.
    pub body: String,
}

impl InboundSms {
    /// Build from the webhook's form parameters (`From`, `To`, `Body`, `MessageSid`).
    pub fn from_params(params: &[(String, String)]) -> Self {
        let field = |name: &str| {
            params
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };
        Self {
            message_sid: field("MessageSid")
                .filter(|s| !s.is_empty())
                .map(String::from),
            from: normalize_phone(field("From").unwrap_or_default()),
            to: normalize_phone(field("To").unwrap_or_default()),
            body: field("Body").unwrap_or_default().to_string(),
        }
    }

    /// Trimmed, upper-cased body used for keyword matching.
    pub fn keyword(&self) -> String {
        self.body.trim().to_uppercase()
    }
}

// ── Classification ──────────────────────────────────────────────────

/// A known client matched from a phone number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedClient {
    pub id: i64,
    pub name: String,
    pub sms_opted_in: bool,
}

/// The estimate a `YES` would approve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApprovalTarget {
    pub repair_id: i64,
    pub estimate_id: i64,
}

/// Intent of an inbound message. Exactly one per message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    OptOut,
    OptIn,
    EstimateApproval { repair_id: i64, estimate_id: i64 },
    General,
}

impl Intent {
    /// The log classification for this intent.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::OptOut => MessageType::OptOut,
            Self::OptIn => MessageType::OptIn,
            Self::EstimateApproval { .. } => MessageType::EstimateApproval,
            Self::General => MessageType::General,
        }
    }

    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        self.message_type().as_str()
    }
}

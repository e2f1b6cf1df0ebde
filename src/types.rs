//! Type definitions for the verification relay

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Assurance tier of a World ID proof
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationLevel {
    /// Biometric-grade, issued at an Orb
    Orb,
    /// Lower-assurance, device-bound credential
    Device,
}

impl VerificationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationLevel::Orb => "orb",
            VerificationLevel::Device => "device",
        }
    }
}

impl fmt::Display for VerificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerificationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "orb" => Ok(VerificationLevel::Orb),
            "device" => Ok(VerificationLevel::Device),
            other => Err(format!("expected \"orb\" or \"device\", got \"{}\"", other)),
        }
    }
}

/// A proof payload that passed boundary validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRequest {
    pub merkle_root: String,
    pub nullifier_hash: String,
    pub proof: String,
    pub verification_level: VerificationLevel,
    pub action: String,
}

/// Body sent to the verification authority
#[derive(Debug, Serialize)]
pub struct UpstreamVerifyPayload<'a> {
    pub app_id: &'a str,
    pub nullifier_hash: &'a str,
    pub merkle_root: &'a str,
    pub proof: &'a str,
    pub verification_level: VerificationLevel,
    pub action: &'a str,
}

/// Body returned by the verification authority.
///
/// Only `success`, `detail` and `code` drive behaviour; everything else is
/// ignored. The three are kept as raw JSON so an oddly typed field still
/// yields a verdict instead of a parse failure.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamVerifyResponse {
    #[serde(default)]
    pub success: Option<Value>,
    #[serde(default)]
    pub detail: Option<Value>,
    #[serde(default)]
    pub code: Option<Value>,
}

impl UpstreamVerifyResponse {
    /// Only a literal `true` counts as success
    pub fn is_success(&self) -> bool {
        matches!(self.success, Some(Value::Bool(true)))
    }

    pub fn detail_text(&self) -> Option<String> {
        json_text(self.detail.as_ref())
    }

    pub fn code_text(&self) -> Option<String> {
        json_text(self.code.as_ref())
    }
}

/// Strings pass through, other values are rendered as JSON; null and
/// empty strings count as absent
fn json_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// What the authority said about a proof
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamVerdict {
    Verified {
        nullifier_hash: String,
        verification_level: VerificationLevel,
        action: String,
    },
    Rejected {
        reason: String,
        code: String,
    },
}

/// Result of the full relay pipeline for one request
#[derive(Debug, Clone)]
pub enum VerificationOutcome {
    Verified { record: VerificationRecord },
    Rejected { reason: String, code: String },
}

/// Record issued for a successful verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationRecord {
    /// Locally generated, `wid_` followed by 32 hex characters
    pub verification_id: String,

    /// Unique per (identity, action); doubles as the replay key for storage
    pub nullifier_hash: String,

    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,

    pub verification_level: VerificationLevel,

    pub action: String,

    /// Application the proof was verified for
    pub app_id: String,

    pub verified: bool,
}

/// RFC 3339 with millisecond precision and a `Z` suffix
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn serialize_timestamp<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_timestamp(ts))
}

/// 200 response body
#[derive(Debug, Serialize)]
pub struct SuccessBody {
    pub success: bool,
    pub message: String,
    pub verification_id: String,
    pub timestamp: String,
    pub verification_level: VerificationLevel,
    pub data: SuccessData,
}

#[derive(Debug, Serialize)]
pub struct SuccessData {
    pub verified: bool,
    pub unique_human: bool,
    /// Truncated, never the full hash
    pub nullifier_hash: String,
}

/// Error response body for every non-200 outcome
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error_code: None,
            error: None,
        }
    }
}

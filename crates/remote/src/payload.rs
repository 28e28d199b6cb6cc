//! Wire shapes exchanged with the spreadsheet web app.
//!
//! Incoming sheet rows are loosely typed (cells may be empty, numeric, or
//! missing entirely), so they are decoded field by field from
//! [`serde_json::Value`] rather than through a derived struct.  Outgoing
//! requests are plain derived `Serialize` types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use taxtrack_core::{PersonRecord, TaxStatus, VerifierRef};

use crate::error::RemoteError;

/// Who performed the verification reported by the sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifyType {
    #[serde(rename = "self")]
    SelfVerified,
    Admin,
}

impl VerifyType {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "self" => Some(Self::SelfVerified),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// One sheet row.  Every field except `id` may be absent; absence means
/// "the sheet says nothing about this field".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemotePerson {
    pub id: String,
    pub tax_status: Option<TaxStatus>,
    pub verified_by: Option<VerifierRef>,
    pub verified_at: Option<DateTime<Utc>>,
    pub verify_type: Option<VerifyType>,
}

impl RemotePerson {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Decode one row; rows without a usable id yield `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let id = match obj.get("id")? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        if id.is_empty() {
            return None;
        }

        let tax_status = match obj.get("taxStatus") {
            Some(Value::String(s)) => Some(TaxStatus::from_label(s).unwrap_or_default()),
            _ => None,
        };

        let verified_by = match obj.get("verifiedBy") {
            Some(Value::Object(_)) => obj
                .get("verifiedBy")
                .and_then(|v| serde_json::from_value::<VerifierRef>(v.clone()).ok()),
            Some(Value::String(name)) if !name.trim().is_empty() => Some(VerifierRef {
                id: String::new(),
                rank: String::new(),
                name: name.trim().to_string(),
            }),
            _ => None,
        };

        let verified_at = obj
            .get("verifiedAt")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let verify_type = obj
            .get("verifyType")
            .and_then(Value::as_str)
            .and_then(VerifyType::parse);

        Some(Self {
            id,
            tax_status,
            verified_by,
            verified_at,
            verify_type,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemotePage {
    pub personnel: Vec<RemotePerson>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl RemotePage {
    /// Accepts both `{personnel: [...], lastUpdated}` and a bare row array.
    pub fn from_value(value: &Value) -> Self {
        let (rows, last_updated) = match value {
            Value::Array(rows) => (rows.as_slice(), None),
            Value::Object(obj) => (
                obj.get("personnel")
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or_default(),
                obj.get("lastUpdated")
                    .and_then(Value::as_str)
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&Utc)),
            ),
            _ => (&[][..], None),
        };
        Self {
            personnel: rows.iter().filter_map(RemotePerson::from_value).collect(),
            last_updated,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.personnel.is_empty()
    }
}

/// Every page returned by `getAllData`, keyed by sheet name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteSnapshot {
    pub pages: BTreeMap<String, RemotePage>,
}

impl RemoteSnapshot {
    pub fn page(&self, sheet: &str) -> Option<&RemotePage> {
        self.pages.get(sheet)
    }
}

/// Response envelope shared by every action.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Value,
}

fn decode_envelope(body: &str) -> Result<Envelope, RemoteError> {
    let envelope: Envelope =
        serde_json::from_str(body).map_err(|err| RemoteError::Decode(err.to_string()))?;
    if envelope.status != "ok" {
        let message = envelope
            .message
            .unwrap_or_else(|| format!("status {:?}", envelope.status));
        return Err(RemoteError::Rejected(message));
    }
    Ok(envelope)
}

/// Check a response body for `status: "ok"`.
pub fn decode_ack(body: &str) -> Result<(), RemoteError> {
    decode_envelope(body).map(|_| ())
}

pub fn decode_all_data(body: &str) -> Result<RemoteSnapshot, RemoteError> {
    let envelope = decode_envelope(body)?;
    let Value::Object(pages) = envelope.data else {
        return Err(RemoteError::Decode(
            "getAllData returned no page map".to_string(),
        ));
    };
    Ok(RemoteSnapshot {
        pages: pages
            .iter()
            .map(|(sheet, value)| (sheet.clone(), RemotePage::from_value(value)))
            .collect(),
    })
}

/// Outgoing status change for one person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub id: String,
    pub status: TaxStatus,
    /// Display name of the verifier; the sheet stores names only.
    pub verified_by: String,
    pub verified_at: DateTime<Utc>,
    pub verify_type: VerifyType,
}

impl StatusUpdate {
    pub fn from_record(record: &PersonRecord) -> Self {
        let (verified_by, verified_at) = match &record.verification {
            Some(v) => (v.verified_by.name.clone(), v.verified_at),
            None => (String::new(), Utc::now()),
        };
        Self {
            id: record.id.clone(),
            status: record.tax_status,
            verified_by,
            verified_at,
            verify_type: if record.is_self_verified() {
                VerifyType::SelfVerified
            } else {
                VerifyType::Admin
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct UpdateStatusRequest<'a> {
    pub action: &'static str,
    pub page: &'a str,
    pub sheet: &'a str,
    #[serde(flatten)]
    pub update: &'a StatusUpdate,
}

#[derive(Debug, Serialize)]
pub(crate) struct BatchUpdateRequest<'a> {
    pub action: &'static str,
    pub page: &'a str,
    pub sheet: &'a str,
    pub updates: &'a [StatusUpdate],
}

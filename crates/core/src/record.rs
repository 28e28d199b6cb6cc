use std::iter::Sum;
use std::ops::Add;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::TaxStatus;

/// Compact reference to whoever performed a status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierRef {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub rank: String,
    #[serde(default)]
    pub name: String,
}

/// The "last verification" fact of a record.
///
/// Held as a single optional value on [`PersonRecord`] so the four parts are
/// always set or cleared together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub verified_by: VerifierRef,
    pub verified_at: DateTime<Utc>,
    pub is_self_verified: bool,
    pub is_admin_verified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PersonRecordRepr", into = "PersonRecordRepr")]
pub struct PersonRecord {
    pub id: String,
    pub rank: String,
    pub first_name: String,
    pub last_name: String,
    pub tax_status: TaxStatus,
    pub verification: Option<Verification>,
}

impl PersonRecord {
    pub fn new(
        id: impl Into<String>,
        rank: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            rank: rank.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            tax_status: TaxStatus::Unset,
            verification: None,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    /// Set the status together with the verification that justifies it.
    pub fn verify(&mut self, status: TaxStatus, verification: Verification) {
        self.tax_status = status;
        self.verification = Some(verification);
    }

    /// Clear the status and the verification fact.
    pub fn clear(&mut self) {
        self.tax_status = TaxStatus::Unset;
        self.verification = None;
    }

    pub fn verified_by(&self) -> Option<&VerifierRef> {
        self.verification.as_ref().map(|v| &v.verified_by)
    }

    pub fn verified_at(&self) -> Option<DateTime<Utc>> {
        self.verification.as_ref().map(|v| v.verified_at)
    }

    pub fn is_self_verified(&self) -> bool {
        self.verification
            .as_ref()
            .is_some_and(|v| v.is_self_verified)
    }

    pub fn is_admin_verified(&self) -> bool {
        self.verification
            .as_ref()
            .is_some_and(|v| v.is_admin_verified)
    }
}

/// Flat persisted shape, kept compatible with pages written by earlier
/// releases and by the spreadsheet export.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersonRecordRepr {
    id: String,
    #[serde(default)]
    rank: String,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    #[serde(default)]
    tax_status: TaxStatus,
    #[serde(default)]
    verified_by: Option<VerifierRef>,
    #[serde(default)]
    verified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    is_self_verified: bool,
    #[serde(default)]
    is_admin_verified: bool,
}

impl From<PersonRecordRepr> for PersonRecord {
    fn from(repr: PersonRecordRepr) -> Self {
        let verification = match (repr.verified_by, repr.verified_at) {
            (Some(verified_by), Some(verified_at)) => Some(Verification {
                verified_by,
                verified_at,
                is_self_verified: repr.is_self_verified,
                is_admin_verified: repr.is_admin_verified,
            }),
            _ => None,
        };
        Self {
            id: repr.id,
            rank: repr.rank,
            first_name: repr.first_name,
            last_name: repr.last_name,
            tax_status: repr.tax_status,
            verification,
        }
    }
}

impl From<PersonRecord> for PersonRecordRepr {
    fn from(record: PersonRecord) -> Self {
        let (verified_by, verified_at, is_self_verified, is_admin_verified) =
            match record.verification {
                Some(v) => (
                    Some(v.verified_by),
                    Some(v.verified_at),
                    v.is_self_verified,
                    v.is_admin_verified,
                ),
                None => (None, None, false, false),
            };
        Self {
            id: record.id,
            rank: record.rank,
            first_name: record.first_name,
            last_name: record.last_name,
            tax_status: record.tax_status,
            verified_by,
            verified_at,
            is_self_verified,
            is_admin_verified,
        }
    }
}

/// One organisational unit's personnel, in display order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCollection {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub personnel: Vec<PersonRecord>,
}

impl PageCollection {
    pub fn find(&self, id: &str) -> Option<&PersonRecord> {
        self.personnel.iter().find(|p| p.id == id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut PersonRecord> {
        self.personnel.iter_mut().find(|p| p.id == id)
    }

    pub fn stats(&self) -> PageStats {
        PageStats::from_records(&self.personnel)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PageStats {
    pub total: usize,
    pub filed: usize,
    pub not_filed: usize,
    pub pending: usize,
    pub percentage: u32,
}

impl PageStats {
    pub fn from_records(records: &[PersonRecord]) -> Self {
        let total = records.len();
        let filed = records
            .iter()
            .filter(|p| p.tax_status == TaxStatus::Filed)
            .count();
        let not_filed = records
            .iter()
            .filter(|p| p.tax_status == TaxStatus::NotFiled)
            .count();
        Self::from_counts(total, filed, not_filed)
    }

    fn from_counts(total: usize, filed: usize, not_filed: usize) -> Self {
        let percentage = if total > 0 {
            ((filed as f64 / total as f64) * 100.0).round() as u32
        } else {
            0
        };
        Self {
            total,
            filed,
            not_filed,
            pending: total.saturating_sub(filed + not_filed),
            percentage,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.percentage == 100
    }
}

impl Add for PageStats {
    type Output = PageStats;

    fn add(self, rhs: PageStats) -> PageStats {
        PageStats::from_counts(
            self.total + rhs.total,
            self.filed + rhs.filed,
            self.not_filed + rhs.not_filed,
        )
    }
}

impl Sum for PageStats {
    fn sum<I: Iterator<Item = PageStats>>(iter: I) -> Self {
        iter.fold(PageStats::default(), Add::add)
    }
}

use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

/// Sheet label for a filed return.
pub const FILED_LABEL: &str = "ดำเนินการยื่นภาษีแล้ว";
/// Sheet label for a return that has not been filed.
pub const NOT_FILED_LABEL: &str = "ยังไม่ยื่น";

/// Filing state of one person's annual tax form.
///
/// | Status     | Sheet cell                  |
/// |------------|-----------------------------|
/// | `Filed`    | `ดำเนินการยื่นภาษีแล้ว`       |
/// | `NotFiled` | `ยังไม่ยื่น`                  |
/// | `Unset`    | empty                       |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TaxStatus {
    Filed,
    NotFiled,
    #[default]
    Unset,
}

impl TaxStatus {
    /// Label stored in the spreadsheet and in persisted pages.
    pub fn label(self) -> &'static str {
        match self {
            Self::Filed => FILED_LABEL,
            Self::NotFiled => NOT_FILED_LABEL,
            Self::Unset => "",
        }
    }

    /// Kebab-case slug used on the command line and in log lines.
    pub fn slug(self) -> &'static str {
        match self {
            Self::Filed => "filed",
            Self::NotFiled => "not-filed",
            Self::Unset => "unset",
        }
    }

    /// Parse a status from a sheet label or an English spelling.
    ///
    /// Returns `None` for anything unrecognised so callers decide the default.
    pub fn from_label(s: &str) -> Option<Self> {
        let trimmed = s.trim();
        if trimmed == FILED_LABEL {
            return Some(Self::Filed);
        }
        if trimmed == NOT_FILED_LABEL {
            return Some(Self::NotFiled);
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "filed" => Some(Self::Filed),
            "notfiled" | "not_filed" | "not-filed" => Some(Self::NotFiled),
            "" | "unset" | "pending" => Some(Self::Unset),
            _ => None,
        }
    }

    pub fn is_set(self) -> bool {
        !matches!(self, Self::Unset)
    }
}

impl fmt::Display for TaxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl Serialize for TaxStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for TaxStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct StatusVisitor;

        impl<'de> Visitor<'de> for StatusVisitor {
            type Value = TaxStatus;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a tax status label or null")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(TaxStatus::from_label(v).unwrap_or_default())
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(TaxStatus::Unset)
            }

            fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(TaxStatus::Unset)
            }

            fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
                d.deserialize_any(self)
            }
        }

        deserializer.deserialize_any(StatusVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_round_trip_through_from_label() {
        for status in [TaxStatus::Filed, TaxStatus::NotFiled, TaxStatus::Unset] {
            assert_eq!(TaxStatus::from_label(status.label()), Some(status));
            assert_eq!(TaxStatus::from_label(status.slug()), Some(status));
        }
    }

    #[test]
    fn english_spellings_are_accepted() {
        assert_eq!(TaxStatus::from_label("Filed"), Some(TaxStatus::Filed));
        assert_eq!(TaxStatus::from_label("NotFiled"), Some(TaxStatus::NotFiled));
        assert_eq!(TaxStatus::from_label(" not_filed "), Some(TaxStatus::NotFiled));
        assert_eq!(TaxStatus::from_label("maybe"), None);
    }

    #[test]
    fn serializes_as_sheet_label() {
        let json = serde_json::to_string(&TaxStatus::Filed).unwrap();
        assert_eq!(json, format!("\"{FILED_LABEL}\""));
        assert_eq!(serde_json::to_string(&TaxStatus::Unset).unwrap(), "\"\"");
    }

    #[test]
    fn unknown_or_null_decodes_as_unset() {
        let s: TaxStatus = serde_json::from_str("\"garbage\"").unwrap();
        assert_eq!(s, TaxStatus::Unset);
        let s: TaxStatus = serde_json::from_str("null").unwrap();
        assert_eq!(s, TaxStatus::Unset);
    }
}

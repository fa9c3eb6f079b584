//! Core domain model for ARFU: domains, money, dates, record shapes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

pub const CRATE_NAME: &str = "arfu-core";

/// The two record domains reconciled independently of each other.
///
/// Both domains run the same staged reconciliation; the variant only
/// selects table names, identity-column preferences, and export order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Invoices,
    Quotes,
}

impl Domain {
    pub const ALL: [Domain; 2] = [Domain::Invoices, Domain::Quotes];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Invoices => "invoices",
            Domain::Quotes => "quotes",
        }
    }

    pub fn master_table(&self) -> &'static str {
        match self {
            Domain::Invoices => "master_invoices",
            Domain::Quotes => "master_quotes",
        }
    }

    pub fn staging_table(&self) -> &'static str {
        match self {
            Domain::Invoices => "staging_invoices",
            Domain::Quotes => "staging_quotes",
        }
    }

    /// Header names accepted as the identity column, in preference order.
    /// The `#` ordinal column is the positional fallback some extract
    /// formats emit instead of an explicit record number.
    pub fn identity_columns(&self) -> &'static [&'static str] {
        match self {
            Domain::Invoices => &["Invoice", "#"],
            Domain::Quotes => &["Quote", "Invoice", "#"],
        }
    }

    /// Export ordering: invoices by due date descending, quotes by
    /// record key descending.
    pub fn sort_order(&self) -> SortOrder {
        match self {
            Domain::Invoices => SortOrder::DueDateDesc,
            Domain::Quotes => SortOrder::KeyDesc,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct UnknownDomain(pub String);

impl fmt::Display for UnknownDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown domain {:?} (expected invoices or quotes)", self.0)
    }
}

impl std::error::Error for UnknownDomain {}

impl FromStr for Domain {
    type Err = UnknownDomain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invoices" => Ok(Domain::Invoices),
            "quotes" => Ok(Domain::Quotes),
            other => Err(UnknownDomain(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    DueDateDesc,
    KeyDesc,
}

/// Fixed-point currency amount stored as signed cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    pub fn cents(&self) -> i64 {
        self.0
    }

    /// Parse a display-formatted amount, tolerating currency symbols and
    /// thousands separators. Unparseable input yields zero, matching the
    /// tolerance extract data requires.
    pub fn parse_loose(raw: &str) -> Money {
        let cleaned: String = raw
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
            .collect();
        if cleaned.is_empty() {
            return Money::ZERO;
        }

        let negative = cleaned.starts_with('-');
        let unsigned = cleaned.trim_start_matches('-');
        let (whole, frac) = match unsigned.split_once('.') {
            Some((w, f)) => (w, f),
            None => (unsigned, ""),
        };
        if frac.contains('.') {
            return Money::ZERO;
        }

        let whole: i64 = if whole.is_empty() {
            0
        } else {
            match whole.parse() {
                Ok(v) => v,
                Err(_) => return Money::ZERO,
            }
        };
        // Truncate past two fractional digits; extracts never carry more.
        let frac = &frac[..frac.len().min(2)];
        let mut frac_cents: i64 = if frac.is_empty() {
            0
        } else {
            match frac.parse() {
                Ok(v) => v,
                Err(_) => return Money::ZERO,
            }
        };
        if frac.len() == 1 {
            frac_cents *= 10;
        }

        // Amounts too large for cents representation are garbage, not data.
        let magnitude = match whole.checked_mul(100).and_then(|w| w.checked_add(frac_cents)) {
            Some(v) => v,
            None => return Money::ZERO,
        };
        Money(if negative { -magnitude } else { magnitude })
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(f64),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Ok(Money::parse_loose(&s)),
            Raw::Number(n) => {
                if n.is_finite() {
                    Ok(Money::from_cents((n * 100.0).round() as i64))
                } else {
                    Err(de::Error::custom("non-finite amount"))
                }
            }
        }
    }
}

const DATE_FORMATS: [&str; 4] = ["%m/%d/%Y", "%Y-%m-%d", "%m-%d-%Y", "%m/%d/%y"];

/// Parse a calendar date from the textual forms extracts actually carry.
/// Invalid or empty input becomes `None`, never an error.
pub fn parse_flex_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

/// Typed, keyed record produced by normalization. One per uploaded row
/// that survives filtering; the shape is shared by both domains so
/// staging and master stay column-identical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub key: String,
    pub display_name: String,
    pub due_date: Option<NaiveDate>,
    pub location: Option<String>,
    pub amount: Money,
}

/// Persisted system-of-record entity: the normalized domain fields plus
/// the user-entered annotation fields reconciliation must not touch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterRecord {
    pub key: String,
    pub display_name: String,
    pub due_date: Option<NaiveDate>,
    pub location: Option<String>,
    pub amount: Money,
    pub note: String,
    pub action_date: Option<NaiveDate>,
}

impl MasterRecord {
    /// Insert-phase projection: domain fields copied verbatim, annotation
    /// fields initialized empty. Staged annotation-like values are never
    /// trusted.
    pub fn from_normalized(record: NormalizedRecord) -> Self {
        Self {
            key: record.key,
            display_name: record.display_name,
            due_date: record.due_date,
            location: record.location,
            amount: record.amount,
            note: String::new(),
            action_date: None,
        }
    }
}

/// Counts returned by a reconciliation run. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub run_id: Uuid,
    pub domain: Domain,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub deleted: u64,
    pub inserted: u64,
}

//! Normalizer: turns raw delimited-text extracts into typed, keyed records.
//!
//! Parsing is pure computation. Nothing here touches a store, so a
//! malformed upload fails before any mutation happens downstream.

use arfu_core::{parse_flex_date, Domain, Money, NormalizedRecord};
use scraper::Html;
use thiserror::Error;
use tracing::warn;

pub const CRATE_NAME: &str = "arfu-ingest";

/// The artifact row some export formats append after the data rows.
const TOTALS_ROW_NAME: &str = "Totals";

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("upload contains no parsable table")]
    EmptySource,
    #[error("upload has no header row")]
    NoHeader,
    #[error("no identity column for {domain}: expected one of {expected:?}")]
    MissingIdentityColumn {
        domain: Domain,
        expected: &'static [&'static str],
    },
    #[error("malformed delimited text: {0}")]
    Csv(#[from] csv::Error),
}

/// Reduce a rich-text-wrapped cell to plain text. Extracts wrap name
/// fields in markup (`<b>Acme Co</b>`) and escape entities even in
/// unwrapped cells; plain values pass through.
pub fn strip_markup(raw: &str) -> String {
    if !raw.contains('<') && !raw.contains('&') {
        return raw.trim().to_string();
    }
    let fragment = Html::parse_fragment(raw);
    fragment
        .root_element()
        .text()
        .collect::<String>()
        .trim()
        .to_string()
}

/// Column positions resolved once per upload from the header row.
#[derive(Debug, Clone)]
struct ColumnMap {
    identity: usize,
    name: Option<usize>,
    due_date: Option<usize>,
    location: Option<usize>,
    amount: Option<usize>,
}

impl ColumnMap {
    fn resolve(domain: Domain, headers: &csv::StringRecord) -> Result<Self, NormalizeError> {
        let find = |wanted: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(wanted))
        };

        let identity = domain
            .identity_columns()
            .iter()
            .find_map(|col| find(col))
            .ok_or(NormalizeError::MissingIdentityColumn {
                domain,
                expected: domain.identity_columns(),
            })?;

        let name = match domain {
            Domain::Invoices => find("Customer Name"),
            Domain::Quotes => find("Name"),
        };

        Ok(Self {
            identity,
            name,
            due_date: find("Due Date"),
            location: find("Service Location"),
            amount: find("Total Amount").or_else(|| find("Amount")),
        })
    }
}

/// Parse a raw upload into the domain's normalized record sequence.
///
/// Row-level identity failures drop the row and continue; a missing
/// identity column, an empty source, or a missing header row are fatal
/// for the whole upload.
pub fn normalize(domain: Domain, bytes: &[u8]) -> Result<Vec<NormalizedRecord>, NormalizeError> {
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(NormalizeError::EmptySource);
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers = reader.headers()?.clone();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(NormalizeError::NoHeader);
    }
    let columns = ColumnMap::resolve(domain, &headers)?;

    let mut records = Vec::new();
    for (index, row) in reader.records().enumerate() {
        let row = row?;
        let cell = |idx: Option<usize>| idx.and_then(|i| row.get(i)).unwrap_or_default();

        let key = strip_markup(cell(Some(columns.identity)));
        if key.is_empty() {
            warn!(%domain, row = index + 1, "dropping row with no derivable identity key");
            continue;
        }

        let display_name = strip_markup(cell(columns.name));
        // Export artifacts: the trailing aggregate row and rows that lose
        // their name entirely once markup is stripped.
        if display_name.is_empty() || display_name == TOTALS_ROW_NAME {
            continue;
        }

        records.push(NormalizedRecord {
            key,
            display_name,
            due_date: parse_flex_date(cell(columns.due_date)),
            location: match cell(columns.location) {
                "" => None,
                loc => Some(loc.to_string()),
            },
            amount: Money::parse_loose(cell(columns.amount)),
        });
    }

    Ok(records)
}

//! Fixture-driven normalizer tests over captured extract samples.

use arfu_core::Domain;
use arfu_ingest::normalize;

fn fixture(name: &str) -> Vec<u8> {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .join("fixtures")
        .join(name);
    std::fs::read(&path).unwrap_or_else(|e| panic!("reading {}: {e}", path.display()))
}

#[test]
fn invoice_fixture_normalizes_to_clean_rows() {
    let records = normalize(Domain::Invoices, &fixture("invoices_sample.csv")).expect("normalize");

    // Five data rows; the keyless row and the trailing Totals row drop out.
    let keys: Vec<&str> = records.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["10041", "10042", "10043"]);

    let first = &records[0];
    assert_eq!(first.display_name, "Acme Fire & Safety");
    assert_eq!(first.amount.cents(), 231_075);
    assert_eq!(first.location.as_deref(), Some("Dallas TX"));

    // Sparse extract data: missing due date is null, not an error.
    assert_eq!(records[2].due_date, None);
}

#[test]
fn quote_fixture_maps_invoice_column_to_quote_key() {
    let records = normalize(Domain::Quotes, &fixture("quotes_sample.csv")).expect("normalize");

    let keys: Vec<&str> = records.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["Q-2201", "Q-2202"]);
    assert_eq!(records[0].display_name, "Acme Fire & Safety");
    assert_eq!(records[1].amount.cents(), 8_000);
}

//! Reconciliation pipeline: staging-vs-master set difference, annotation
//! updates, and the master CSV export.
//!
//! The sync operation is defined purely on current set membership, not a
//! delta log. Re-running it against an unchanged staging snapshot deletes
//! and inserts nothing, which is what makes "surface the error and let
//! the caller retry" a sufficient failure policy.

use anyhow::Context;
use arfu_core::{Domain, MasterRecord, NormalizedRecord, ReconcileSummary};
use arfu_ingest::NormalizeError;
use arfu_store::{RecordStore, StoreError};
use chrono::{NaiveDate, Utc};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "arfu-recon";

/// Orchestrates the staged reconciliation for one store. Both domains run
/// the identical algorithm; `Domain` only parameterizes tables and order.
pub struct Reconciler<S> {
    store: S,
}

impl<S: RecordStore> Reconciler<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Normalize an uploaded extract and atomically replace the domain's
    /// staging snapshot. Parsing completes before any store mutation, so
    /// a malformed file leaves staging untouched.
    pub async fn ingest_and_stage(
        &self,
        domain: Domain,
        bytes: &[u8],
    ) -> Result<Vec<NormalizedRecord>, IngestError> {
        let records = arfu_ingest::normalize(domain, bytes)?;
        self.store.replace_staging(domain, &records).await?;
        Ok(records)
    }

    /// Replace the staging snapshot from already-normalized rows.
    pub async fn stage(
        &self,
        domain: Domain,
        records: &[NormalizedRecord],
    ) -> Result<(), StoreError> {
        self.store.replace_staging(domain, records).await
    }

    /// Synchronize master to match staging's key set.
    ///
    /// Delete runs strictly before insert so no transient duplicate-key
    /// state can exist. Keys present on both sides are neither read nor
    /// written, which is what preserves their annotations. If the insert
    /// phase fails after deletes committed, the returned `StoreError`
    /// names the insert phase; rerunning with the same snapshot completes
    /// the missing inserts.
    pub async fn sync(&self, domain: Domain) -> Result<ReconcileSummary, StoreError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let span = info_span!("reconcile", %run_id, %domain);

        async {
            let deleted = self.store.delete_retired(domain).await.inspect_err(|err| {
                warn!(phase = ?err.failed_phase(), "reconcile aborted before any insert");
            })?;
            let inserted = self.store.insert_new(domain).await.inspect_err(|err| {
                warn!(
                    deleted,
                    phase = ?err.failed_phase(),
                    "insert phase failed after deletes committed; rerun sync to complete"
                );
            })?;

            let summary = ReconcileSummary {
                run_id,
                domain,
                started_at,
                finished_at: Utc::now(),
                deleted,
                inserted,
            };
            info!(deleted, inserted, "reconcile complete");
            Ok(summary)
        }
        .instrument(span)
        .await
    }

    /// Update the follow-up annotation on a single master record.
    /// Independent of the pipeline: staging is never touched and no
    /// reconciliation is triggered.
    pub async fn annotate(
        &self,
        domain: Domain,
        key: &str,
        note: &str,
        action_date: Option<NaiveDate>,
    ) -> Result<(), StoreError> {
        self.store.annotate(domain, key, note, action_date).await
    }

    /// Project the current master set to delimited text. Stateless: no
    /// reconciliation side effects.
    pub async fn export_csv(&self, domain: Domain) -> anyhow::Result<String> {
        let records = self
            .store
            .fetch_master(domain)
            .await
            .with_context(|| format!("fetching {domain} master set for export"))?;
        render_csv(domain, &records)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

const INVOICE_HEADERS: [&str; 7] = [
    "Invoice",
    "Customer Name",
    "Due Date",
    "Service Location",
    "Total Amount",
    "Note",
    "Action Date",
];
const QUOTE_HEADERS: [&str; 5] = ["Quote", "Name", "Total Amount", "Note", "Action Date"];

fn format_date(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format("%m/%d/%Y").to_string())
        .unwrap_or_default()
}

/// Render master records as CSV with every field quoted; the csv writer
/// doubles embedded quotes.
pub fn render_csv(domain: Domain, records: &[MasterRecord]) -> anyhow::Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .from_writer(Vec::new());

    match domain {
        Domain::Invoices => {
            writer.write_record(INVOICE_HEADERS)?;
            for r in records {
                writer.write_record([
                    r.key.as_str(),
                    r.display_name.as_str(),
                    &format_date(r.due_date),
                    r.location.as_deref().unwrap_or_default(),
                    &r.amount.to_string(),
                    r.note.as_str(),
                    &format_date(r.action_date),
                ])?;
            }
        }
        Domain::Quotes => {
            writer.write_record(QUOTE_HEADERS)?;
            for r in records {
                writer.write_record([
                    r.key.as_str(),
                    r.display_name.as_str(),
                    &r.amount.to_string(),
                    r.note.as_str(),
                    &format_date(r.action_date),
                ])?;
            }
        }
    }

    let bytes = writer.into_inner().context("flushing csv writer")?;
    String::from_utf8(bytes).context("csv output was not utf-8")
}

/// Download filename convention: `<domain>_<MM-DD-YYYY>.csv`.
pub fn export_filename(domain: Domain, date: NaiveDate) -> String {
    format!("{}_{}.csv", domain, date.format("%m-%d-%Y"))
}

//! Detail assembly entry points
//!
//! Single-item calls look collaborators up one at a time; bulk calls preload
//! them in batches. Both feed the same assembler, so the output for a given
//! invoice does not depend on which path produced it.

use sqlx::PgPool;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use paylens_shared::Invoice;

use crate::config::DetailConfig;
use crate::detail::{
    assemble_credit_note_detail, assemble_invoice_detail, CreditNoteDetail, InvoiceDetail,
};
use crate::error::{BillingError, BillingResult};
use crate::preload::{PreloadBatcher, PreloadScope};
use crate::store::{CollaboratorStore, PgCollaboratorStore};

/// Service for assembling invoice and credit-note details
pub struct InvoiceDetailService<S: ?Sized> {
    store: Arc<S>,
    config: DetailConfig,
}

impl InvoiceDetailService<PgCollaboratorStore> {
    /// Postgres-backed service configured from the environment
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        Ok(Self::new(
            Arc::new(PgCollaboratorStore::new(pool)),
            DetailConfig::from_env()?,
        ))
    }
}

impl<S> InvoiceDetailService<S>
where
    S: CollaboratorStore + ?Sized,
{
    pub fn new(store: Arc<S>, config: DetailConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &DetailConfig {
        &self.config
    }

    /// Detail for one invoice
    #[tracing::instrument(skip(self, cancel))]
    pub async fn assemble_one(
        &self,
        invoice_id: &str,
        cancel: &CancellationToken,
    ) -> BillingResult<InvoiceDetail> {
        self.guarded(cancel, async {
            let invoice = self.load_invoice(invoice_id).await?;
            let bundle = PreloadBatcher::new(self.store.as_ref())
                .load_one(&invoice, PreloadScope::Invoice)
                .await;
            Ok(assemble_invoice_detail(&invoice, &bundle, &self.config))
        })
        .await
    }

    /// Details for a list of invoice ids, in request order. Unknown ids are skipped.
    #[tracing::instrument(skip(self, invoice_ids, cancel), fields(requested = invoice_ids.len()))]
    pub async fn assemble_bulk(
        &self,
        invoice_ids: &[String],
        cancel: &CancellationToken,
    ) -> BillingResult<Vec<InvoiceDetail>> {
        self.check_bulk_size(invoice_ids.len())?;
        self.guarded(cancel, async {
            let invoices = self.load_invoices(invoice_ids).await?;
            Ok(self.assemble_rows(&invoices).await)
        })
        .await
    }

    /// Details for rows the caller already holds, in the same order
    #[tracing::instrument(skip(self, invoices, cancel), fields(invoices = invoices.len()))]
    pub async fn assemble_invoices(
        &self,
        invoices: &[Invoice],
        cancel: &CancellationToken,
    ) -> BillingResult<Vec<InvoiceDetail>> {
        self.check_bulk_size(invoices.len())?;
        self.guarded(cancel, async { Ok(self.assemble_rows(invoices).await) })
            .await
    }

    /// Credit-note view of one refund invoice
    #[tracing::instrument(skip(self, cancel))]
    pub async fn credit_note_one(
        &self,
        invoice_id: &str,
        cancel: &CancellationToken,
    ) -> BillingResult<CreditNoteDetail> {
        self.guarded(cancel, async {
            let invoice = self.load_invoice(invoice_id).await?;
            let bundle = PreloadBatcher::new(self.store.as_ref())
                .load_one(&invoice, PreloadScope::CreditNote)
                .await;
            Ok(assemble_credit_note_detail(&invoice, &bundle, &self.config))
        })
        .await
    }

    #[tracing::instrument(skip(self, invoice_ids, cancel), fields(requested = invoice_ids.len()))]
    pub async fn credit_note_bulk(
        &self,
        invoice_ids: &[String],
        cancel: &CancellationToken,
    ) -> BillingResult<Vec<CreditNoteDetail>> {
        self.check_bulk_size(invoice_ids.len())?;
        self.guarded(cancel, async {
            let invoices = self.load_invoices(invoice_ids).await?;
            Ok(self.credit_note_rows(&invoices).await)
        })
        .await
    }

    #[tracing::instrument(skip(self, invoices, cancel), fields(invoices = invoices.len()))]
    pub async fn credit_notes_from_invoices(
        &self,
        invoices: &[Invoice],
        cancel: &CancellationToken,
    ) -> BillingResult<Vec<CreditNoteDetail>> {
        self.check_bulk_size(invoices.len())?;
        self.guarded(cancel, async { Ok(self.credit_note_rows(invoices).await) })
            .await
    }

    async fn assemble_rows(&self, invoices: &[Invoice]) -> Vec<InvoiceDetail> {
        let bundle = PreloadBatcher::new(self.store.as_ref())
            .preload(invoices, PreloadScope::Invoice)
            .await;
        let details: Vec<InvoiceDetail> = invoices
            .iter()
            .map(|invoice| assemble_invoice_detail(invoice, &bundle, &self.config))
            .collect();
        info!(assembled = details.len(), "Assembled invoice details");
        details
    }

    async fn credit_note_rows(&self, invoices: &[Invoice]) -> Vec<CreditNoteDetail> {
        let bundle = PreloadBatcher::new(self.store.as_ref())
            .preload(invoices, PreloadScope::CreditNote)
            .await;
        let details: Vec<CreditNoteDetail> = invoices
            .iter()
            .map(|invoice| assemble_credit_note_detail(invoice, &bundle, &self.config))
            .collect();
        info!(assembled = details.len(), "Assembled credit notes");
        details
    }

    async fn load_invoice(&self, invoice_id: &str) -> BillingResult<Invoice> {
        if invoice_id.trim().is_empty() {
            return Err(BillingError::InvalidInput(
                "invoice id must not be empty".to_string(),
            ));
        }
        self.store
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("invoice {invoice_id}")))
    }

    /// Primary rows in request order. Failure here fails the call.
    async fn load_invoices(&self, invoice_ids: &[String]) -> BillingResult<Vec<Invoice>> {
        let unique: Vec<String> = invoice_ids
            .iter()
            .filter(|id| !id.is_empty())
            .cloned()
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        if unique.is_empty() {
            return Ok(Vec::new());
        }

        let found: HashMap<String, Invoice> = self.store.get_invoices_by_ids(&unique).await?;
        let mut ordered = Vec::with_capacity(invoice_ids.len());
        for invoice_id in invoice_ids {
            match found.get(invoice_id) {
                Some(invoice) => ordered.push(invoice.clone()),
                None => warn!(invoice_id = %invoice_id, "Invoice not found, skipping"),
            }
        }
        Ok(ordered)
    }

    fn check_bulk_size(&self, requested: usize) -> BillingResult<()> {
        if requested > self.config.max_bulk_size {
            return Err(BillingError::InvalidInput(format!(
                "bulk request of {} invoices exceeds the limit of {}",
                requested, self.config.max_bulk_size
            )));
        }
        Ok(())
    }

    /// Bound a call by the caller's cancellation and the configured deadline.
    /// Either one fails the whole call; partial output is discarded.
    async fn guarded<T, F>(&self, cancel: &CancellationToken, work: F) -> BillingResult<T>
    where
        F: Future<Output = BillingResult<T>>,
    {
        if cancel.is_cancelled() {
            return Err(BillingError::Cancelled);
        }
        let deadline = self.config.assembly_timeout;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Detail assembly cancelled");
                Err(BillingError::Cancelled)
            }
            outcome = tokio::time::timeout(deadline, work) => match outcome {
                Ok(result) => result,
                Err(_) => {
                    warn!(deadline_ms = deadline.as_millis() as u64, "Detail assembly deadline exceeded");
                    Err(BillingError::DeadlineExceeded(deadline.as_millis() as u64))
                }
            },
        }
    }
}

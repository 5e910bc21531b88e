//! Reconciliation sweep
//!
//! Repairs balance drift: invoices left in `Partial` whose remaining balance
//! is already within the settlement tolerance are promoted to `Paid`. The
//! sweep touches only invoice status fields, never payments or the ledger,
//! and running it twice is a no-op the second time.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::SettlementError;
use crate::invoice::Invoice;
use crate::ports::{ActivityEvent, ActivityKind, ActivityLog};
use crate::store::{SettlementStore, SweepScope};

/// Drift repair over partial invoices
pub struct ReconciliationSweep {
    store: Arc<dyn SettlementStore>,
    activity: Arc<dyn ActivityLog>,
}

impl ReconciliationSweep {
    pub fn new(store: Arc<dyn SettlementStore>, activity: Arc<dyn ActivityLog>) -> Self {
        Self { store, activity }
    }

    /// Promotes drifted partial invoices to paid within the scope.
    ///
    /// Returns the number of invoices repaired. The bulk write re-checks
    /// status and balance per row, so invoices settled or reopened between
    /// the scan and the write are left alone.
    pub async fn normalize_drift(&self, scope: &SweepScope) -> Result<u64, SettlementError> {
        let partials = self
            .store
            .find_partial_invoices(scope)
            .await
            .map_err(SettlementError::from)?;

        let drifted: Vec<_> = partials
            .iter()
            .filter(|i| i.remaining_amount.is_settled())
            .map(|i| i.id)
            .collect();

        if drifted.is_empty() {
            debug!(?scope, scanned = partials.len(), "no balance drift found");
            return Ok(0);
        }

        let mut uow = self.store.begin().await.map_err(SettlementError::from)?;
        let repaired = uow.mark_paid(&drifted).await.map_err(SettlementError::from)?;
        uow.commit().await.map_err(SettlementError::from)?;

        debug!(
            ?scope,
            scanned = partials.len(),
            repaired,
            "balance drift repaired"
        );

        if repaired > 0 {
            let activity = Arc::clone(&self.activity);
            let event = ActivityEvent::new(
                ActivityKind::ReconciliationRun,
                format!("Reconciliation repaired {repaired} drifted invoice(s)"),
            )
            .with_metadata(serde_json::json!({ "repaired": repaired }));
            tokio::spawn(async move {
                if let Err(err) = activity.record(event).await {
                    warn!(error = %err, "activity record failed");
                }
            });
        }

        Ok(repaired)
    }

    /// Invoices still awaiting payment within the scope.
    ///
    /// Runs the drift sweep first so a caller never sees an invoice listed
    /// as pending while its balance is already settled.
    pub async fn pending_invoices(
        &self,
        scope: &SweepScope,
    ) -> Result<Vec<Invoice>, SettlementError> {
        self.normalize_drift(scope).await?;
        self.store
            .find_open_invoices(scope)
            .await
            .map_err(SettlementError::from)
    }
}

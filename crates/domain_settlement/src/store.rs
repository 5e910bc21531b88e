//! Settlement store port
//!
//! The injected repository/unit-of-work boundary. Every multi-entity write
//! in the settlement core happens inside one `SettlementUnitOfWork`: either
//! every staged write commits, or none do. Adapters must serialize units of
//! work touching the same invoice (row lock or equivalent) so that two
//! concurrent payments can never both pass the remaining-balance check
//! against a stale balance.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{CustomerId, DomainPort, InvoiceId, LedgerEntryId, Money, PackageId, PaymentId, PortError};

use crate::invoice::{Invoice, InvoiceStatus};
use crate::payment::{Payment, PaymentStatus};
use crate::transaction::LedgerEntry;

/// Scope of a reconciliation or pending-invoices read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepScope {
    /// All invoices
    Global,
    /// Invoices of one customer
    Customer(CustomerId),
}

impl SweepScope {
    fn matches(&self, invoice: &Invoice) -> bool {
        match self {
            SweepScope::Global => true,
            SweepScope::Customer(id) => &invoice.customer_id == id,
        }
    }
}

/// The invoice fields the ledger rewrites when a payment commits
#[derive(Debug, Clone)]
pub struct SettlementUpdate {
    pub status: InvoiceStatus,
    pub is_paid: bool,
    pub paid_amount: Money,
    pub remaining_amount: Money,
    pub last_payment_date: DateTime<Utc>,
}

/// Read-side store operations
///
/// Reads outside a unit of work see only committed state.
#[async_trait]
pub trait SettlementStore: DomainPort {
    /// Opens a unit of work
    async fn begin(&self) -> Result<Box<dyn SettlementUnitOfWork>, PortError>;

    async fn get_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>, PortError>;

    async fn invoice_number_exists(&self, number: &str) -> Result<bool, PortError>;

    /// Payments for an invoice in commit order
    async fn payments_for_invoice(&self, id: InvoiceId) -> Result<Vec<Payment>, PortError>;

    /// Ledger entries for an invoice in commit order
    async fn ledger_entries_for_invoice(
        &self,
        id: InvoiceId,
    ) -> Result<Vec<LedgerEntry>, PortError>;

    /// Invoices currently in `Partial` status within the scope
    async fn find_partial_invoices(&self, scope: &SweepScope) -> Result<Vec<Invoice>, PortError>;

    /// Invoices still collectible (`Sent`, `Partial`, `Overdue`) within the scope
    async fn find_open_invoices(&self, scope: &SweepScope) -> Result<Vec<Invoice>, PortError>;

    /// Package ids linked to an invoice
    async fn linked_packages(&self, id: InvoiceId) -> Result<Vec<PackageId>, PortError>;
}

/// Write-side operations staged inside one atomic unit of work
///
/// Dropping a unit of work without committing rolls back every staged write.
#[async_trait]
pub trait SettlementUnitOfWork: Send {
    /// Reads an invoice, taking whatever lock the adapter uses to serialize
    /// concurrent settlements against it
    async fn invoice_for_update(&mut self, id: InvoiceId) -> Result<Option<Invoice>, PortError>;

    /// Sum of completed payment amounts, read under the same lock
    async fn completed_payment_total(&mut self, id: InvoiceId) -> Result<Money, PortError>;

    async fn insert_invoice(&mut self, invoice: &Invoice) -> Result<(), PortError>;

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), PortError>;

    async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<(), PortError>;

    /// Back-fills `Payment.transaction_id` after the ledger write
    async fn attach_payment_transaction(
        &mut self,
        payment_id: PaymentId,
        entry_id: LedgerEntryId,
    ) -> Result<(), PortError>;

    /// Rewrites the invoice's settlement fields
    async fn apply_settlement(
        &mut self,
        invoice_id: InvoiceId,
        update: SettlementUpdate,
    ) -> Result<(), PortError>;

    /// Administrative status write, keeping `is_paid` in sync
    async fn set_invoice_status(
        &mut self,
        invoice_id: InvoiceId,
        status: InvoiceStatus,
        is_paid: bool,
    ) -> Result<(), PortError>;

    /// Links a package to an invoice; returns false if the link already
    /// existed (idempotent, not an error)
    async fn insert_package_link(
        &mut self,
        invoice_id: InvoiceId,
        package_id: &PackageId,
    ) -> Result<bool, PortError>;

    /// Promotes drifted partial invoices to paid; only rows still in
    /// `Partial` with a settled balance are touched. Returns rows changed.
    async fn mark_paid(&mut self, invoice_ids: &[InvoiceId]) -> Result<u64, PortError>;

    /// Commits every staged write
    async fn commit(self: Box<Self>) -> Result<(), PortError>;
}

/// In-memory store adapter
///
/// Reference implementation used by the test suites. One async mutex guards
/// the whole state: a unit of work holds the lock from `begin` to commit or
/// drop, which over-serializes compared to per-invoice row locks but gives
/// exactly the isolation the port contract demands.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::{Mutex, OwnedMutexGuard};

    #[derive(Debug, Clone, Default)]
    struct StoreState {
        invoices: HashMap<InvoiceId, Invoice>,
        payments: HashMap<PaymentId, Payment>,
        entries: HashMap<LedgerEntryId, LedgerEntry>,
        links: HashMap<InvoiceId, Vec<PackageId>>,
    }

    /// In-memory settlement store
    #[derive(Debug, Clone, Default)]
    pub struct MemorySettlementStore {
        state: Arc<Mutex<StoreState>>,
    }

    impl MemorySettlementStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Inserts an invoice directly, bypassing the unit of work (test setup)
        pub async fn seed_invoice(&self, invoice: Invoice) {
            self.state.lock().await.invoices.insert(invoice.id, invoice);
        }
    }

    impl DomainPort for MemorySettlementStore {}

    struct MemoryUnitOfWork {
        guard: OwnedMutexGuard<StoreState>,
        snapshot: Option<StoreState>,
        committed: bool,
    }

    impl Drop for MemoryUnitOfWork {
        fn drop(&mut self) {
            // Roll back by restoring the state captured at begin.
            if !self.committed {
                if let Some(snapshot) = self.snapshot.take() {
                    *self.guard = snapshot;
                }
            }
        }
    }

    fn completed_total(state: &StoreState, id: InvoiceId) -> Money {
        state
            .payments
            .values()
            .filter(|p| p.invoice_id == id && p.status == PaymentStatus::Completed)
            .map(|p| p.amount)
            .sum()
    }

    #[async_trait]
    impl SettlementStore for MemorySettlementStore {
        async fn begin(&self) -> Result<Box<dyn SettlementUnitOfWork>, PortError> {
            let guard = self.state.clone().lock_owned().await;
            let snapshot = Some(guard.clone());
            Ok(Box::new(MemoryUnitOfWork {
                guard,
                snapshot,
                committed: false,
            }))
        }

        async fn get_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>, PortError> {
            Ok(self.state.lock().await.invoices.get(&id).cloned())
        }

        async fn invoice_number_exists(&self, number: &str) -> Result<bool, PortError> {
            Ok(self
                .state
                .lock()
                .await
                .invoices
                .values()
                .any(|i| i.invoice_number == number))
        }

        async fn payments_for_invoice(&self, id: InvoiceId) -> Result<Vec<Payment>, PortError> {
            let state = self.state.lock().await;
            let mut payments: Vec<Payment> = state
                .payments
                .values()
                .filter(|p| p.invoice_id == id)
                .cloned()
                .collect();
            payments.sort_by_key(|p| p.created_at);
            Ok(payments)
        }

        async fn ledger_entries_for_invoice(
            &self,
            id: InvoiceId,
        ) -> Result<Vec<LedgerEntry>, PortError> {
            let state = self.state.lock().await;
            let mut entries: Vec<LedgerEntry> = state
                .entries
                .values()
                .filter(|e| e.entity_id == id)
                .cloned()
                .collect();
            entries.sort_by_key(|e| e.created_at);
            Ok(entries)
        }

        async fn find_partial_invoices(
            &self,
            scope: &SweepScope,
        ) -> Result<Vec<Invoice>, PortError> {
            let state = self.state.lock().await;
            Ok(state
                .invoices
                .values()
                .filter(|i| i.status == InvoiceStatus::Partial && scope.matches(i))
                .cloned()
                .collect())
        }

        async fn find_open_invoices(&self, scope: &SweepScope) -> Result<Vec<Invoice>, PortError> {
            let state = self.state.lock().await;
            let mut open: Vec<Invoice> = state
                .invoices
                .values()
                .filter(|i| {
                    matches!(
                        i.status,
                        InvoiceStatus::Sent | InvoiceStatus::Partial | InvoiceStatus::Overdue
                    ) && scope.matches(i)
                })
                .cloned()
                .collect();
            open.sort_by_key(|i| i.created_at);
            Ok(open)
        }

        async fn linked_packages(&self, id: InvoiceId) -> Result<Vec<PackageId>, PortError> {
            Ok(self
                .state
                .lock()
                .await
                .links
                .get(&id)
                .cloned()
                .unwrap_or_default())
        }
    }

    #[async_trait]
    impl SettlementUnitOfWork for MemoryUnitOfWork {
        async fn invoice_for_update(
            &mut self,
            id: InvoiceId,
        ) -> Result<Option<Invoice>, PortError> {
            Ok(self.guard.invoices.get(&id).cloned())
        }

        async fn completed_payment_total(&mut self, id: InvoiceId) -> Result<Money, PortError> {
            Ok(completed_total(&self.guard, id))
        }

        async fn insert_invoice(&mut self, invoice: &Invoice) -> Result<(), PortError> {
            if self.guard.invoices.contains_key(&invoice.id) {
                return Err(PortError::conflict(format!(
                    "invoice {} already exists",
                    invoice.id
                )));
            }
            self.guard.invoices.insert(invoice.id, invoice.clone());
            Ok(())
        }

        async fn insert_payment(&mut self, payment: &Payment) -> Result<(), PortError> {
            self.guard.payments.insert(payment.id, payment.clone());
            Ok(())
        }

        async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<(), PortError> {
            self.guard.entries.insert(entry.id, entry.clone());
            Ok(())
        }

        async fn attach_payment_transaction(
            &mut self,
            payment_id: PaymentId,
            entry_id: LedgerEntryId,
        ) -> Result<(), PortError> {
            let payment = self
                .guard
                .payments
                .get_mut(&payment_id)
                .ok_or_else(|| PortError::not_found("Payment", payment_id))?;
            payment.attach_transaction(entry_id);
            Ok(())
        }

        async fn apply_settlement(
            &mut self,
            invoice_id: InvoiceId,
            update: SettlementUpdate,
        ) -> Result<(), PortError> {
            let invoice = self
                .guard
                .invoices
                .get_mut(&invoice_id)
                .ok_or_else(|| PortError::not_found("Invoice", invoice_id))?;
            invoice.status = update.status;
            invoice.is_paid = update.is_paid;
            invoice.paid_amount = update.paid_amount;
            invoice.remaining_amount = update.remaining_amount;
            invoice.last_payment_date = Some(update.last_payment_date);
            invoice.updated_at = Utc::now();
            Ok(())
        }

        async fn set_invoice_status(
            &mut self,
            invoice_id: InvoiceId,
            status: InvoiceStatus,
            is_paid: bool,
        ) -> Result<(), PortError> {
            let invoice = self
                .guard
                .invoices
                .get_mut(&invoice_id)
                .ok_or_else(|| PortError::not_found("Invoice", invoice_id))?;
            invoice.status = status;
            invoice.is_paid = is_paid;
            invoice.updated_at = Utc::now();
            Ok(())
        }

        async fn insert_package_link(
            &mut self,
            invoice_id: InvoiceId,
            package_id: &PackageId,
        ) -> Result<bool, PortError> {
            let links = self.guard.links.entry(invoice_id).or_default();
            if links.contains(package_id) {
                return Ok(false);
            }
            links.push(package_id.clone());
            Ok(true)
        }

        async fn mark_paid(&mut self, invoice_ids: &[InvoiceId]) -> Result<u64, PortError> {
            let mut changed = 0;
            for id in invoice_ids {
                if let Some(invoice) = self.guard.invoices.get_mut(id) {
                    if invoice.status == InvoiceStatus::Partial
                        && invoice.remaining_amount.is_settled()
                    {
                        invoice.status = InvoiceStatus::Paid;
                        invoice.is_paid = true;
                        invoice.updated_at = Utc::now();
                        changed += 1;
                    }
                }
            }
            Ok(changed)
        }

        async fn commit(mut self: Box<Self>) -> Result<(), PortError> {
            self.committed = true;
            Ok(())
        }
    }
}

//! Settlement ledger
//!
//! The only write path for money against an invoice. A settlement is one
//! atomic unit of work: Payment row, ledger entry, `transaction_id`
//! back-fill, and the invoice balance rewrite commit together or not at all.
//! The balance check runs against a recomputed completed-payment total read
//! under the same lock as the invoice row, so two concurrent payments can
//! never both pass against a stale balance.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use core_kernel::{InvoiceId, LedgerEntryId, Money, OperatorId, PaymentId};

use crate::error::SettlementError;
use crate::invoice::{Invoice, InvoiceStatus};
use crate::payment::{Payment, PaymentMethod, PayerDetails};
use crate::ports::{
    ActivityEvent, ActivityKind, ActivityLog, CustomerDirectory, NotificationDispatcher,
    OperatorDirectory,
};
use crate::store::{SettlementStore, SettlementUpdate};
use crate::transaction::{LedgerEntry, SettlementSnapshot};

/// A payment submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    /// Amount to apply to the invoice balance
    pub amount: Decimal,
    /// Free-text payment method; unknown labels default to cash
    #[serde(default)]
    pub method: Option<String>,
    /// Operator-entered metadata, snapshotted onto the payment
    #[serde(default)]
    pub payer_details: PayerDetails,
}

/// Outcome of a successful settlement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementResult {
    pub success: bool,
    pub payment_id: PaymentId,
    pub transaction_id: LedgerEntryId,
    pub is_partial_payment: bool,
    /// Completed-payment total after this payment
    pub paid_amount: Money,
    /// Balance remaining after this payment
    pub remaining_amount: Money,
    pub message: String,
}

/// Processes payments and administrative status changes
pub struct SettlementLedger {
    store: Arc<dyn SettlementStore>,
    customers: Arc<dyn CustomerDirectory>,
    operators: Arc<dyn OperatorDirectory>,
    notifications: Arc<dyn NotificationDispatcher>,
    activity: Arc<dyn ActivityLog>,
}

impl SettlementLedger {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        customers: Arc<dyn CustomerDirectory>,
        operators: Arc<dyn OperatorDirectory>,
        notifications: Arc<dyn NotificationDispatcher>,
        activity: Arc<dyn ActivityLog>,
    ) -> Self {
        Self {
            store,
            customers,
            operators,
            notifications,
            activity,
        }
    }

    /// Records a payment against an invoice.
    ///
    /// Rejections, in order: non-positive amount (validation), unknown
    /// operator (not found), unknown invoice (not found), invoice already
    /// paid or cancelled (conflict), amount strictly exceeding the remaining
    /// balance (validation). A rejection writes nothing.
    pub async fn process_payment(
        &self,
        invoice_id: InvoiceId,
        request: PaymentRequest,
        operator_id: OperatorId,
    ) -> Result<SettlementResult, SettlementError> {
        let amount = Money::new(request.amount);
        if !amount.is_positive() {
            return Err(SettlementError::validation(
                "payment amount must be positive",
            ));
        }

        let operator = self
            .operators
            .find_by_id(&operator_id)
            .await
            .map_err(SettlementError::from)?
            .ok_or_else(|| SettlementError::not_found("Operator", operator_id.as_str()))?;

        let mut uow = self.store.begin().await.map_err(SettlementError::from)?;

        let mut invoice = uow
            .invoice_for_update(invoice_id)
            .await
            .map_err(SettlementError::from)?
            .ok_or_else(|| SettlementError::not_found("Invoice", invoice_id))?;

        // Status and flag are checked independently; an adapter that let
        // them drift apart must still refuse money against a paid invoice.
        if invoice.status == InvoiceStatus::Paid || invoice.is_paid {
            return Err(SettlementError::conflict(format!(
                "invoice {} is already fully paid",
                invoice.invoice_number
            )));
        }
        if invoice.status == InvoiceStatus::Cancelled {
            return Err(SettlementError::conflict(format!(
                "invoice {} is cancelled",
                invoice.invoice_number
            )));
        }

        // The balance is recomputed from completed payments under the lock;
        // the persisted paid_amount is never trusted for the overpayment check.
        let previous_paid = uow
            .completed_payment_total(invoice_id)
            .await
            .map_err(SettlementError::from)?;
        let remaining = invoice.total_amount - previous_paid;
        if amount > remaining {
            return Err(SettlementError::validation(format!(
                "payment amount {} exceeds remaining balance {}",
                amount, remaining
            )));
        }

        let total_paid = previous_paid.checked_add(&amount)?;
        let remaining_after = invoice.total_amount - total_paid;
        // A balance within tolerance of the total closes the invoice; the
        // caller's partial flag cannot hold a closed balance open.
        let is_fully_paid = total_paid.approx_eq(&invoice.total_amount);
        let is_partial = !is_fully_paid;

        let method = request
            .method
            .as_deref()
            .map(PaymentMethod::from_label)
            .unwrap_or(PaymentMethod::Cash);
        let payment = Payment::completed(invoice_id, amount, method, request.payer_details);

        uow.insert_payment(&payment)
            .await
            .map_err(SettlementError::from)?;

        let snapshot = SettlementSnapshot {
            previous_paid,
            amount,
            total_paid,
            remaining_after,
            processed_by: operator.id.clone(),
        };
        let entry =
            LedgerEntry::for_payment(invoice_id, &invoice.invoice_number, &payment, snapshot);
        uow.insert_ledger_entry(&entry)
            .await
            .map_err(SettlementError::from)?;
        uow.attach_payment_transaction(payment.id, entry.id)
            .await
            .map_err(SettlementError::from)?;

        let update = SettlementUpdate {
            status: if is_fully_paid {
                InvoiceStatus::Paid
            } else {
                InvoiceStatus::Partial
            },
            is_paid: is_fully_paid,
            paid_amount: total_paid,
            remaining_amount: remaining_after,
            last_payment_date: payment.payment_date,
        };
        invoice.status = update.status;
        invoice.is_paid = update.is_paid;
        invoice.paid_amount = update.paid_amount;
        invoice.remaining_amount = update.remaining_amount;
        invoice.last_payment_date = Some(update.last_payment_date);
        uow.apply_settlement(invoice_id, update)
            .await
            .map_err(SettlementError::from)?;

        uow.commit().await.map_err(SettlementError::from)?;

        info!(
            invoice_id = %invoice_id,
            invoice_number = %invoice.invoice_number,
            payment_id = %payment.id,
            transaction_id = %entry.id,
            amount = %amount,
            remaining = %remaining_after,
            partial = is_partial,
            "payment settled"
        );

        self.dispatch_settled(invoice.clone(), payment.clone(), operator.id);

        Ok(SettlementResult {
            success: true,
            payment_id: payment.id,
            transaction_id: entry.id,
            is_partial_payment: is_partial,
            paid_amount: total_paid,
            remaining_amount: remaining_after,
            message: if is_partial {
                "Partial payment recorded".to_string()
            } else {
                "Payment processed successfully".to_string()
            },
        })
    }

    /// Administrative status override, bypassing the payment path.
    ///
    /// Guards the paid invariant both ways: an invoice with an open balance
    /// cannot be forced into `Paid`, and an invoice with a closed balance
    /// cannot be forced out of it.
    pub async fn update_invoice_status(
        &self,
        invoice_id: InvoiceId,
        status: InvoiceStatus,
    ) -> Result<Invoice, SettlementError> {
        let mut uow = self.store.begin().await.map_err(SettlementError::from)?;
        let mut invoice = uow
            .invoice_for_update(invoice_id)
            .await
            .map_err(SettlementError::from)?
            .ok_or_else(|| SettlementError::not_found("Invoice", invoice_id))?;

        if status == InvoiceStatus::Paid && !invoice.remaining_amount.is_settled() {
            return Err(SettlementError::conflict(format!(
                "invoice {} still has {} outstanding",
                invoice.invoice_number, invoice.remaining_amount
            )));
        }
        if status != InvoiceStatus::Paid
            && invoice.status == InvoiceStatus::Paid
            && invoice.remaining_amount.is_settled()
        {
            return Err(SettlementError::conflict(format!(
                "invoice {} has a settled balance and stays paid",
                invoice.invoice_number
            )));
        }

        let is_paid = status == InvoiceStatus::Paid;
        uow.set_invoice_status(invoice_id, status, is_paid)
            .await
            .map_err(SettlementError::from)?;
        uow.commit().await.map_err(SettlementError::from)?;

        let previous = invoice.status;
        invoice.status = status;
        invoice.is_paid = is_paid;

        info!(
            invoice_id = %invoice_id,
            from = %previous,
            to = %status,
            "invoice status overridden"
        );

        let activity = Arc::clone(&self.activity);
        let event = ActivityEvent::new(
            ActivityKind::InvoiceStatusChanged,
            format!(
                "Invoice {} status changed from {} to {}",
                invoice.invoice_number, previous, status
            ),
        )
        .for_invoice(invoice_id);
        tokio::spawn(async move {
            if let Err(err) = activity.record(event).await {
                warn!(invoice_id = %invoice_id, error = %err, "activity record failed");
            }
        });

        Ok(invoice)
    }

    /// Fetches an invoice, erroring when it does not exist
    pub async fn get_invoice(&self, invoice_id: InvoiceId) -> Result<Invoice, SettlementError> {
        self.store
            .get_invoice(invoice_id)
            .await
            .map_err(SettlementError::from)?
            .ok_or_else(|| SettlementError::not_found("Invoice", invoice_id))
    }

    /// Payments recorded against an invoice, in commit order
    pub async fn payments_for_invoice(
        &self,
        invoice_id: InvoiceId,
    ) -> Result<Vec<Payment>, SettlementError> {
        self.store
            .payments_for_invoice(invoice_id)
            .await
            .map_err(SettlementError::from)
    }

    /// Ledger entries recorded against an invoice, in commit order
    pub async fn ledger_entries_for_invoice(
        &self,
        invoice_id: InvoiceId,
    ) -> Result<Vec<LedgerEntry>, SettlementError> {
        self.store
            .ledger_entries_for_invoice(invoice_id)
            .await
            .map_err(SettlementError::from)
    }

    fn dispatch_settled(&self, invoice: Invoice, payment: Payment, operator_id: OperatorId) {
        let customers = Arc::clone(&self.customers);
        let notifications = Arc::clone(&self.notifications);
        let activity = Arc::clone(&self.activity);
        tokio::spawn(async move {
            match customers.find_by_id(invoice.customer_id.as_str()).await {
                Ok(Some(customer)) => {
                    if let Err(err) = notifications
                        .notify_payment_processed(&customer, &invoice, &payment)
                        .await
                    {
                        warn!(invoice_id = %invoice.id, error = %err, "payment notification failed");
                    }
                }
                Ok(None) => {
                    warn!(customer_id = %invoice.customer_id, "customer vanished, skipping payment notification");
                }
                Err(err) => {
                    warn!(customer_id = %invoice.customer_id, error = %err, "customer lookup failed, skipping payment notification");
                }
            }

            let event = ActivityEvent::new(
                ActivityKind::PaymentProcessed,
                format!(
                    "Payment of {} recorded against invoice {}",
                    payment.amount, invoice.invoice_number
                ),
            )
            .for_invoice(invoice.id)
            .by_operator(operator_id)
            .with_metadata(serde_json::json!({
                "payment_id": payment.id,
                "amount": payment.amount,
                "method": payment.method,
            }));
            if let Err(err) = activity.record(event).await {
                warn!(invoice_id = %invoice.id, error = %err, "activity record failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::Invoice;
    use crate::ports::mock::{
        MockCustomerDirectory, MockOperatorDirectory, RecordingActivityLog,
        RecordingNotificationDispatcher,
    };
    use crate::ports::{CustomerSummary, OperatorSummary};
    use crate::store::memory::MemorySettlementStore;
    use chrono::NaiveDate;
    use core_kernel::CustomerId;
    use rust_decimal_macros::dec;

    async fn ledger_with_store() -> (SettlementLedger, Arc<MemorySettlementStore>) {
        let store = Arc::new(MemorySettlementStore::new());
        let customers = Arc::new(MockCustomerDirectory::new());
        customers
            .insert_customer(CustomerSummary {
                id: CustomerId::from("cust-1"),
                name: "Ada".to_string(),
                email: None,
                branch_id: None,
            })
            .await;
        let operators = Arc::new(MockOperatorDirectory::new());
        operators
            .insert(OperatorSummary {
                id: OperatorId::from("op-1"),
                name: "Op".to_string(),
                email: None,
            })
            .await;
        let ledger = SettlementLedger::new(
            store.clone(),
            customers,
            operators,
            Arc::new(RecordingNotificationDispatcher::new()),
            Arc::new(RecordingActivityLog::new()),
        );
        (ledger, store)
    }

    async fn seeded_invoice(store: &MemorySettlementStore, total: Money) -> Invoice {
        let invoice = Invoice::new(
            "NYC-0000000042".to_string(),
            CustomerId::from("cust-1"),
            None,
            OperatorId::from("op-1"),
            NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
            NaiveDate::from_ymd_opt(2026, 2, 5).unwrap(),
            InvoiceStatus::Sent,
            total,
            vec![],
        );
        store.seed_invoice(invoice.clone()).await;
        invoice
    }

    fn pay(amount: Decimal) -> PaymentRequest {
        PaymentRequest {
            amount,
            method: Some("cash".to_string()),
            payer_details: PayerDetails::default(),
        }
    }

    #[tokio::test]
    async fn test_full_payment_closes_invoice() {
        let (ledger, store) = ledger_with_store().await;
        let invoice = seeded_invoice(&store, Money::new(dec!(150.00))).await;

        let result = ledger
            .process_payment(invoice.id, pay(dec!(150.00)), OperatorId::from("op-1"))
            .await
            .unwrap();

        assert!(result.success);
        assert!(!result.is_partial_payment);
        assert_eq!(result.remaining_amount, Money::zero());
        assert_eq!(result.message, "Payment processed successfully");

        let stored = store.get_invoice(invoice.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InvoiceStatus::Paid);
        assert!(stored.is_paid);
        assert_eq!(stored.paid_amount, Money::new(dec!(150.00)));
        assert!(stored.last_payment_date.is_some());
    }

    #[tokio::test]
    async fn test_partial_then_completing_payment() {
        let (ledger, store) = ledger_with_store().await;
        let invoice = seeded_invoice(&store, Money::new(dec!(200.00))).await;

        let first = ledger
            .process_payment(invoice.id, pay(dec!(80.00)), OperatorId::from("op-1"))
            .await
            .unwrap();
        assert!(first.is_partial_payment);
        assert_eq!(first.remaining_amount, Money::new(dec!(120.00)));
        assert_eq!(first.message, "Partial payment recorded");

        let mid = store.get_invoice(invoice.id).await.unwrap().unwrap();
        assert_eq!(mid.status, InvoiceStatus::Partial);
        assert!(!mid.is_paid);

        let second = ledger
            .process_payment(invoice.id, pay(dec!(120.00)), OperatorId::from("op-1"))
            .await
            .unwrap();
        assert!(!second.is_partial_payment);
        assert_eq!(second.paid_amount, Money::new(dec!(200.00)));

        let done = store.get_invoice(invoice.id).await.unwrap().unwrap();
        assert_eq!(done.status, InvoiceStatus::Paid);
        assert_eq!(done.remaining_amount, Money::zero());
    }

    #[tokio::test]
    async fn test_overpayment_rejected_without_writes() {
        let (ledger, store) = ledger_with_store().await;
        let invoice = seeded_invoice(&store, Money::new(dec!(100.00))).await;

        ledger
            .process_payment(invoice.id, pay(dec!(60.00)), OperatorId::from("op-1"))
            .await
            .unwrap();

        let err = ledger
            .process_payment(invoice.id, pay(dec!(50.00)), OperatorId::from("op-1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert_eq!(err.status_code(), 400);

        let stored = store.get_invoice(invoice.id).await.unwrap().unwrap();
        assert_eq!(stored.remaining_amount, Money::new(dec!(40.00)));
        assert_eq!(store.payments_for_invoice(invoice.id).await.unwrap().len(), 1);
        assert_eq!(
            store.ledger_entries_for_invoice(invoice.id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_payment_a_cent_over_remaining_is_rejected() {
        let (ledger, store) = ledger_with_store().await;
        let invoice = seeded_invoice(&store, Money::new(dec!(100.00))).await;

        let err = ledger
            .process_payment(invoice.id, pay(dec!(100.01)), OperatorId::from("op-1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(store.payments_for_invoice(invoice.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_paid_flag_alone_blocks_further_payments() {
        let (ledger, store) = ledger_with_store().await;
        let mut invoice = seeded_invoice(&store, Money::new(dec!(100.00))).await;
        // Flag set without the matching status, as a buggy adapter might.
        invoice.is_paid = true;
        store.seed_invoice(invoice.clone()).await;

        let err = ledger
            .process_payment(invoice.id, pay(dec!(50.00)), OperatorId::from("op-1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[tokio::test]
    async fn test_double_settlement_is_conflict() {
        let (ledger, store) = ledger_with_store().await;
        let invoice = seeded_invoice(&store, Money::new(dec!(50.00))).await;

        ledger
            .process_payment(invoice.id, pay(dec!(50.00)), OperatorId::from("op-1"))
            .await
            .unwrap();

        let err = ledger
            .process_payment(invoice.id, pay(dec!(50.00)), OperatorId::from("op-1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");
        assert_eq!(err.status_code(), 409);
        assert_eq!(store.payments_for_invoice(invoice.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_invoice_rejects_payment() {
        let (ledger, store) = ledger_with_store().await;
        let mut invoice = seeded_invoice(&store, Money::new(dec!(50.00))).await;
        invoice.status = InvoiceStatus::Cancelled;
        store.seed_invoice(invoice.clone()).await;

        let err = ledger
            .process_payment(invoice.id, pay(dec!(50.00)), OperatorId::from("op-1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[tokio::test]
    async fn test_unknown_operator_rejected_before_any_write() {
        let (ledger, store) = ledger_with_store().await;
        let invoice = seeded_invoice(&store, Money::new(dec!(50.00))).await;

        let err = ledger
            .process_payment(invoice.id, pay(dec!(50.00)), OperatorId::from("op-missing"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
        assert!(store.payments_for_invoice(invoice.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_invoice_is_not_found() {
        let (ledger, _store) = ledger_with_store().await;
        let err = ledger
            .process_payment(InvoiceId::new_v7(), pay(dec!(10.00)), OperatorId::from("op-1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_zero_amount_rejected() {
        let (ledger, store) = ledger_with_store().await;
        let invoice = seeded_invoice(&store, Money::new(dec!(50.00))).await;
        let err = ledger
            .process_payment(invoice.id, pay(dec!(0)), OperatorId::from("op-1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn test_near_total_payment_within_tolerance_closes() {
        let (ledger, store) = ledger_with_store().await;
        let invoice = seeded_invoice(&store, Money::new(dec!(100.00))).await;

        let result = ledger
            .process_payment(invoice.id, pay(dec!(99.995)), OperatorId::from("op-1"))
            .await
            .unwrap();
        assert!(!result.is_partial_payment);

        let stored = store.get_invoice(invoice.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InvoiceStatus::Paid);
    }

    #[tokio::test]
    async fn test_ledger_entry_snapshot_matches_balances() {
        let (ledger, store) = ledger_with_store().await;
        let invoice = seeded_invoice(&store, Money::new(dec!(200.00))).await;

        ledger
            .process_payment(invoice.id, pay(dec!(80.00)), OperatorId::from("op-1"))
            .await
            .unwrap();
        let result = ledger
            .process_payment(invoice.id, pay(dec!(120.00)), OperatorId::from("op-1"))
            .await
            .unwrap();

        let entries = store.ledger_entries_for_invoice(invoice.id).await.unwrap();
        assert_eq!(entries.len(), 2);
        let last = &entries[1];
        assert_eq!(last.id, result.transaction_id);
        assert_eq!(last.metadata.previous_paid, Money::new(dec!(80.00)));
        assert_eq!(last.metadata.total_paid, Money::new(dec!(200.00)));
        assert_eq!(last.metadata.remaining_after, Money::zero());

        let payments = store.payments_for_invoice(invoice.id).await.unwrap();
        assert_eq!(payments[1].transaction_id, Some(last.id));
    }

    #[tokio::test]
    async fn test_status_override_rejects_paid_with_open_balance() {
        let (ledger, store) = ledger_with_store().await;
        let invoice = seeded_invoice(&store, Money::new(dec!(100.00))).await;

        let err = ledger
            .update_invoice_status(invoice.id, InvoiceStatus::Paid)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[tokio::test]
    async fn test_status_override_rejects_reopening_settled_invoice() {
        let (ledger, store) = ledger_with_store().await;
        let invoice = seeded_invoice(&store, Money::new(dec!(100.00))).await;
        ledger
            .process_payment(invoice.id, pay(dec!(100.00)), OperatorId::from("op-1"))
            .await
            .unwrap();

        let err = ledger
            .update_invoice_status(invoice.id, InvoiceStatus::Sent)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[tokio::test]
    async fn test_status_override_cancels_open_invoice() {
        let (ledger, store) = ledger_with_store().await;
        let invoice = seeded_invoice(&store, Money::new(dec!(100.00))).await;

        let updated = ledger
            .update_invoice_status(invoice.id, InvoiceStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(updated.status, InvoiceStatus::Cancelled);
        assert!(!updated.is_paid);

        let stored = store.get_invoice(invoice.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InvoiceStatus::Cancelled);
    }
}

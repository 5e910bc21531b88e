//! Ledger transactions
//!
//! Every successful payment produces exactly one ledger entry: an immutable
//! audit record, separate from the mutable Invoice/Payment rows. Entries are
//! append-only - never mutated, never deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{InvoiceId, LedgerEntryId, Money, OperatorId, PaymentId};

use crate::payment::{Payment, PaymentMethod};

/// The entity type every settlement entry references
pub const ENTITY_TYPE_INVOICE: &str = "invoice";

/// The transaction type for settlement entries
pub const TRANSACTION_TYPE_PAYMENT: &str = "payment";

/// Full audit snapshot of the balance change a payment caused
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementSnapshot {
    /// Completed-payment total before this payment
    pub previous_paid: Money,
    /// Amount of this payment
    pub amount: Money,
    /// Completed-payment total after this payment
    pub total_paid: Money,
    /// Invoice balance remaining after this payment
    pub remaining_after: Money,
    /// Operator who processed the settlement
    pub processed_by: OperatorId,
}

/// An immutable ledger entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique identifier
    pub id: LedgerEntryId,
    /// Human-readable description
    pub description: String,
    /// Entry status (settlement entries are completed at creation)
    pub status: String,
    /// Transaction type ("payment")
    pub transaction_type: String,
    /// Referenced entity type ("invoice")
    pub entity_type: String,
    /// The invoice this entry settles against
    pub entity_id: InvoiceId,
    /// The payment this entry records
    pub reference_id: PaymentId,
    /// Amount moved
    pub amount: Money,
    /// Payment method recorded on the payment
    pub payment_method: PaymentMethod,
    /// Full audit snapshot
    pub metadata: SettlementSnapshot,
    /// When the entry was created
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Builds the ledger entry for a payment
    pub fn for_payment(
        invoice_id: InvoiceId,
        invoice_number: &str,
        payment: &Payment,
        metadata: SettlementSnapshot,
    ) -> Self {
        Self {
            id: LedgerEntryId::new_v7(),
            description: format!(
                "Payment of {} against invoice {}",
                payment.amount, invoice_number
            ),
            status: "completed".to_string(),
            transaction_type: TRANSACTION_TYPE_PAYMENT.to_string(),
            entity_type: ENTITY_TYPE_INVOICE.to_string(),
            entity_id: invoice_id,
            reference_id: payment.id,
            amount: payment.amount,
            payment_method: payment.method,
            metadata,
            created_at: Utc::now(),
        }
    }
}

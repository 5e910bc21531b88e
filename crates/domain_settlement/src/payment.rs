//! Payment records
//!
//! A payment is created exactly once per settlement attempt that passes
//! validation, and is never mutated afterwards except to attach the ledger
//! transaction id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{InvoiceId, LedgerEntryId, Money, OperatorId, PaymentId};

/// Payment method, recorded as metadata - no gateway integration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    CreditCard,
    DebitCard,
    BankTransfer,
    Paypal,
    Crypto,
    GiftCard,
    StoreCredit,
}

impl PaymentMethod {
    /// Maps operator-entered free text onto a method via a fixed lookup
    /// table. Unknown labels default to `Cash`.
    pub fn from_label(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "cash" => PaymentMethod::Cash,
            "credit_card" | "card" | "credit" => PaymentMethod::CreditCard,
            "debit_card" | "debit" => PaymentMethod::DebitCard,
            "bank_transfer" | "transfer" | "wire" => PaymentMethod::BankTransfer,
            "paypal" => PaymentMethod::Paypal,
            "crypto" | "cryptocurrency" => PaymentMethod::Crypto,
            "gift_card" => PaymentMethod::GiftCard,
            "store_credit" => PaymentMethod::StoreCredit,
            _ => PaymentMethod::Cash,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::CreditCard => "credit_card",
            PaymentMethod::DebitCard => "debit_card",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Paypal => "paypal",
            PaymentMethod::Crypto => "crypto",
            PaymentMethod::GiftCard => "gift_card",
            PaymentMethod::StoreCredit => "store_credit",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

/// Operator-entered settlement metadata snapshotted on the payment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PayerDetails {
    /// Cash amount physically received (may exceed the applied amount)
    pub amount_received: Option<Money>,
    /// Change handed back
    pub change_given: Option<Money>,
    /// Caller explicitly flagged this as a partial payment
    #[serde(default)]
    pub is_partial_payment: bool,
    /// Operator who took the payment
    pub received_by: Option<OperatorId>,
    /// Free-form note
    pub note: Option<String>,
}

/// A payment recorded against an invoice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    /// Unique identifier
    pub id: PaymentId,
    /// Invoice being paid
    pub invoice_id: InvoiceId,
    /// Amount applied to the invoice balance (> 0)
    pub amount: Money,
    /// Payment method
    pub method: PaymentMethod,
    /// Status
    pub status: PaymentStatus,
    /// When the payment was taken
    pub payment_date: DateTime<Utc>,
    /// Ledger transaction, back-filled after the ledger write
    pub transaction_id: Option<LedgerEntryId>,
    /// Operator-entered metadata snapshot
    pub payer_details: PayerDetails,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl Payment {
    /// Creates a completed payment record
    ///
    /// Operator-entered settlements are completed at creation; `Pending` and
    /// `Failed` exist for records imported from upstream systems.
    pub fn completed(
        invoice_id: InvoiceId,
        amount: Money,
        method: PaymentMethod,
        payer_details: PayerDetails,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: PaymentId::new_v7(),
            invoice_id,
            amount,
            method,
            status: PaymentStatus::Completed,
            payment_date: now,
            transaction_id: None,
            payer_details,
            created_at: now,
        }
    }

    /// Attaches the ledger transaction id after the ledger write
    pub fn attach_transaction(&mut self, entry_id: LedgerEntryId) {
        self.transaction_id = Some(entry_id);
    }
}

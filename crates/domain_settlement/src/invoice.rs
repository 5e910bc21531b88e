//! Invoice aggregate
//!
//! Invoices are append-only financial records: created once by the factory,
//! mutated only by the settlement ledger (or an administrative status
//! override), and never physically deleted - cancellation is a status.

use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use core_kernel::{BranchId, CustomerId, InvoiceId, InvoiceItemId, Money, OperatorId};

/// Invoice status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    /// Invoice is being drafted
    Draft,
    /// Invoice has been issued to the customer
    Sent,
    /// Partial payment received
    Partial,
    /// Fully paid
    Paid,
    /// Past due date
    Overdue,
    /// Cancelled/voided (administrative, not a row delete)
    Cancelled,
}

impl InvoiceStatus {
    /// Maps free-text request status onto the enum, case-insensitively.
    ///
    /// Unrecognized values default to `Sent`.
    pub fn from_request(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "draft" => InvoiceStatus::Draft,
            "sent" => InvoiceStatus::Sent,
            "partial" => InvoiceStatus::Partial,
            "paid" => InvoiceStatus::Paid,
            "overdue" => InvoiceStatus::Overdue,
            "cancelled" | "canceled" => InvoiceStatus::Cancelled,
            _ => InvoiceStatus::Sent,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Partial => "partial",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    /// True if the ledger may record payments against an invoice in this state
    pub fn accepts_payments(&self) -> bool {
        !matches!(self, InvoiceStatus::Paid | InvoiceStatus::Cancelled)
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

static WEIGHT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Weight:\s*([0-9]+(?:\.[0-9]+)?)\s*lb").unwrap());
static RATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Rate:\s*\$\s*([0-9]+(?:\.[0-9]+)?)").unwrap());

/// A line item on an invoice
///
/// `tracking_number`, `weight`, and `rate` are best-effort enrichment parsed
/// out of the free-text name/description; nothing downstream treats them as
/// authoritative except package linking, which skips unresolvable numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceItem {
    /// Item ID
    pub id: InvoiceItemId,
    /// Item name, e.g. "Package - TRK123"
    pub name: String,
    /// Free-text description, e.g. "Weight: 4.5lb, Rate: $3.00"
    pub description: String,
    /// Tracking number parsed from the name (after the last " - ")
    pub tracking_number: Option<String>,
    /// Weight in pounds parsed from the description (0 if absent)
    pub weight: Decimal,
    /// Per-pound rate parsed from the description (0 if absent)
    pub rate: Decimal,
    /// Quantity (>= 1)
    pub quantity: u32,
    /// Unit price
    pub unit_price: Money,
    /// quantity x unit_price
    pub total_price: Money,
}

impl InvoiceItem {
    /// Builds an item from raw request fields, parsing the embedded shipment
    /// metadata.
    pub fn from_request(name: &str, description: &str, quantity: u32, unit_price: Money) -> Self {
        Self {
            id: InvoiceItemId::new_v7(),
            name: name.to_string(),
            description: description.to_string(),
            tracking_number: parse_tracking_number(name),
            weight: parse_weight(description).unwrap_or(Decimal::ZERO),
            rate: parse_rate(description).unwrap_or(Decimal::ZERO),
            quantity,
            unit_price,
            total_price: unit_price.multiply(Decimal::from(quantity)),
        }
    }
}

/// Extracts the tracking number: the substring after the last `" - "`.
pub fn parse_tracking_number(name: &str) -> Option<String> {
    let (_, tail) = name.rsplit_once(" - ")?;
    let tail = tail.trim();
    if tail.is_empty() {
        None
    } else {
        Some(tail.to_string())
    }
}

/// Extracts the weight from a `"Weight: <num>lb"` pattern.
pub fn parse_weight(description: &str) -> Option<Decimal> {
    WEIGHT_RE
        .captures(description)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Extracts the rate from a `"Rate: $<num>"` pattern.
pub fn parse_rate(description: &str) -> Option<Decimal> {
    RATE_RE
        .captures(description)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// An invoice aggregating one or more package charges for a customer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    /// Unique identifier
    pub id: InvoiceId,
    /// Human-readable, branch-prefixed, unique invoice number
    pub invoice_number: String,
    /// Customer being billed (owned by the customer directory)
    pub customer_id: CustomerId,
    /// Issuing branch
    pub branch_id: Option<BranchId>,
    /// Operator who created the invoice
    pub operator_id: OperatorId,
    /// Issue date
    pub issue_date: NaiveDate,
    /// Payment due date
    pub due_date: NaiveDate,
    /// When the most recent payment was recorded
    pub last_payment_date: Option<DateTime<Utc>>,
    /// Total amount billed
    pub total_amount: Money,
    /// Sum of completed payments (persisted derived value)
    pub paid_amount: Money,
    /// total_amount - paid_amount (persisted derived value)
    pub remaining_amount: Money,
    /// Status
    pub status: InvoiceStatus,
    /// Must always equal `status == Paid`
    pub is_paid: bool,
    /// Line items in billing order
    pub items: Vec<InvoiceItem>,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Creates a new invoice with a zero paid balance
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        invoice_number: String,
        customer_id: CustomerId,
        branch_id: Option<BranchId>,
        operator_id: OperatorId,
        issue_date: NaiveDate,
        due_date: NaiveDate,
        status: InvoiceStatus,
        total_amount: Money,
        items: Vec<InvoiceItem>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: InvoiceId::new_v7(),
            invoice_number,
            customer_id,
            branch_id,
            operator_id,
            issue_date,
            due_date,
            last_payment_date: None,
            total_amount,
            paid_amount: Money::zero(),
            remaining_amount: total_amount,
            status,
            is_paid: status == InvoiceStatus::Paid,
            items,
            created_at: now,
            updated_at: now,
        }
    }

    /// Tracking numbers parsed from the items, in billing order
    pub fn tracking_numbers(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter_map(|i| i.tracking_number.as_deref())
            .collect()
    }

    /// True once the remaining balance is within the settlement tolerance
    pub fn balance_closed(&self) -> bool {
        self.remaining_amount.is_settled()
    }

    /// Checks if the invoice is past due and still collectible
    pub fn is_overdue(&self) -> bool {
        let today = Utc::now().date_naive();
        today > self.due_date && self.status.accepts_payments()
    }
}

//! Test Data Builders
//!
//! Builders for constructing settlement test data with sensible defaults,
//! so tests specify only the fields they care about.

use chrono::NaiveDate;
use core_kernel::{BranchId, CustomerId, Money, OperatorId};
use domain_settlement::{Invoice, InvoiceItem, InvoiceStatus};
use rust_decimal_macros::dec;

/// Builder for test invoices
pub struct TestInvoiceBuilder {
    invoice_number: String,
    customer_id: CustomerId,
    branch_id: Option<BranchId>,
    operator_id: OperatorId,
    issue_date: NaiveDate,
    due_date: NaiveDate,
    status: InvoiceStatus,
    total_amount: Money,
    items: Vec<InvoiceItem>,
}

impl Default for TestInvoiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestInvoiceBuilder {
    /// Creates a builder with default values: a sent invoice for 100.00
    pub fn new() -> Self {
        Self {
            invoice_number: "TST-0000000001".to_string(),
            customer_id: CustomerId::from("test-customer"),
            branch_id: None,
            operator_id: OperatorId::from("test-operator"),
            issue_date: NaiveDate::from_ymd_opt(2026, 1, 5).expect("valid date"),
            due_date: NaiveDate::from_ymd_opt(2026, 2, 5).expect("valid date"),
            status: InvoiceStatus::Sent,
            total_amount: Money::new(dec!(100.00)),
            items: vec![],
        }
    }

    pub fn with_number(mut self, number: impl Into<String>) -> Self {
        self.invoice_number = number.into();
        self
    }

    pub fn with_customer(mut self, customer_id: impl Into<CustomerId>) -> Self {
        self.customer_id = customer_id.into();
        self
    }

    pub fn with_branch(mut self, branch_id: impl Into<BranchId>) -> Self {
        self.branch_id = Some(branch_id.into());
        self
    }

    pub fn with_status(mut self, status: InvoiceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_total(mut self, total: Money) -> Self {
        self.total_amount = total;
        self
    }

    pub fn with_due_date(mut self, due_date: NaiveDate) -> Self {
        self.due_date = due_date;
        self
    }

    /// Adds a package line item with a parseable name and description
    pub fn with_package_item(mut self, tracking: &str, weight_lb: &str, unit_price: Money) -> Self {
        self.items.push(InvoiceItem::from_request(
            &format!("Package - {tracking}"),
            &format!("Weight: {weight_lb}lb, Rate: $3.00"),
            1,
            unit_price,
        ));
        self
    }

    pub fn build(self) -> Invoice {
        Invoice::new(
            self.invoice_number,
            self.customer_id,
            self.branch_id,
            self.operator_id,
            self.issue_date,
            self.due_date,
            self.status,
            self.total_amount,
            self.items,
        )
    }
}

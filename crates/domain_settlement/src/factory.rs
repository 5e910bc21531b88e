//! Invoice creation
//!
//! Turns a raw creation request into a persisted invoice: resolves the
//! customer and operator against their directories, validates and enriches
//! the line items, generates the branch-prefixed number, and commits the
//! invoice together with its package links in one unit of work.

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use core_kernel::{canonical_dashed_form, Money, OperatorId};

use crate::error::SettlementError;
use crate::invoice::{Invoice, InvoiceItem, InvoiceStatus};
use crate::linkage::cascade_delivered;
use crate::number::{NumberGenerator, DEFAULT_PREFIX};
use crate::ports::{
    ActivityEvent, ActivityKind, CustomerDirectory, CustomerSummary, NotificationDispatcher,
    OperatorDirectory, PackageStore, PackageSummary,
};
use crate::store::SettlementStore;

/// A line item as submitted by the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInvoiceItem {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub quantity: u32,
    /// Unit price
    pub price: Decimal,
}

/// An invoice creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInvoiceRequest {
    /// Raw customer id; compact 32-hex-digit forms are also accepted
    pub customer_id: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    /// Free-text initial status; unknown values fall back to "sent"
    #[serde(default)]
    pub status: Option<String>,
    /// Caller-computed total, cross-checked against the items
    pub total_amount: Decimal,
    pub items: Vec<CreateInvoiceItem>,
}

/// Creates invoices from raw requests
pub struct InvoiceFactory {
    store: Arc<dyn SettlementStore>,
    customers: Arc<dyn CustomerDirectory>,
    operators: Arc<dyn OperatorDirectory>,
    packages: Arc<dyn PackageStore>,
    notifications: Arc<dyn NotificationDispatcher>,
    activity: Arc<dyn crate::ports::ActivityLog>,
}

impl InvoiceFactory {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        customers: Arc<dyn CustomerDirectory>,
        operators: Arc<dyn OperatorDirectory>,
        packages: Arc<dyn PackageStore>,
        notifications: Arc<dyn NotificationDispatcher>,
        activity: Arc<dyn crate::ports::ActivityLog>,
    ) -> Self {
        Self {
            store,
            customers,
            operators,
            packages,
            notifications,
            activity,
        }
    }

    /// Creates and persists an invoice.
    ///
    /// The invoice and its package links commit atomically; the package
    /// status cascade and the notification/activity side effects run after
    /// the commit and never fail the call.
    pub async fn create_invoice(
        &self,
        request: CreateInvoiceRequest,
        operator_id: OperatorId,
    ) -> Result<Invoice, SettlementError> {
        let operator = self
            .operators
            .find_by_id(&operator_id)
            .await
            .map_err(SettlementError::from)?
            .ok_or_else(|| SettlementError::not_found("Operator", operator_id.as_str()))?;

        let customer = self.resolve_customer(&request.customer_id).await?;

        let items = build_items(&request.items)?;
        let total_amount = resolve_total(&items, request.total_amount);

        let status = request
            .status
            .as_deref()
            .map(InvoiceStatus::from_request)
            .unwrap_or(InvoiceStatus::Sent);

        let prefix = self.branch_prefix(&customer).await?;
        let invoice_number = NumberGenerator::new(self.store.as_ref())
            .generate(&prefix)
            .await?;

        let invoice = Invoice::new(
            invoice_number,
            customer.id.clone(),
            customer.branch_id.clone(),
            operator.id.clone(),
            request.issue_date,
            request.due_date,
            status,
            total_amount,
            items,
        );

        // Resolve tracking numbers before opening the unit of work; the
        // package store is external and must not extend the write window.
        let mut linked: Vec<PackageSummary> = Vec::new();
        for tracking in invoice.tracking_numbers() {
            match self.packages.find_by_tracking_number(tracking).await {
                Ok(Some(package)) => linked.push(package),
                Ok(None) => {}
                Err(err) => {
                    warn!(tracking, error = %err, "package lookup failed, skipping link");
                }
            }
        }

        let mut uow = self.store.begin().await.map_err(SettlementError::from)?;
        uow.insert_invoice(&invoice)
            .await
            .map_err(SettlementError::from)?;
        for package in &linked {
            uow.insert_package_link(invoice.id, &package.id)
                .await
                .map_err(SettlementError::from)?;
        }
        uow.commit().await.map_err(SettlementError::from)?;

        info!(
            invoice_id = %invoice.id,
            invoice_number = %invoice.invoice_number,
            customer_id = %invoice.customer_id,
            total = %invoice.total_amount,
            packages = linked.len(),
            "invoice created"
        );

        cascade_delivered(self.packages.as_ref(), &linked).await;
        self.dispatch_created(customer, invoice.clone());

        Ok(invoice)
    }

    /// Customer lookup with the compact-hex fallback: ids stored dashed in
    /// the directory are still found when the caller strips the dashes.
    async fn resolve_customer(&self, raw: &str) -> Result<CustomerSummary, SettlementError> {
        if let Some(customer) = self
            .customers
            .find_by_id(raw)
            .await
            .map_err(SettlementError::from)?
        {
            return Ok(customer);
        }
        if let Some(dashed) = canonical_dashed_form(raw) {
            if let Some(customer) = self
                .customers
                .find_by_formatted_id(&dashed)
                .await
                .map_err(SettlementError::from)?
            {
                return Ok(customer);
            }
        }
        Err(SettlementError::not_found("Customer", raw))
    }

    async fn branch_prefix(&self, customer: &CustomerSummary) -> Result<String, SettlementError> {
        if let Some(branch_id) = &customer.branch_id {
            let branch = self
                .customers
                .find_branch(branch_id)
                .await
                .map_err(SettlementError::from)?;
            if let Some(prefix) = branch.and_then(|b| b.prefix) {
                return Ok(prefix);
            }
        }
        Ok(DEFAULT_PREFIX.to_string())
    }

    fn dispatch_created(&self, customer: CustomerSummary, invoice: Invoice) {
        let notifications = Arc::clone(&self.notifications);
        let activity = Arc::clone(&self.activity);
        tokio::spawn(async move {
            if let Err(err) = notifications.notify_invoice_created(&customer, &invoice).await {
                warn!(invoice_id = %invoice.id, error = %err, "invoice notification failed");
            }
            let event = ActivityEvent::new(
                ActivityKind::InvoiceCreated,
                format!("Invoice {} created", invoice.invoice_number),
            )
            .for_invoice(invoice.id)
            .by_operator(invoice.operator_id.clone())
            .with_metadata(serde_json::json!({
                "invoice_number": invoice.invoice_number,
                "total_amount": invoice.total_amount,
            }));
            if let Err(err) = activity.record(event).await {
                warn!(invoice_id = %invoice.id, error = %err, "activity record failed");
            }
        });
    }
}

fn build_items(raw: &[CreateInvoiceItem]) -> Result<Vec<InvoiceItem>, SettlementError> {
    if raw.is_empty() {
        return Err(SettlementError::validation(
            "invoice must contain at least one item",
        ));
    }
    let mut items = Vec::with_capacity(raw.len());
    for item in raw {
        if item.name.trim().is_empty() {
            return Err(SettlementError::validation("item name must not be empty"));
        }
        if item.quantity == 0 {
            return Err(SettlementError::validation(format!(
                "item '{}' must have a positive quantity",
                item.name
            )));
        }
        if item.price <= Decimal::ZERO {
            return Err(SettlementError::validation(format!(
                "item '{}' must have a positive price",
                item.name
            )));
        }
        items.push(InvoiceItem::from_request(
            &item.name,
            &item.description,
            item.quantity,
            Money::new(item.price),
        ));
    }
    Ok(items)
}

/// The item-derived total is authoritative; a mismatching caller total is
/// logged and overridden rather than rejected.
fn resolve_total(items: &[InvoiceItem], requested: Decimal) -> Money {
    let calculated: Money = items.iter().map(|i| i.total_price).sum();
    let calculated = calculated.round_to_cents();
    let requested = Money::new(requested);
    if !calculated.approx_eq(&requested) {
        warn!(
            requested = %requested,
            calculated = %calculated,
            "requested invoice total disagrees with items, using calculated total"
        );
    }
    calculated
}

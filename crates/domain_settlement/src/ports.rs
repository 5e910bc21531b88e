//! Settlement collaborator ports
//!
//! The settlement core consumes its external collaborators - customer and
//! operator directories, the package store, the notification dispatcher, and
//! the activity log - through narrow port traits. Adapters can be internal
//! (database) or external (directory service API); the `mock` module provides
//! in-memory implementations for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{BranchId, CustomerId, DomainPort, OperatorId, PackageId, PortError};

use crate::invoice::Invoice;
use crate::payment::Payment;

/// Customer summary as the directory exposes it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerSummary {
    pub id: CustomerId,
    pub name: String,
    pub email: Option<String>,
    pub branch_id: Option<BranchId>,
}

/// Operator summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorSummary {
    pub id: OperatorId,
    pub name: String,
    pub email: Option<String>,
}

/// Branch summary; `prefix` feeds invoice number generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchSummary {
    pub id: BranchId,
    pub name: String,
    pub prefix: Option<String>,
}

/// Package lifecycle status as tracked by the package store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    Pending,
    InTransit,
    ReadyForPickup,
    Delivered,
}

/// Package summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSummary {
    pub id: PackageId,
    pub tracking_number: String,
    pub status: PackageStatus,
}

/// Customer directory lookups
#[async_trait]
pub trait CustomerDirectory: DomainPort {
    /// Finds a customer by the raw id the caller supplied
    async fn find_by_id(&self, id: &str) -> Result<Option<CustomerSummary>, PortError>;

    /// Finds a customer by a reformatted (canonical dashed) id
    async fn find_by_formatted_id(&self, id: &str) -> Result<Option<CustomerSummary>, PortError>;

    /// Resolves a branch record
    async fn find_branch(&self, id: &BranchId) -> Result<Option<BranchSummary>, PortError>;
}

/// Operator directory lookups
#[async_trait]
pub trait OperatorDirectory: DomainPort {
    async fn find_by_id(&self, id: &OperatorId) -> Result<Option<OperatorSummary>, PortError>;
}

/// Package store lookups and the delivered-status cascade
#[async_trait]
pub trait PackageStore: DomainPort {
    async fn find_by_tracking_number(
        &self,
        tracking_number: &str,
    ) -> Result<Option<PackageSummary>, PortError>;

    async fn set_status(&self, id: &PackageId, status: PackageStatus) -> Result<(), PortError>;
}

/// Best-effort customer notifications; failures are logged, never surfaced
#[async_trait]
pub trait NotificationDispatcher: DomainPort {
    async fn notify_invoice_created(
        &self,
        customer: &CustomerSummary,
        invoice: &Invoice,
    ) -> Result<(), PortError>;

    async fn notify_payment_processed(
        &self,
        customer: &CustomerSummary,
        invoice: &Invoice,
        payment: &Payment,
    ) -> Result<(), PortError>;
}

/// Kind of activity being recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    InvoiceCreated,
    PaymentProcessed,
    InvoiceStatusChanged,
    ReconciliationRun,
}

/// An audit activity record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub kind: ActivityKind,
    pub description: String,
    pub entity_type: String,
    pub entity_id: String,
    pub operator_id: Option<OperatorId>,
    pub metadata: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl ActivityEvent {
    pub fn new(kind: ActivityKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            entity_type: "invoice".to_string(),
            entity_id: String::new(),
            operator_id: None,
            metadata: serde_json::Value::Null,
            occurred_at: Utc::now(),
        }
    }

    pub fn for_invoice(mut self, invoice_id: impl std::fmt::Display) -> Self {
        self.entity_id = invoice_id.to_string();
        self
    }

    pub fn by_operator(mut self, operator_id: OperatorId) -> Self {
        self.operator_id = Some(operator_id);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Best-effort activity log; failures are logged, never surfaced
#[async_trait]
pub trait ActivityLog: DomainPort {
    async fn record(&self, event: ActivityEvent) -> Result<(), PortError>;
}

/// In-memory adapters for tests and local runs
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::RwLock;

    /// In-memory customer directory
    ///
    /// Customers are keyed by the raw id string the directory issued, so the
    /// dashed-form retry in the factory can be exercised by registering a
    /// customer under its dashed id only.
    #[derive(Debug, Default)]
    pub struct MockCustomerDirectory {
        customers: Arc<RwLock<HashMap<String, CustomerSummary>>>,
        branches: Arc<RwLock<HashMap<BranchId, BranchSummary>>>,
    }

    impl MockCustomerDirectory {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn insert_customer(&self, customer: CustomerSummary) {
            self.customers
                .write()
                .await
                .insert(customer.id.as_str().to_string(), customer);
        }

        pub async fn insert_branch(&self, branch: BranchSummary) {
            self.branches.write().await.insert(branch.id.clone(), branch);
        }
    }

    impl DomainPort for MockCustomerDirectory {}

    #[async_trait]
    impl CustomerDirectory for MockCustomerDirectory {
        async fn find_by_id(&self, id: &str) -> Result<Option<CustomerSummary>, PortError> {
            Ok(self.customers.read().await.get(id).cloned())
        }

        async fn find_by_formatted_id(
            &self,
            id: &str,
        ) -> Result<Option<CustomerSummary>, PortError> {
            Ok(self.customers.read().await.get(id).cloned())
        }

        async fn find_branch(&self, id: &BranchId) -> Result<Option<BranchSummary>, PortError> {
            Ok(self.branches.read().await.get(id).cloned())
        }
    }

    /// In-memory operator directory
    #[derive(Debug, Default)]
    pub struct MockOperatorDirectory {
        operators: Arc<RwLock<HashMap<OperatorId, OperatorSummary>>>,
    }

    impl MockOperatorDirectory {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn insert(&self, operator: OperatorSummary) {
            self.operators
                .write()
                .await
                .insert(operator.id.clone(), operator);
        }
    }

    impl DomainPort for MockOperatorDirectory {}

    #[async_trait]
    impl OperatorDirectory for MockOperatorDirectory {
        async fn find_by_id(&self, id: &OperatorId) -> Result<Option<OperatorSummary>, PortError> {
            Ok(self.operators.read().await.get(id).cloned())
        }
    }

    /// In-memory package store
    #[derive(Debug, Default)]
    pub struct MockPackageStore {
        packages: Arc<RwLock<HashMap<String, PackageSummary>>>,
    }

    impl MockPackageStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn insert(&self, package: PackageSummary) {
            self.packages
                .write()
                .await
                .insert(package.tracking_number.clone(), package);
        }

        pub async fn status_of(&self, id: &PackageId) -> Option<PackageStatus> {
            self.packages
                .read()
                .await
                .values()
                .find(|p| &p.id == id)
                .map(|p| p.status)
        }
    }

    impl DomainPort for MockPackageStore {}

    #[async_trait]
    impl PackageStore for MockPackageStore {
        async fn find_by_tracking_number(
            &self,
            tracking_number: &str,
        ) -> Result<Option<PackageSummary>, PortError> {
            Ok(self.packages.read().await.get(tracking_number).cloned())
        }

        async fn set_status(&self, id: &PackageId, status: PackageStatus) -> Result<(), PortError> {
            let mut packages = self.packages.write().await;
            let package = packages
                .values_mut()
                .find(|p| &p.id == id)
                .ok_or_else(|| PortError::not_found("Package", id))?;
            package.status = status;
            Ok(())
        }
    }

    /// Notification dispatcher that records calls, optionally failing
    /// every one of them to exercise the swallow-and-log path.
    #[derive(Debug, Default)]
    pub struct RecordingNotificationDispatcher {
        sent: Arc<RwLock<Vec<String>>>,
        fail: AtomicBool,
    }

    impl RecordingNotificationDispatcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            let dispatcher = Self::default();
            dispatcher.fail.store(true, Ordering::SeqCst);
            dispatcher
        }

        pub async fn sent(&self) -> Vec<String> {
            self.sent.read().await.clone()
        }

        pub async fn sent_count(&self) -> usize {
            self.sent.read().await.len()
        }
    }

    impl DomainPort for RecordingNotificationDispatcher {}

    #[async_trait]
    impl NotificationDispatcher for RecordingNotificationDispatcher {
        async fn notify_invoice_created(
            &self,
            customer: &CustomerSummary,
            invoice: &Invoice,
        ) -> Result<(), PortError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(PortError::ServiceUnavailable {
                    service: "notifications".to_string(),
                });
            }
            self.sent.write().await.push(format!(
                "invoice_created:{}:{}",
                customer.id, invoice.invoice_number
            ));
            Ok(())
        }

        async fn notify_payment_processed(
            &self,
            customer: &CustomerSummary,
            invoice: &Invoice,
            payment: &Payment,
        ) -> Result<(), PortError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(PortError::ServiceUnavailable {
                    service: "notifications".to_string(),
                });
            }
            self.sent.write().await.push(format!(
                "payment_processed:{}:{}:{}",
                customer.id, invoice.invoice_number, payment.amount
            ));
            Ok(())
        }
    }

    /// Activity log that records events, optionally failing
    #[derive(Debug, Default)]
    pub struct RecordingActivityLog {
        events: Arc<RwLock<Vec<ActivityEvent>>>,
        fail: AtomicBool,
    }

    impl RecordingActivityLog {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            let log = Self::default();
            log.fail.store(true, Ordering::SeqCst);
            log
        }

        pub async fn events(&self) -> Vec<ActivityEvent> {
            self.events.read().await.clone()
        }

        pub async fn event_count(&self) -> usize {
            self.events.read().await.len()
        }
    }

    impl DomainPort for RecordingActivityLog {}

    #[async_trait]
    impl ActivityLog for RecordingActivityLog {
        async fn record(&self, event: ActivityEvent) -> Result<(), PortError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(PortError::ServiceUnavailable {
                    service: "activity-log".to_string(),
                });
            }
            self.events.write().await.push(event);
            Ok(())
        }
    }
}

//! Settlement Domain - Invoice Settlement & Payment Ledger
//!
//! This crate implements invoice lifecycle and payment settlement for the
//! parcel back-office: invoices aggregate per-package charges, payments
//! settle against them, and every settlement leaves an immutable ledger
//! entry behind.
//!
//! # Settlement Principles
//!
//! - A payment may never exceed the remaining balance; a balance within
//!   0.01 of the total closes the invoice
//! - The recorded balance is always recomputed from completed payments
//!   under the same lock as the invoice row
//! - Payment, ledger entry, and invoice update commit in one unit of work
//! - Notifications and activity records are best-effort and never fail a
//!   settlement
//!
//! # Example
//!
//! ```rust,ignore
//! use domain_settlement::{SettlementLedger, PaymentRequest};
//!
//! let ledger = SettlementLedger::new(store, customers, operators, notifications, activity);
//!
//! let result = ledger
//!     .process_payment(invoice_id, PaymentRequest {
//!         amount: dec!(80.00),
//!         method: Some("cash".into()),
//!         payer_details: Default::default(),
//!     }, operator_id)
//!     .await?;
//! ```

pub mod error;
pub mod factory;
pub mod invoice;
pub mod ledger;
pub mod linkage;
pub mod number;
pub mod payment;
pub mod ports;
pub mod reconcile;
pub mod store;
pub mod transaction;

pub use error::SettlementError;
pub use factory::{CreateInvoiceItem, CreateInvoiceRequest, InvoiceFactory};
pub use invoice::{Invoice, InvoiceItem, InvoiceStatus};
pub use ledger::{PaymentRequest, SettlementLedger, SettlementResult};
pub use linkage::PackageLinkage;
pub use number::{NumberGenerator, DEFAULT_PREFIX};
pub use payment::{PayerDetails, Payment, PaymentMethod, PaymentStatus};
pub use reconcile::ReconciliationSweep;
pub use store::{memory::MemorySettlementStore, SettlementStore, SettlementUnitOfWork, SweepScope};
pub use transaction::{LedgerEntry, SettlementSnapshot};

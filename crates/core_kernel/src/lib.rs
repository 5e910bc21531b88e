//! Core Kernel - Foundational types for the settlement system
//!
//! This crate provides the fundamental building blocks used across all domain modules:
//! - Money with precise decimal arithmetic and the settlement tolerance
//! - Strongly-typed identifiers
//! - Port abstractions shared by all adapters

pub mod money;
pub mod identifiers;
pub mod ports;

pub use money::{Money, MoneyError, SETTLEMENT_TOLERANCE};
pub use identifiers::{
    InvoiceId, InvoiceItemId, PaymentId, LedgerEntryId,
    CustomerId, OperatorId, PackageId, BranchId,
    canonical_dashed_form,
};
pub use ports::{DomainPort, PortError};

//! Invoice-package linkage
//!
//! Associates invoices with the packages they bill and cascades billed
//! packages to `delivered`. The package store is an external system, so the
//! status cascade runs outside the invoice unit of work and is idempotent:
//! re-running it on an already delivered package is a no-op.

use std::sync::Arc;

use tracing::{debug, warn};

use core_kernel::{InvoiceId, PackageId};

use crate::error::SettlementError;
use crate::ports::{PackageStatus, PackageStore, PackageSummary};
use crate::store::SettlementStore;

/// Sets each package to delivered, skipping ones already there. Failures
/// are logged and swallowed; the links themselves are already committed.
pub(crate) async fn cascade_delivered(packages: &dyn PackageStore, linked: &[PackageSummary]) {
    for package in linked {
        if package.status == PackageStatus::Delivered {
            continue;
        }
        if let Err(err) = packages.set_status(&package.id, PackageStatus::Delivered).await {
            warn!(
                package_id = %package.id,
                tracking = %package.tracking_number,
                error = %err,
                "package delivered cascade failed"
            );
        }
    }
}

/// Links packages to invoices by tracking number
pub struct PackageLinkage {
    store: Arc<dyn SettlementStore>,
    packages: Arc<dyn PackageStore>,
}

impl PackageLinkage {
    pub fn new(store: Arc<dyn SettlementStore>, packages: Arc<dyn PackageStore>) -> Self {
        Self { store, packages }
    }

    /// Resolves each tracking number against the package store, links the
    /// resolved packages to the invoice, and cascades them to delivered.
    ///
    /// Unresolvable tracking numbers are skipped, not errors. Returns the
    /// package ids linked by this call, in input order; already linked
    /// packages are included (the link insert is idempotent).
    pub async fn link_packages(
        &self,
        invoice_id: InvoiceId,
        tracking_numbers: &[String],
    ) -> Result<Vec<PackageId>, SettlementError> {
        let invoice = self
            .store
            .get_invoice(invoice_id)
            .await
            .map_err(SettlementError::from)?
            .ok_or_else(|| SettlementError::not_found("Invoice", invoice_id))?;

        let mut resolved: Vec<PackageSummary> = Vec::new();
        for tracking in tracking_numbers {
            match self.packages.find_by_tracking_number(tracking).await {
                Ok(Some(package)) => resolved.push(package),
                Ok(None) => {
                    debug!(tracking, invoice_id = %invoice_id, "tracking number unresolved, skipping");
                }
                Err(err) => {
                    warn!(tracking, error = %err, "package lookup failed, skipping link");
                }
            }
        }

        let mut uow = self.store.begin().await.map_err(SettlementError::from)?;
        for package in &resolved {
            uow.insert_package_link(invoice_id, &package.id)
                .await
                .map_err(SettlementError::from)?;
        }
        uow.commit().await.map_err(SettlementError::from)?;

        debug!(
            invoice_id = %invoice_id,
            invoice_number = %invoice.invoice_number,
            linked = resolved.len(),
            "packages linked"
        );

        cascade_delivered(self.packages.as_ref(), &resolved).await;

        Ok(resolved.into_iter().map(|p| p.id).collect())
    }

    /// Package ids currently linked to an invoice
    pub async fn linked_packages(
        &self,
        invoice_id: InvoiceId,
    ) -> Result<Vec<PackageId>, SettlementError> {
        self.store
            .linked_packages(invoice_id)
            .await
            .map_err(SettlementError::from)
    }
}

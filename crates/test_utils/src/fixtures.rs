//! Pre-built fixtures for common settlement test data

use core_kernel::{BranchId, CustomerId, OperatorId, PackageId};
use domain_settlement::ports::{
    BranchSummary, CustomerSummary, OperatorSummary, PackageStatus, PackageSummary,
};

/// Fixtures for directory summaries
pub struct DirectoryFixtures;

impl DirectoryFixtures {
    pub fn customer() -> CustomerSummary {
        CustomerSummary {
            id: CustomerId::from("test-customer"),
            name: "Ada Lovelace".to_string(),
            email: Some("ada@example.com".to_string()),
            branch_id: Some(BranchId::from("test-branch")),
        }
    }

    pub fn customer_without_branch() -> CustomerSummary {
        CustomerSummary {
            id: CustomerId::from("test-customer"),
            name: "Ada Lovelace".to_string(),
            email: None,
            branch_id: None,
        }
    }

    pub fn branch() -> BranchSummary {
        BranchSummary {
            id: BranchId::from("test-branch"),
            name: "Test Branch".to_string(),
            prefix: Some("TST".to_string()),
        }
    }

    pub fn operator() -> OperatorSummary {
        OperatorSummary {
            id: OperatorId::from("test-operator"),
            name: "Test Operator".to_string(),
            email: None,
        }
    }
}

/// Fixtures for package summaries
pub struct PackageFixtures;

impl PackageFixtures {
    pub fn ready_for_pickup(tracking: &str) -> PackageSummary {
        PackageSummary {
            id: PackageId::from(format!("pkg-{tracking}")),
            tracking_number: tracking.to_string(),
            status: PackageStatus::ReadyForPickup,
        }
    }

    pub fn delivered(tracking: &str) -> PackageSummary {
        PackageSummary {
            id: PackageId::from(format!("pkg-{tracking}")),
            tracking_number: tracking.to_string(),
            status: PackageStatus::Delivered,
        }
    }
}

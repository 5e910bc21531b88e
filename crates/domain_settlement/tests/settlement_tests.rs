//! End-to-end settlement scenarios over the in-memory store

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use core_kernel::{BranchId, CustomerId, InvoiceId, Money, OperatorId, PackageId};

use domain_settlement::ports::mock::{
    MockCustomerDirectory, MockOperatorDirectory, MockPackageStore, RecordingActivityLog,
    RecordingNotificationDispatcher,
};
use domain_settlement::ports::{
    BranchSummary, CustomerSummary, OperatorSummary, PackageStatus, PackageSummary,
};
use domain_settlement::{
    CreateInvoiceItem, CreateInvoiceRequest, InvoiceFactory, InvoiceStatus,
    MemorySettlementStore, PayerDetails, PaymentRequest, ReconciliationSweep, SettlementLedger,
    SettlementStore, SweepScope,
};
use test_utils::{assert_balance_invariant, assert_settled, TestInvoiceBuilder};

struct World {
    store: Arc<MemorySettlementStore>,
    customers: Arc<MockCustomerDirectory>,
    operators: Arc<MockOperatorDirectory>,
    packages: Arc<MockPackageStore>,
    notifications: Arc<RecordingNotificationDispatcher>,
    activity: Arc<RecordingActivityLog>,
}

impl World {
    async fn new() -> Self {
        init_tracing();
        let world = Self {
            store: Arc::new(MemorySettlementStore::new()),
            customers: Arc::new(MockCustomerDirectory::new()),
            operators: Arc::new(MockOperatorDirectory::new()),
            packages: Arc::new(MockPackageStore::new()),
            notifications: Arc::new(RecordingNotificationDispatcher::new()),
            activity: Arc::new(RecordingActivityLog::new()),
        };
        world
            .customers
            .insert_customer(CustomerSummary {
                id: CustomerId::from("cust-1"),
                name: "Ada Lovelace".to_string(),
                email: Some("ada@example.com".to_string()),
                branch_id: Some(BranchId::from("branch-nyc")),
            })
            .await;
        world
            .customers
            .insert_branch(BranchSummary {
                id: BranchId::from("branch-nyc"),
                name: "New York".to_string(),
                prefix: Some("NYC".to_string()),
            })
            .await;
        world
            .operators
            .insert(OperatorSummary {
                id: OperatorId::from("op-1"),
                name: "Op One".to_string(),
                email: None,
            })
            .await;
        world
    }

    fn factory(&self) -> InvoiceFactory {
        InvoiceFactory::new(
            self.store.clone(),
            self.customers.clone(),
            self.operators.clone(),
            self.packages.clone(),
            self.notifications.clone(),
            self.activity.clone(),
        )
    }

    fn ledger(&self) -> SettlementLedger {
        SettlementLedger::new(
            self.store.clone(),
            self.customers.clone(),
            self.operators.clone(),
            self.notifications.clone(),
            self.activity.clone(),
        )
    }

    fn sweep(&self) -> ReconciliationSweep {
        ReconciliationSweep::new(self.store.clone(), self.activity.clone())
    }

    async fn seed_invoice(&self, total: Decimal) -> InvoiceId {
        let invoice = TestInvoiceBuilder::new()
            .with_number(format!("NYC-{:010}", unique_suffix()))
            .with_customer("cust-1")
            .with_branch("branch-nyc")
            .with_total(Money::new(total))
            .build();
        let id = invoice.id;
        self.store.seed_invoice(invoice).await;
        id
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

fn unique_suffix() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

fn pay(amount: Decimal) -> PaymentRequest {
    PaymentRequest {
        amount,
        method: Some("cash".to_string()),
        payer_details: PayerDetails::default(),
    }
}

fn op() -> OperatorId {
    OperatorId::from("op-1")
}

mod invoice_creation {
    use super::*;

    #[tokio::test]
    async fn test_create_invoice_links_packages_and_notifies() {
        let world = World::new().await;
        world
            .packages
            .insert(PackageSummary {
                id: PackageId::from("pkg-1"),
                tracking_number: "TRK100".to_string(),
                status: PackageStatus::ReadyForPickup,
            })
            .await;

        let invoice = world
            .factory()
            .create_invoice(
                CreateInvoiceRequest {
                    customer_id: "cust-1".to_string(),
                    issue_date: NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
                    due_date: NaiveDate::from_ymd_opt(2026, 2, 5).unwrap(),
                    status: None,
                    total_amount: dec!(150.00),
                    items: vec![CreateInvoiceItem {
                        name: "Package - TRK100".to_string(),
                        description: "Weight: 50lb, Rate: $3.00".to_string(),
                        quantity: 1,
                        price: dec!(150.00),
                    }],
                },
                op(),
            )
            .await
            .unwrap();

        assert!(invoice.invoice_number.starts_with("NYC-"));
        assert_eq!(invoice.items[0].tracking_number.as_deref(), Some("TRK100"));
        assert_eq!(invoice.items[0].weight, dec!(50));
        assert_eq!(invoice.items[0].rate, dec!(3.00));
        assert_eq!(
            world.store.linked_packages(invoice.id).await.unwrap(),
            vec![PackageId::from("pkg-1")]
        );
        assert_eq!(
            world.packages.status_of(&PackageId::from("pkg-1")).await,
            Some(PackageStatus::Delivered)
        );

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(world.notifications.sent_count().await, 1);
        assert_eq!(world.activity.event_count().await, 1);
    }

    #[tokio::test]
    async fn test_generated_numbers_are_unique_across_invoices() {
        let world = World::new().await;
        let factory = world.factory();
        let mut numbers = std::collections::HashSet::new();
        for _ in 0..10 {
            let invoice = factory
                .create_invoice(
                    CreateInvoiceRequest {
                        customer_id: "cust-1".to_string(),
                        issue_date: NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
                        due_date: NaiveDate::from_ymd_opt(2026, 2, 5).unwrap(),
                        status: None,
                        total_amount: dec!(10.00),
                        items: vec![CreateInvoiceItem {
                            name: "Handling fee".to_string(),
                            description: String::new(),
                            quantity: 1,
                            price: dec!(10.00),
                        }],
                    },
                    op(),
                )
                .await
                .unwrap();
            assert!(numbers.insert(invoice.invoice_number));
        }
    }
}

mod settlement_scenarios {
    use super::*;

    #[tokio::test]
    async fn test_full_payment_of_150() {
        let world = World::new().await;
        let invoice_id = world.seed_invoice(dec!(150.00)).await;

        let result = world
            .ledger()
            .process_payment(invoice_id, pay(dec!(150.00)), op())
            .await
            .unwrap();

        assert!(!result.is_partial_payment);
        assert_eq!(result.paid_amount, Money::new(dec!(150.00)));
        assert_eq!(result.remaining_amount, Money::zero());

        let invoice = world.store.get_invoice(invoice_id).await.unwrap().unwrap();
        assert_settled(&invoice);

        let payments = world.store.payments_for_invoice(invoice_id).await.unwrap();
        let entries = world
            .store
            .ledger_entries_for_invoice(invoice_id)
            .await
            .unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(entries.len(), 1);
        assert_eq!(payments[0].transaction_id, Some(entries[0].id));
    }

    #[tokio::test]
    async fn test_partial_80_then_completing_120_of_200() {
        let world = World::new().await;
        let invoice_id = world.seed_invoice(dec!(200.00)).await;
        let ledger = world.ledger();

        let first = ledger
            .process_payment(invoice_id, pay(dec!(80.00)), op())
            .await
            .unwrap();
        assert!(first.is_partial_payment);
        assert_eq!(first.remaining_amount, Money::new(dec!(120.00)));

        let second = ledger
            .process_payment(invoice_id, pay(dec!(120.00)), op())
            .await
            .unwrap();
        assert!(!second.is_partial_payment);

        let invoice = world.store.get_invoice(invoice_id).await.unwrap().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Paid);
        assert_eq!(invoice.paid_amount, Money::new(dec!(200.00)));
        assert_eq!(invoice.remaining_amount, Money::zero());
        assert_eq!(
            world
                .store
                .ledger_entries_for_invoice(invoice_id)
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_overpayment_rejected_and_nothing_written() {
        let world = World::new().await;
        let invoice_id = world.seed_invoice(dec!(100.00)).await;
        let ledger = world.ledger();

        ledger
            .process_payment(invoice_id, pay(dec!(60.00)), op())
            .await
            .unwrap();

        let err = ledger
            .process_payment(invoice_id, pay(dec!(50.00)), op())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");

        let invoice = world.store.get_invoice(invoice_id).await.unwrap().unwrap();
        assert_eq!(invoice.remaining_amount, Money::new(dec!(40.00)));
        assert_eq!(invoice.status, InvoiceStatus::Partial);
        assert_eq!(
            world.store.payments_for_invoice(invoice_id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_settling_a_paid_invoice_is_conflict_with_zero_writes() {
        let world = World::new().await;
        let invoice_id = world.seed_invoice(dec!(50.00)).await;
        let ledger = world.ledger();

        ledger
            .process_payment(invoice_id, pay(dec!(50.00)), op())
            .await
            .unwrap();
        let err = ledger
            .process_payment(invoice_id, pay(dec!(50.00)), op())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "conflict");
        assert_eq!(err.status_code(), 409);
        assert_eq!(
            world.store.payments_for_invoice(invoice_id).await.unwrap().len(),
            1
        );
        assert_eq!(
            world
                .store
                .ledger_entries_for_invoice(invoice_id)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_concurrent_payments_never_overpay() {
        let world = World::new().await;
        let invoice_id = world.seed_invoice(dec!(100.00)).await;
        let ledger = Arc::new(world.ledger());

        let mut handles = Vec::new();
        for _ in 0..5 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ledger
                    .process_payment(invoice_id, pay(dec!(30.00)), op())
                    .await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }

        // 30 * 4 would exceed 100, so exactly three can land.
        assert_eq!(successes, 3);
        let invoice = world.store.get_invoice(invoice_id).await.unwrap().unwrap();
        assert_eq!(invoice.paid_amount, Money::new(dec!(90.00)));
        assert_eq!(invoice.remaining_amount, Money::new(dec!(10.00)));
        assert_eq!(
            world.store.payments_for_invoice(invoice_id).await.unwrap().len(),
            3
        );
    }

    #[tokio::test]
    async fn test_partial_flag_cannot_hold_a_closed_balance_open() {
        let world = World::new().await;
        let invoice_id = world.seed_invoice(dec!(100.00)).await;

        let result = world
            .ledger()
            .process_payment(
                invoice_id,
                PaymentRequest {
                    amount: dec!(100.00),
                    method: None,
                    payer_details: PayerDetails {
                        is_partial_payment: true,
                        ..PayerDetails::default()
                    },
                },
                op(),
            )
            .await
            .unwrap();

        assert!(!result.is_partial_payment);
        let invoice = world.store.get_invoice(invoice_id).await.unwrap().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Paid);
    }
}

mod reconciliation {
    use super::*;

    #[tokio::test]
    async fn test_sweep_twice_second_run_repairs_nothing() {
        let world = World::new().await;
        let invoice_id = world.seed_invoice(dec!(100.00)).await;
        // Simulate drift: balance settled but status stuck in partial.
        let mut invoice = world.store.get_invoice(invoice_id).await.unwrap().unwrap();
        invoice.status = InvoiceStatus::Partial;
        invoice.paid_amount = Money::new(dec!(99.999));
        invoice.remaining_amount = Money::new(dec!(0.001));
        world.store.seed_invoice(invoice).await;

        let sweep = world.sweep();
        assert_eq!(sweep.normalize_drift(&SweepScope::Global).await.unwrap(), 1);
        assert_eq!(sweep.normalize_drift(&SweepScope::Global).await.unwrap(), 0);

        let repaired = world.store.get_invoice(invoice_id).await.unwrap().unwrap();
        assert_eq!(repaired.status, InvoiceStatus::Paid);
        assert!(repaired.is_paid);
        // Sweep never touches payments or the ledger.
        assert!(world
            .store
            .payments_for_invoice(invoice_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_pending_listing_runs_sweep_first() {
        let world = World::new().await;
        let drifted_id = world.seed_invoice(dec!(100.00)).await;
        let mut drifted = world.store.get_invoice(drifted_id).await.unwrap().unwrap();
        drifted.status = InvoiceStatus::Partial;
        drifted.paid_amount = Money::new(dec!(100.00));
        drifted.remaining_amount = Money::zero();
        world.store.seed_invoice(drifted).await;
        let open_id = world.seed_invoice(dec!(75.00)).await;

        let pending = world
            .sweep()
            .pending_invoices(&SweepScope::Global)
            .await
            .unwrap();

        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, open_id);
    }
}

mod balance_properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Any accepted sequence of payments keeps paid + remaining == total
        /// and never drives the balance past the total.
        #[test]
        fn prop_balance_invariant_holds_under_payment_sequences(
            cents in prop::collection::vec(1u64..20_000, 1..8),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            rt.block_on(async {
                let world = World::new().await;
                let total = dec!(400.00);
                let invoice_id = world.seed_invoice(total).await;
                let ledger = world.ledger();

                for amount_cents in cents {
                    let amount = Decimal::new(amount_cents as i64, 2);
                    let _ = ledger.process_payment(invoice_id, pay(amount), op()).await;

                    let invoice =
                        world.store.get_invoice(invoice_id).await.unwrap().unwrap();
                    assert_balance_invariant(&invoice);
                    prop_assert!(
                        invoice.paid_amount <= Money::new(total + dec!(0.01))
                    );
                }
                Ok(())
            })?;
        }
    }
}

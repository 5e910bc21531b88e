//! Custom Test Assertions
//!
//! Specialized assertion helpers for settlement types that give more
//! meaningful error messages than standard assertions.

use core_kernel::{Money, SETTLEMENT_TOLERANCE};
use domain_settlement::{Invoice, InvoiceStatus};
use rust_decimal::Decimal;

/// Asserts that two Money values are equal within the settlement tolerance
pub fn assert_money_approx_eq(actual: &Money, expected: &Money) {
    assert!(
        actual.approx_eq(expected),
        "Money amounts differ by more than the settlement tolerance: actual={}, expected={}, tolerance={}",
        actual,
        expected,
        SETTLEMENT_TOLERANCE
    );
}

/// Asserts that two Money values differ by at most the given tolerance
pub fn assert_money_within(actual: &Money, expected: &Money, tolerance: Decimal) {
    let diff = (actual.amount() - expected.amount()).abs();
    assert!(
        diff <= tolerance,
        "Money amounts differ by more than tolerance: actual={}, expected={}, diff={}, tolerance={}",
        actual,
        expected,
        diff,
        tolerance
    );
}

/// Asserts that a Money value is positive
pub fn assert_money_positive(money: &Money) {
    assert!(money.is_positive(), "Expected positive money, got {}", money);
}

/// Asserts that a Money value is zero
pub fn assert_money_zero(money: &Money) {
    assert!(money.is_zero(), "Expected zero money, got {}", money);
}

/// Asserts the persisted balance invariant: paid + remaining == total and
/// the paid flag matches the paid status
pub fn assert_balance_invariant(invoice: &Invoice) {
    assert_eq!(
        invoice.total_amount - invoice.paid_amount,
        invoice.remaining_amount,
        "Balance invariant broken on {}: total={}, paid={}, remaining={}",
        invoice.invoice_number,
        invoice.total_amount,
        invoice.paid_amount,
        invoice.remaining_amount
    );
    assert_eq!(
        invoice.is_paid,
        invoice.status == InvoiceStatus::Paid,
        "Paid flag out of sync on {}: is_paid={}, status={}",
        invoice.invoice_number,
        invoice.is_paid,
        invoice.status
    );
}

/// Asserts that an invoice is fully settled
pub fn assert_settled(invoice: &Invoice) {
    assert_balance_invariant(invoice);
    assert_eq!(
        invoice.status,
        InvoiceStatus::Paid,
        "Expected {} to be paid, got {}",
        invoice.invoice_number,
        invoice.status
    );
    assert!(
        invoice.remaining_amount.is_settled(),
        "Expected settled balance on {}, got {}",
        invoice.invoice_number,
        invoice.remaining_amount
    );
}

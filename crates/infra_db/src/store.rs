//! PostgreSQL settlement store
//!
//! Implements the settlement store port over sqlx. Units of work map to
//! database transactions; `invoice_for_update` takes a `FOR UPDATE` row lock
//! so concurrent settlements against the same invoice serialize at the
//! balance check. Queries are bound at runtime so the workspace builds
//! without a live database.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::time::Duration;
use uuid::Uuid;

use core_kernel::{
    BranchId, CustomerId, DomainPort, InvoiceId, LedgerEntryId, Money, OperatorId, PackageId,
    PaymentId, PortError, SETTLEMENT_TOLERANCE,
};
use domain_settlement::store::{
    SettlementStore, SettlementUnitOfWork, SettlementUpdate, SweepScope,
};
use domain_settlement::{
    Invoice, InvoiceStatus, LedgerEntry, Payment, PaymentMethod, PaymentStatus,
};

use crate::error::DatabaseError;
use crate::pool::DatabaseConfig;

fn db(error: sqlx::Error) -> PortError {
    DatabaseError::from(error).into()
}

fn decode(message: impl std::fmt::Display) -> PortError {
    DatabaseError::SerializationError(message.to_string()).into()
}

fn payment_status_str(status: PaymentStatus) -> &'static str {
    match status {
        PaymentStatus::Pending => "pending",
        PaymentStatus::Completed => "completed",
        PaymentStatus::Failed => "failed",
    }
}

fn payment_status_from_str(raw: &str) -> Result<PaymentStatus, PortError> {
    match raw {
        "pending" => Ok(PaymentStatus::Pending),
        "completed" => Ok(PaymentStatus::Completed),
        "failed" => Ok(PaymentStatus::Failed),
        other => Err(decode(format!("unknown payment status '{other}'"))),
    }
}

const INVOICE_COLUMNS: &str = "id, invoice_number, customer_id, branch_id, operator_id, \
     issue_date, due_date, last_payment_date, total_amount, paid_amount, remaining_amount, \
     status, is_paid, items, created_at, updated_at";

const PAYMENT_COLUMNS: &str =
    "id, invoice_id, amount, method, status, payment_date, transaction_id, payer_details, created_at";

const TRANSACTION_COLUMNS: &str = "id, description, status, transaction_type, entity_type, \
     entity_id, reference_id, amount, payment_method, metadata, created_at";

#[derive(FromRow)]
struct InvoiceRow {
    id: Uuid,
    invoice_number: String,
    customer_id: String,
    branch_id: Option<String>,
    operator_id: String,
    issue_date: NaiveDate,
    due_date: NaiveDate,
    last_payment_date: Option<DateTime<Utc>>,
    total_amount: Decimal,
    paid_amount: Decimal,
    remaining_amount: Decimal,
    status: String,
    is_paid: bool,
    items: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl InvoiceRow {
    fn into_invoice(self) -> Result<Invoice, PortError> {
        let items = serde_json::from_value(self.items).map_err(decode)?;
        Ok(Invoice {
            id: InvoiceId::from_uuid(self.id),
            invoice_number: self.invoice_number,
            customer_id: CustomerId::from(self.customer_id),
            branch_id: self.branch_id.map(BranchId::from),
            operator_id: OperatorId::from(self.operator_id),
            issue_date: self.issue_date,
            due_date: self.due_date,
            last_payment_date: self.last_payment_date,
            total_amount: Money::from(self.total_amount),
            paid_amount: Money::from(self.paid_amount),
            remaining_amount: Money::from(self.remaining_amount),
            status: InvoiceStatus::from_request(&self.status),
            is_paid: self.is_paid,
            items,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct PaymentRow {
    id: Uuid,
    invoice_id: Uuid,
    amount: Decimal,
    method: String,
    status: String,
    payment_date: DateTime<Utc>,
    transaction_id: Option<Uuid>,
    payer_details: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl PaymentRow {
    fn into_payment(self) -> Result<Payment, PortError> {
        let payer_details = serde_json::from_value(self.payer_details).map_err(decode)?;
        Ok(Payment {
            id: PaymentId::from_uuid(self.id),
            invoice_id: InvoiceId::from_uuid(self.invoice_id),
            amount: Money::from(self.amount),
            method: PaymentMethod::from_label(&self.method),
            status: payment_status_from_str(&self.status)?,
            payment_date: self.payment_date,
            transaction_id: self.transaction_id.map(LedgerEntryId::from_uuid),
            payer_details,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct TransactionRow {
    id: Uuid,
    description: String,
    status: String,
    transaction_type: String,
    entity_type: String,
    entity_id: Uuid,
    reference_id: Uuid,
    amount: Decimal,
    payment_method: String,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TransactionRow {
    fn into_entry(self) -> Result<LedgerEntry, PortError> {
        let metadata = serde_json::from_value(self.metadata).map_err(decode)?;
        Ok(LedgerEntry {
            id: LedgerEntryId::from_uuid(self.id),
            description: self.description,
            status: self.status,
            transaction_type: self.transaction_type,
            entity_type: self.entity_type,
            entity_id: InvoiceId::from_uuid(self.entity_id),
            reference_id: PaymentId::from_uuid(self.reference_id),
            amount: Money::from(self.amount),
            payment_method: PaymentMethod::from_label(&self.payment_method),
            metadata,
            created_at: self.created_at,
        })
    }
}

/// PostgreSQL adapter for the settlement store port
#[derive(Debug, Clone)]
pub struct PgSettlementStore {
    pool: PgPool,
    transaction_timeout: Duration,
}

impl PgSettlementStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            transaction_timeout: Duration::from_secs(5),
        }
    }

    /// Applies pool configuration (currently the transaction timeout)
    pub fn with_config(pool: PgPool, config: &DatabaseConfig) -> Self {
        Self {
            pool,
            transaction_timeout: config.transaction_timeout,
        }
    }

    async fn fetch_invoices(&self, sql: &str, scope: &SweepScope) -> Result<Vec<Invoice>, PortError> {
        let query = sqlx::query_as::<_, InvoiceRow>(sql);
        let rows = match scope {
            SweepScope::Global => query.fetch_all(&self.pool).await.map_err(db)?,
            SweepScope::Customer(customer_id) => query
                .bind(customer_id.as_str())
                .fetch_all(&self.pool)
                .await
                .map_err(db)?,
        };
        rows.into_iter().map(InvoiceRow::into_invoice).collect()
    }
}

impl DomainPort for PgSettlementStore {}

struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl SettlementStore for PgSettlementStore {
    async fn begin(&self) -> Result<Box<dyn SettlementUnitOfWork>, PortError> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        // Bound how long a unit of work can hold the invoice row lock.
        let timeout_ms = self.transaction_timeout.as_millis();
        sqlx::query(&format!("SET LOCAL statement_timeout = {timeout_ms}"))
            .execute(&mut *tx)
            .await
            .map_err(db)?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn get_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>, PortError> {
        let row = sqlx::query_as::<_, InvoiceRow>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1"
        ))
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        row.map(InvoiceRow::into_invoice).transpose()
    }

    async fn invoice_number_exists(&self, number: &str) -> Result<bool, PortError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM invoices WHERE invoice_number = $1)")
                .bind(number)
                .fetch_one(&self.pool)
                .await
                .map_err(db)?;
        Ok(exists)
    }

    async fn payments_for_invoice(&self, id: InvoiceId) -> Result<Vec<Payment>, PortError> {
        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE invoice_id = $1 ORDER BY created_at"
        ))
        .bind(*id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        rows.into_iter().map(PaymentRow::into_payment).collect()
    }

    async fn ledger_entries_for_invoice(
        &self,
        id: InvoiceId,
    ) -> Result<Vec<LedgerEntry>, PortError> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE entity_type = 'invoice' AND entity_id = $1 ORDER BY created_at"
        ))
        .bind(*id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        rows.into_iter().map(TransactionRow::into_entry).collect()
    }

    async fn find_partial_invoices(&self, scope: &SweepScope) -> Result<Vec<Invoice>, PortError> {
        let sql = match scope {
            SweepScope::Global => format!(
                "SELECT {INVOICE_COLUMNS} FROM invoices WHERE status = 'partial'"
            ),
            SweepScope::Customer(_) => format!(
                "SELECT {INVOICE_COLUMNS} FROM invoices \
                 WHERE status = 'partial' AND customer_id = $1"
            ),
        };
        self.fetch_invoices(&sql, scope).await
    }

    async fn find_open_invoices(&self, scope: &SweepScope) -> Result<Vec<Invoice>, PortError> {
        let sql = match scope {
            SweepScope::Global => format!(
                "SELECT {INVOICE_COLUMNS} FROM invoices \
                 WHERE status IN ('sent', 'partial', 'overdue') ORDER BY created_at"
            ),
            SweepScope::Customer(_) => format!(
                "SELECT {INVOICE_COLUMNS} FROM invoices \
                 WHERE status IN ('sent', 'partial', 'overdue') AND customer_id = $1 \
                 ORDER BY created_at"
            ),
        };
        self.fetch_invoices(&sql, scope).await
    }

    async fn linked_packages(&self, id: InvoiceId) -> Result<Vec<PackageId>, PortError> {
        let package_ids: Vec<String> = sqlx::query_scalar(
            "SELECT package_id FROM invoice_packages WHERE invoice_id = $1 ORDER BY linked_at",
        )
        .bind(*id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        Ok(package_ids.into_iter().map(PackageId::from).collect())
    }
}

#[async_trait]
impl SettlementUnitOfWork for PgUnitOfWork {
    async fn invoice_for_update(&mut self, id: InvoiceId) -> Result<Option<Invoice>, PortError> {
        let row = sqlx::query_as::<_, InvoiceRow>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1 FOR UPDATE"
        ))
        .bind(*id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db)?;
        row.map(InvoiceRow::into_invoice).transpose()
    }

    async fn completed_payment_total(&mut self, id: InvoiceId) -> Result<Money, PortError> {
        let total: Decimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM payments \
             WHERE invoice_id = $1 AND status = 'completed'",
        )
        .bind(*id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db)?;
        Ok(Money::from(total))
    }

    async fn insert_invoice(&mut self, invoice: &Invoice) -> Result<(), PortError> {
        let items = serde_json::to_value(&invoice.items).map_err(decode)?;
        sqlx::query(
            "INSERT INTO invoices (id, invoice_number, customer_id, branch_id, operator_id, \
             issue_date, due_date, last_payment_date, total_amount, paid_amount, \
             remaining_amount, status, is_paid, items, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(*invoice.id.as_uuid())
        .bind(&invoice.invoice_number)
        .bind(invoice.customer_id.as_str())
        .bind(invoice.branch_id.as_ref().map(|b| b.as_str().to_string()))
        .bind(invoice.operator_id.as_str())
        .bind(invoice.issue_date)
        .bind(invoice.due_date)
        .bind(invoice.last_payment_date)
        .bind(invoice.total_amount.amount())
        .bind(invoice.paid_amount.amount())
        .bind(invoice.remaining_amount.amount())
        .bind(invoice.status.as_str())
        .bind(invoice.is_paid)
        .bind(items)
        .bind(invoice.created_at)
        .bind(invoice.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), PortError> {
        let payer_details = serde_json::to_value(&payment.payer_details).map_err(decode)?;
        sqlx::query(
            "INSERT INTO payments (id, invoice_id, amount, method, status, payment_date, \
             transaction_id, payer_details, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(*payment.id.as_uuid())
        .bind(*payment.invoice_id.as_uuid())
        .bind(payment.amount.amount())
        .bind(payment.method.as_str())
        .bind(payment_status_str(payment.status))
        .bind(payment.payment_date)
        .bind(payment.transaction_id.map(|t| *t.as_uuid()))
        .bind(payer_details)
        .bind(payment.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<(), PortError> {
        let metadata = serde_json::to_value(&entry.metadata).map_err(decode)?;
        sqlx::query(
            "INSERT INTO transactions (id, description, status, transaction_type, entity_type, \
             entity_id, reference_id, amount, payment_method, metadata, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(*entry.id.as_uuid())
        .bind(&entry.description)
        .bind(&entry.status)
        .bind(&entry.transaction_type)
        .bind(&entry.entity_type)
        .bind(*entry.entity_id.as_uuid())
        .bind(*entry.reference_id.as_uuid())
        .bind(entry.amount.amount())
        .bind(entry.payment_method.as_str())
        .bind(metadata)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn attach_payment_transaction(
        &mut self,
        payment_id: PaymentId,
        entry_id: LedgerEntryId,
    ) -> Result<(), PortError> {
        let result = sqlx::query("UPDATE payments SET transaction_id = $2 WHERE id = $1")
            .bind(*payment_id.as_uuid())
            .bind(*entry_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(db)?;
        if result.rows_affected() == 0 {
            return Err(PortError::not_found("Payment", payment_id));
        }
        Ok(())
    }

    async fn apply_settlement(
        &mut self,
        invoice_id: InvoiceId,
        update: SettlementUpdate,
    ) -> Result<(), PortError> {
        let result = sqlx::query(
            "UPDATE invoices SET status = $2, is_paid = $3, paid_amount = $4, \
             remaining_amount = $5, last_payment_date = $6, updated_at = NOW() WHERE id = $1",
        )
        .bind(*invoice_id.as_uuid())
        .bind(update.status.as_str())
        .bind(update.is_paid)
        .bind(update.paid_amount.amount())
        .bind(update.remaining_amount.amount())
        .bind(update.last_payment_date)
        .execute(&mut *self.tx)
        .await
        .map_err(db)?;
        if result.rows_affected() == 0 {
            return Err(PortError::not_found("Invoice", invoice_id));
        }
        Ok(())
    }

    async fn set_invoice_status(
        &mut self,
        invoice_id: InvoiceId,
        status: InvoiceStatus,
        is_paid: bool,
    ) -> Result<(), PortError> {
        let result = sqlx::query(
            "UPDATE invoices SET status = $2, is_paid = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(*invoice_id.as_uuid())
        .bind(status.as_str())
        .bind(is_paid)
        .execute(&mut *self.tx)
        .await
        .map_err(db)?;
        if result.rows_affected() == 0 {
            return Err(PortError::not_found("Invoice", invoice_id));
        }
        Ok(())
    }

    async fn insert_package_link(
        &mut self,
        invoice_id: InvoiceId,
        package_id: &PackageId,
    ) -> Result<bool, PortError> {
        let result = sqlx::query(
            "INSERT INTO invoice_packages (invoice_id, package_id, linked_at) \
             VALUES ($1, $2, NOW()) ON CONFLICT (invoice_id, package_id) DO NOTHING",
        )
        .bind(*invoice_id.as_uuid())
        .bind(package_id.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(db)?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_paid(&mut self, invoice_ids: &[InvoiceId]) -> Result<u64, PortError> {
        let ids: Vec<Uuid> = invoice_ids.iter().map(|id| *id.as_uuid()).collect();
        let result = sqlx::query(
            "UPDATE invoices SET status = 'paid', is_paid = TRUE, updated_at = NOW() \
             WHERE id = ANY($1) AND status = 'partial' AND remaining_amount <= $2",
        )
        .bind(&ids)
        .bind(SETTLEMENT_TOLERANCE)
        .execute(&mut *self.tx)
        .await
        .map_err(db)?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), PortError> {
        self.tx.commit().await.map_err(db)
    }
}

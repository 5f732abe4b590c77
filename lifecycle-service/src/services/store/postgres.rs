//! Postgres storage backend for lifecycle-service.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::{
    compute_totals, Account, CreateInvoice, Invoice, InvoiceAggregate, InvoiceEvent, InvoiceItem,
    ListInvoicesFilter, NewEvent, NewInvoiceItem, UpdateInvoice,
};
use crate::services::metrics::DB_QUERY_DURATION;

use super::{ExpectedState, InvoicePatch, InvoiceStore, StoreError};

const INVOICE_COLUMNS: &str = "invoice_id, account_id, number, status, deleted, client_name, client_email, \
     currency, subtotal, discount, tax1_name, tax1_amount, tax2_name, tax2_amount, total, \
     payment_ref, refund_ref, paid_via, notes, created_utc, sent_utc, paid_utc, refunded_utc";

const ITEM_COLUMNS: &str =
    "item_id, invoice_id, account_id, description, amount, quantity, sort_order, created_utc";

const EVENT_COLUMNS: &str =
    "event_id, invoice_id, account_id, event_type, actor_id, reference, notes, created_utc";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "lifecycle-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, StoreError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Database(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn fetch_items(
        &self,
        executor: impl sqlx::PgExecutor<'_>,
        account_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<InvoiceItem>, StoreError> {
        sqlx::query_as::<_, InvoiceItem>(&format!(
            "SELECT {ITEM_COLUMNS} FROM invoice_items \
             WHERE account_id = $1 AND invoice_id = $2 \
             ORDER BY sort_order, created_utc"
        ))
        .bind(account_id)
        .bind(invoice_id)
        .fetch_all(executor)
        .await
        .map_err(|e| StoreError::Database(anyhow::anyhow!("Failed to get invoice items: {}", e)))
    }
}

#[async_trait]
impl InvoiceStore for PostgresStore {
    #[instrument(skip(self))]
    async fn create_account(
        &self,
        name: &str,
        processor_account_id: Option<&str>,
    ) -> Result<Account, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_account"])
            .start_timer();

        let account = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (account_id, name, processor_account_id, payouts_enabled)
            VALUES ($1, $2, $3, FALSE)
            RETURNING account_id, name, processor_account_id, payouts_enabled, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(processor_account_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                StoreError::Conflict(format!(
                    "Account already registered for processor id {:?}",
                    processor_account_id
                ))
            }
            _ => StoreError::Database(anyhow::anyhow!("Failed to create account: {}", e)),
        })?;

        timer.observe_duration();

        info!(account_id = %account.account_id, "Account created");

        Ok(account)
    }

    #[instrument(skip(self), fields(account_id = %account_id))]
    async fn get_account(&self, account_id: Uuid) -> Result<Option<Account>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_account"])
            .start_timer();

        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT account_id, name, processor_account_id, payouts_enabled, created_utc
            FROM accounts
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(anyhow::anyhow!("Failed to get account: {}", e)))?;

        timer.observe_duration();

        Ok(account)
    }

    #[instrument(skip(self))]
    async fn set_account_payout_status(
        &self,
        processor_account_id: &str,
        payouts_enabled: bool,
    ) -> Result<bool, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_account_payout_status"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET payouts_enabled = $2
            WHERE processor_account_id = $1
            "#,
        )
        .bind(processor_account_id)
        .bind(payouts_enabled)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            StoreError::Database(anyhow::anyhow!("Failed to update payout status: {}", e))
        })?;

        timer.observe_duration();

        let matched = result.rows_affected() > 0;
        if matched {
            info!(
                processor_account_id = %processor_account_id,
                payouts_enabled = payouts_enabled,
                "Account payout status updated"
            );
        }

        Ok(matched)
    }

    #[instrument(skip(self, input, items), fields(account_id = %input.account_id))]
    async fn create_invoice(
        &self,
        input: &CreateInvoice,
        items: &[NewInvoiceItem],
    ) -> Result<InvoiceAggregate, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_invoice"])
            .start_timer();

        let totals = compute_totals(items, input.discount, input.tax1_amount, input.tax2_amount)
            .map_err(|e| StoreError::Invalid(e.to_string()))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(anyhow::anyhow!("Failed to begin: {}", e)))?;

        let invoice_id = Uuid::new_v4();
        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "INSERT INTO invoices (
                invoice_id, account_id, number, status, deleted, client_name, client_email,
                currency, subtotal, discount, tax1_name, tax1_amount, tax2_name, tax2_amount, total,
                notes
            )
            VALUES ($1, $2, next_invoice_number($2), 'draft', FALSE, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {INVOICE_COLUMNS}"
        ))
        .bind(invoice_id)
        .bind(input.account_id)
        .bind(&input.client_name)
        .bind(&input.client_email)
        .bind(&input.currency)
        .bind(totals.subtotal)
        .bind(input.discount)
        .bind(&input.tax1_name)
        .bind(input.tax1_amount)
        .bind(&input.tax2_name)
        .bind(input.tax2_amount)
        .bind(totals.total)
        .bind(&input.notes)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(anyhow::anyhow!("Failed to create invoice: {}", e)))?;

        let mut created_items = Vec::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            let created = sqlx::query_as::<_, InvoiceItem>(&format!(
                "INSERT INTO invoice_items (item_id, invoice_id, account_id, description, amount, quantity, sort_order)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 RETURNING {ITEM_COLUMNS}"
            ))
            .bind(Uuid::new_v4())
            .bind(invoice_id)
            .bind(input.account_id)
            .bind(&item.description)
            .bind(item.amount)
            .bind(item.quantity)
            .bind(idx as i32)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                StoreError::Database(anyhow::anyhow!("Failed to create invoice item: {}", e))
            })?;
            created_items.push(created);
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(anyhow::anyhow!("Failed to commit: {}", e)))?;

        timer.observe_duration();

        info!(invoice_id = %invoice.invoice_id, number = %invoice.number, "Draft invoice created");

        Ok(InvoiceAggregate {
            invoice,
            items: created_items,
        })
    }

    #[instrument(skip(self), fields(account_id = %account_id, invoice_id = %invoice_id))]
    async fn get_invoice(
        &self,
        account_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<InvoiceAggregate>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices \
             WHERE account_id = $1 AND invoice_id = $2"
        ))
        .bind(account_id)
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

        let aggregate = match invoice {
            Some(invoice) => {
                let items = self.fetch_items(&self.pool, account_id, invoice_id).await?;
                Some(InvoiceAggregate { invoice, items })
            }
            None => None,
        };

        timer.observe_duration();

        Ok(aggregate)
    }

    #[instrument(skip(self, filter), fields(account_id = %account_id))]
    async fn list_invoices(
        &self,
        account_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;
        let status_str = filter.status.map(|s| s.as_str().to_string());

        let invoices = if let Some(cursor) = filter.page_token {
            sqlx::query_as::<_, Invoice>(&format!(
                "SELECT {INVOICE_COLUMNS} FROM invoices \
                 WHERE account_id = $1 \
                   AND ($2::varchar IS NULL OR status = $2) \
                   AND ($3::bool = TRUE OR deleted = FALSE) \
                   AND invoice_id > $4 \
                 ORDER BY invoice_id \
                 LIMIT $5"
            ))
            .bind(account_id)
            .bind(&status_str)
            .bind(filter.include_deleted)
            .bind(cursor)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, Invoice>(&format!(
                "SELECT {INVOICE_COLUMNS} FROM invoices \
                 WHERE account_id = $1 \
                   AND ($2::varchar IS NULL OR status = $2) \
                   AND ($3::bool = TRUE OR deleted = FALSE) \
                 ORDER BY invoice_id \
                 LIMIT $4"
            ))
            .bind(account_id)
            .bind(&status_str)
            .bind(filter.include_deleted)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| StoreError::Database(anyhow::anyhow!("Failed to list invoices: {}", e)))?;

        timer.observe_duration();

        Ok(invoices)
    }

    #[instrument(skip(self, update, items), fields(account_id = %account_id, invoice_id = %invoice_id))]
    async fn replace_items(
        &self,
        account_id: Uuid,
        invoice_id: Uuid,
        update: &UpdateInvoice,
        items: &[NewInvoiceItem],
    ) -> Result<Option<InvoiceAggregate>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["replace_items"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(anyhow::anyhow!("Failed to begin: {}", e)))?;

        // Row lock so the recomputation below cannot interleave with a
        // concurrent transition on the same invoice.
        let existing = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices \
             WHERE account_id = $1 AND invoice_id = $2 AND deleted = FALSE \
             FOR UPDATE"
        ))
        .bind(account_id)
        .bind(invoice_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(anyhow::anyhow!("Failed to lock invoice: {}", e)))?;

        let Some(existing) = existing else {
            return Ok(None);
        };

        let discount = update.discount.unwrap_or(existing.discount);
        let tax1_amount = update.tax1_amount.unwrap_or(existing.tax1_amount);
        let tax2_amount = update.tax2_amount.unwrap_or(existing.tax2_amount);
        let totals = compute_totals(items, discount, tax1_amount, tax2_amount)
            .map_err(|e| StoreError::Invalid(e.to_string()))?;

        sqlx::query("DELETE FROM invoice_items WHERE account_id = $1 AND invoice_id = $2")
            .bind(account_id)
            .bind(invoice_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                StoreError::Database(anyhow::anyhow!("Failed to clear invoice items: {}", e))
            })?;

        let mut created_items = Vec::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            let created = sqlx::query_as::<_, InvoiceItem>(&format!(
                "INSERT INTO invoice_items (item_id, invoice_id, account_id, description, amount, quantity, sort_order)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 RETURNING {ITEM_COLUMNS}"
            ))
            .bind(Uuid::new_v4())
            .bind(invoice_id)
            .bind(account_id)
            .bind(&item.description)
            .bind(item.amount)
            .bind(item.quantity)
            .bind(idx as i32)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                StoreError::Database(anyhow::anyhow!("Failed to create invoice item: {}", e))
            })?;
            created_items.push(created);
        }

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "UPDATE invoices
             SET client_name = COALESCE($3, client_name),
                 client_email = COALESCE($4, client_email),
                 discount = $5,
                 tax1_name = COALESCE($6, tax1_name),
                 tax1_amount = $7,
                 tax2_name = COALESCE($8, tax2_name),
                 tax2_amount = $9,
                 subtotal = $10,
                 total = $11,
                 notes = COALESCE($12, notes)
             WHERE account_id = $1 AND invoice_id = $2
             RETURNING {INVOICE_COLUMNS}"
        ))
        .bind(account_id)
        .bind(invoice_id)
        .bind(&update.client_name)
        .bind(&update.client_email)
        .bind(discount)
        .bind(&update.tax1_name)
        .bind(tax1_amount)
        .bind(&update.tax2_name)
        .bind(tax2_amount)
        .bind(totals.subtotal)
        .bind(totals.total)
        .bind(&update.notes)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(anyhow::anyhow!("Failed to update invoice: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(anyhow::anyhow!("Failed to commit: {}", e)))?;

        timer.observe_duration();

        info!(invoice_id = %invoice.invoice_id, "Invoice items replaced");

        Ok(Some(InvoiceAggregate {
            invoice,
            items: created_items,
        }))
    }

    #[instrument(skip(self, expected, patch, event), fields(account_id = %account_id, invoice_id = %invoice_id))]
    async fn apply_transition(
        &self,
        account_id: Uuid,
        invoice_id: Uuid,
        expected: &ExpectedState,
        patch: &InvoicePatch,
        event: Option<&NewEvent>,
    ) -> Result<Option<(InvoiceAggregate, Option<InvoiceEvent>)>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["apply_transition"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(anyhow::anyhow!("Failed to begin: {}", e)))?;

        let status_str = patch.status.map(|s| s.as_str().to_string());
        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "UPDATE invoices
             SET status = COALESCE($5, status),
                 deleted = COALESCE($6, deleted),
                 sent_utc = COALESCE($7, sent_utc),
                 paid_utc = COALESCE($8, paid_utc),
                 refunded_utc = COALESCE($9, refunded_utc),
                 payment_ref = COALESCE($10, payment_ref),
                 refund_ref = COALESCE($11, refund_ref),
                 paid_via = COALESCE($12, paid_via)
             WHERE account_id = $1 AND invoice_id = $2 AND status = $3 AND deleted = $4
             RETURNING {INVOICE_COLUMNS}"
        ))
        .bind(account_id)
        .bind(invoice_id)
        .bind(expected.status.as_str())
        .bind(expected.deleted)
        .bind(&status_str)
        .bind(patch.deleted)
        .bind(patch.sent_utc)
        .bind(patch.paid_utc)
        .bind(patch.refunded_utc)
        .bind(&patch.payment_ref)
        .bind(&patch.refund_ref)
        .bind(&patch.paid_via)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(anyhow::anyhow!("Failed to apply transition: {}", e)))?;

        // No row means the expected state no longer holds: a concurrent
        // transition committed first. Nothing is written.
        let Some(invoice) = invoice else {
            return Ok(None);
        };

        let created_event = match event {
            Some(event) => Some(
                sqlx::query_as::<_, InvoiceEvent>(&format!(
                    "INSERT INTO invoice_events (event_id, invoice_id, account_id, event_type, actor_id, reference, notes)
                     VALUES ($1, $2, $3, $4, $5, $6, $7)
                     RETURNING {EVENT_COLUMNS}"
                ))
                .bind(Uuid::new_v4())
                .bind(invoice_id)
                .bind(account_id)
                .bind(event.event_type.as_str())
                .bind(event.actor_id)
                .bind(&event.reference)
                .bind(&event.notes)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| {
                    StoreError::Database(anyhow::anyhow!("Failed to append event: {}", e))
                })?,
            ),
            None => None,
        };

        let items = self.fetch_items(&mut *tx, account_id, invoice_id).await?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(anyhow::anyhow!("Failed to commit: {}", e)))?;

        timer.observe_duration();

        Ok(Some((InvoiceAggregate { invoice, items }, created_event)))
    }

    #[instrument(skip(self, event), fields(account_id = %account_id, invoice_id = %invoice_id))]
    async fn append_event(
        &self,
        account_id: Uuid,
        invoice_id: Uuid,
        event: &NewEvent,
    ) -> Result<InvoiceEvent, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["append_event"])
            .start_timer();

        let created = sqlx::query_as::<_, InvoiceEvent>(&format!(
            "INSERT INTO invoice_events (event_id, invoice_id, account_id, event_type, actor_id, reference, notes)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {EVENT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(invoice_id)
        .bind(account_id)
        .bind(event.event_type.as_str())
        .bind(event.actor_id)
        .bind(&event.reference)
        .bind(&event.notes)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Database(anyhow::anyhow!("Failed to append event: {}", e)))?;

        timer.observe_duration();

        Ok(created)
    }

    #[instrument(skip(self), fields(account_id = %account_id, invoice_id = %invoice_id))]
    async fn list_events(
        &self,
        account_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<InvoiceEvent>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_events"])
            .start_timer();

        let events = sqlx::query_as::<_, InvoiceEvent>(&format!(
            "SELECT {EVENT_COLUMNS} FROM invoice_events \
             WHERE account_id = $1 AND invoice_id = $2 \
             ORDER BY created_utc, event_id"
        ))
        .bind(account_id)
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(anyhow::anyhow!("Failed to list events: {}", e)))?;

        timer.observe_duration();

        Ok(events)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }
}

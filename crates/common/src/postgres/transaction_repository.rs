use crate::domain::{
    ensure_within_fund, CreateTransactionRepoInput, DomainError, DomainResult, Transaction,
    TransactionRepository, TransactionStatus, UpdateTransactionRepoInput,
};
use crate::postgres::PostgresClient;
use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::Transaction as PgTransaction;
use tokio_postgres::Row;
use tracing::{debug, info, instrument};

const TRANSACTION_COLUMNS: &str = "id, fund_id, amount_cents, recipient, date, status";

fn transaction_from_row(row: &Row) -> DomainResult<Transaction> {
    let status: String = row.get(5);
    Ok(Transaction {
        id: row.get(0),
        fund_id: row.get(1),
        amount_cents: row.get(2),
        recipient: row.get(3),
        date: row.get(4),
        status: status.parse::<TransactionStatus>()?,
    })
}

/// Lock the fund row for the rest of the transaction and return its amount
async fn lock_fund_amount(tx: &PgTransaction<'_>, fund_id: i64) -> DomainResult<i64> {
    let row = tx
        .query_opt(
            "SELECT amount_cents FROM funds WHERE id = $1 FOR UPDATE",
            &[&fund_id],
        )
        .await
        .map_err(|e| DomainError::RepositoryError(e.into()))?;

    row.map(|r| r.get(0))
        .ok_or_else(|| DomainError::FundNotFound(fund_id.to_string()))
}

#[derive(Clone)]
pub struct PostgresTransactionRepository {
    client: PostgresClient,
}

impl PostgresTransactionRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TransactionRepository for PostgresTransactionRepository {
    #[instrument(skip(self, input), fields(fund_id = input.fund_id))]
    async fn create_transaction(
        &self,
        input: CreateTransactionRepoInput,
    ) -> DomainResult<Transaction> {
        let mut conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        let fund_amount_cents = lock_fund_amount(&tx, input.fund_id).await?;
        ensure_within_fund(input.amount_cents, input.fund_id, fund_amount_cents)?;

        let row = tx
            .query_one(
                &format!(
                    "INSERT INTO transactions (fund_id, amount_cents, recipient, date, status)
                     VALUES ($1, $2, $3, $4, $5)
                     RETURNING {}",
                    TRANSACTION_COLUMNS
                ),
                &[
                    &input.fund_id,
                    &input.amount_cents,
                    &input.recipient,
                    &Utc::now(),
                    &input.status.as_str(),
                ],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;
        let transaction = transaction_from_row(&row)?;

        tx.commit()
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        info!(transaction_id = transaction.id, "transaction created in database");
        Ok(transaction)
    }

    async fn get_transaction(&self, id: i64) -> DomainResult<Option<Transaction>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let row = conn
            .query_opt(
                &format!(
                    "SELECT {} FROM transactions WHERE id = $1",
                    TRANSACTION_COLUMNS
                ),
                &[&id],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        row.as_ref().map(transaction_from_row).transpose()
    }

    #[instrument(skip(self, input), fields(transaction_id = input.id))]
    async fn update_transaction(
        &self,
        input: UpdateTransactionRepoInput,
    ) -> DomainResult<Transaction> {
        let mut conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        let current = tx
            .query_opt(
                &format!(
                    "SELECT {} FROM transactions WHERE id = $1 FOR UPDATE",
                    TRANSACTION_COLUMNS
                ),
                &[&input.id],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?
            .ok_or_else(|| DomainError::TransactionNotFound(input.id.to_string()))?;
        let current = transaction_from_row(&current)?;

        let fund_id = input.fund_id.unwrap_or(current.fund_id);
        let amount_cents = input.amount_cents.unwrap_or(current.amount_cents);
        let recipient = input.recipient.unwrap_or(current.recipient);
        let status = input.status.unwrap_or(current.status);

        let fund_amount_cents = lock_fund_amount(&tx, fund_id).await?;
        ensure_within_fund(amount_cents, fund_id, fund_amount_cents)?;

        let row = tx
            .query_one(
                &format!(
                    "UPDATE transactions
                     SET fund_id = $2, amount_cents = $3, recipient = $4, status = $5
                     WHERE id = $1
                     RETURNING {}",
                    TRANSACTION_COLUMNS
                ),
                &[
                    &input.id,
                    &fund_id,
                    &amount_cents,
                    &recipient,
                    &status.as_str(),
                ],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;
        let transaction = transaction_from_row(&row)?;

        tx.commit()
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        debug!(transaction_id = transaction.id, "transaction updated in database");
        Ok(transaction)
    }

    #[instrument(skip(self))]
    async fn delete_transaction(&self, id: i64) -> DomainResult<()> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let deleted = conn
            .execute("DELETE FROM transactions WHERE id = $1", &[&id])
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        if deleted == 0 {
            return Err(DomainError::TransactionNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn list_transactions(&self) -> DomainResult<Vec<Transaction>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM transactions ORDER BY id",
                    TRANSACTION_COLUMNS
                ),
                &[],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        rows.iter().map(transaction_from_row).collect()
    }
}

use crate::domain::{
    CreateFundRepoInput, DomainError, DomainResult, Fund, FundRepository, UpdateFundRepoInput,
};
use crate::postgres::PostgresClient;
use async_trait::async_trait;
use chrono::Utc;
use tokio_postgres::Row;
use tracing::{info, instrument};

const FUND_COLUMNS: &str = "id, amount_cents, source, description, allocated_at";

fn fund_from_row(row: &Row) -> Fund {
    Fund {
        id: row.get(0),
        amount_cents: row.get(1),
        source: row.get(2),
        description: row.get(3),
        allocated_at: row.get(4),
    }
}

#[derive(Clone)]
pub struct PostgresFundRepository {
    client: PostgresClient,
}

impl PostgresFundRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FundRepository for PostgresFundRepository {
    #[instrument(skip(self, input), fields(source = %input.source))]
    async fn create_fund(&self, input: CreateFundRepoInput) -> DomainResult<Fund> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO funds (amount_cents, source, description, allocated_at)
                     VALUES ($1, $2, $3, $4)
                     RETURNING {}",
                    FUND_COLUMNS
                ),
                &[
                    &input.amount_cents,
                    &input.source,
                    &input.description,
                    &Utc::now(),
                ],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        let fund = fund_from_row(&row);
        info!(fund_id = fund.id, "fund created in database");
        Ok(fund)
    }

    async fn get_fund(&self, id: i64) -> DomainResult<Option<Fund>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let row = conn
            .query_opt(
                &format!("SELECT {} FROM funds WHERE id = $1", FUND_COLUMNS),
                &[&id],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        Ok(row.as_ref().map(fund_from_row))
    }

    #[instrument(skip(self, input), fields(fund_id = input.id))]
    async fn update_fund(&self, input: UpdateFundRepoInput) -> DomainResult<Fund> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let row = conn
            .query_opt(
                &format!(
                    "UPDATE funds
                     SET amount_cents = COALESCE($2, amount_cents),
                         source = COALESCE($3, source),
                         description = COALESCE($4, description)
                     WHERE id = $1
                     RETURNING {}",
                    FUND_COLUMNS
                ),
                &[
                    &input.id,
                    &input.amount_cents,
                    &input.source,
                    &input.description,
                ],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        row.as_ref()
            .map(fund_from_row)
            .ok_or_else(|| DomainError::FundNotFound(input.id.to_string()))
    }

    /// Transactions go with the fund through `ON DELETE CASCADE`
    #[instrument(skip(self))]
    async fn delete_fund(&self, id: i64) -> DomainResult<()> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let deleted = conn
            .execute("DELETE FROM funds WHERE id = $1", &[&id])
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        if deleted == 0 {
            return Err(DomainError::FundNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn list_funds(&self) -> DomainResult<Vec<Fund>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let rows = conn
            .query(
                &format!("SELECT {} FROM funds ORDER BY id", FUND_COLUMNS),
                &[],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        Ok(rows.iter().map(fund_from_row).collect())
    }
}

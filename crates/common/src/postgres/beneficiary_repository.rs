use crate::domain::{
    Beneficiary, BeneficiaryRepository, CreateBeneficiaryRepoInput, DomainError, DomainResult,
    UpdateBeneficiaryRepoInput,
};
use crate::postgres::PostgresClient;
use async_trait::async_trait;
use chrono::Utc;
use tokio_postgres::Row;
use tracing::{debug, info, instrument};

const BENEFICIARY_COLUMNS: &str = "id, name, age, location, created_at, updated_at";

fn beneficiary_from_row(row: &Row) -> Beneficiary {
    Beneficiary {
        id: row.get(0),
        name: row.get(1),
        age: row.get(2),
        location: row.get(3),
        created_at: row.get(4),
        updated_at: row.get(5),
    }
}

#[derive(Clone)]
pub struct PostgresBeneficiaryRepository {
    client: PostgresClient,
}

impl PostgresBeneficiaryRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BeneficiaryRepository for PostgresBeneficiaryRepository {
    #[instrument(skip(self, input), fields(name = %input.name))]
    async fn create_beneficiary(
        &self,
        input: CreateBeneficiaryRepoInput,
    ) -> DomainResult<Beneficiary> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let now = Utc::now();
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO beneficiaries (name, age, location, created_at, updated_at)
                     VALUES ($1, $2, $3, $4, $4)
                     RETURNING {}",
                    BENEFICIARY_COLUMNS
                ),
                &[&input.name, &input.age, &input.location, &now],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        let beneficiary = beneficiary_from_row(&row);
        info!(beneficiary_id = beneficiary.id, "beneficiary created in database");
        Ok(beneficiary)
    }

    async fn get_beneficiary(&self, id: i64) -> DomainResult<Option<Beneficiary>> {
        debug!(beneficiary_id = id, "Getting beneficiary from database");

        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let row = conn
            .query_opt(
                &format!(
                    "SELECT {} FROM beneficiaries WHERE id = $1",
                    BENEFICIARY_COLUMNS
                ),
                &[&id],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        Ok(row.as_ref().map(beneficiary_from_row))
    }

    #[instrument(skip(self, input), fields(beneficiary_id = input.id))]
    async fn update_beneficiary(
        &self,
        input: UpdateBeneficiaryRepoInput,
    ) -> DomainResult<Beneficiary> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let now = Utc::now();
        let row = conn
            .query_opt(
                &format!(
                    "UPDATE beneficiaries
                     SET name = COALESCE($2, name),
                         age = COALESCE($3, age),
                         location = COALESCE($4, location),
                         updated_at = $5
                     WHERE id = $1
                     RETURNING {}",
                    BENEFICIARY_COLUMNS
                ),
                &[&input.id, &input.name, &input.age, &input.location, &now],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        row.as_ref()
            .map(beneficiary_from_row)
            .ok_or_else(|| DomainError::BeneficiaryNotFound(input.id.to_string()))
    }

    #[instrument(skip(self))]
    async fn delete_beneficiary(&self, id: i64) -> DomainResult<()> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let deleted = conn
            .execute("DELETE FROM beneficiaries WHERE id = $1", &[&id])
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        if deleted == 0 {
            return Err(DomainError::BeneficiaryNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn list_beneficiaries(&self) -> DomainResult<Vec<Beneficiary>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM beneficiaries ORDER BY id",
                    BENEFICIARY_COLUMNS
                ),
                &[],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        Ok(rows.iter().map(beneficiary_from_row).collect())
    }
}

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;
use wayfinder_core::dedup::normalize_text;
use wayfinder_core::error::AppError;
use wayfinder_core::models::{DuplicatePair, Service};

/// A service as persisted, with its storage timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredService {
    pub service: Service,
    pub first_seen_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Repository for service and duplicate-pair persistence in PostgreSQL.
///
/// The full record lives in a JSONB column; the columns beside it are
/// derived from the record and exist for lookups.
#[derive(Clone)]
pub struct ServiceRepository {
    pool: Pool<Postgres>,
}

impl ServiceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert services, replacing any stored row with the same id.
    /// `first_seen_at` survives updates. Returns the number of rows written.
    pub async fn upsert(&self, services: &[Service]) -> Result<usize, AppError> {
        if services.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let mut written = 0;
        for service in services {
            let record = serde_json::to_value(service)?;
            let categories: Vec<String> = service.categories.iter().cloned().collect();
            let suburb_key = service
                .location
                .suburb
                .as_deref()
                .or(service.location.city.as_deref())
                .map(normalize_text);

            let result = sqlx::query(
                r#"
                INSERT INTO services
                    (id, source_name, external_id, name, name_key, suburb_key, state,
                     status, categories, quality_score, record)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ON CONFLICT (id) DO UPDATE SET
                    name = EXCLUDED.name,
                    name_key = EXCLUDED.name_key,
                    suburb_key = EXCLUDED.suburb_key,
                    state = EXCLUDED.state,
                    status = EXCLUDED.status,
                    categories = EXCLUDED.categories,
                    quality_score = EXCLUDED.quality_score,
                    record = EXCLUDED.record,
                    updated_at = NOW()
                "#,
            )
            .bind(service.id)
            .bind(&service.source_name)
            .bind(&service.external_id)
            .bind(&service.name)
            .bind(normalize_text(&service.name))
            .bind(suburb_key)
            .bind(&service.location.state)
            .bind(service.status.as_str())
            .bind(&categories)
            .bind(service.quality_score())
            .bind(&record)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

            written += result.rows_affected() as usize;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tracing::debug!(count = written, "Upserted services");
        Ok(written)
    }

    /// Record duplicate pairs. A pair is stored once regardless of which
    /// side was the candidate; re-detection refreshes its confidence.
    pub async fn save_pairs(&self, pairs: &[DuplicatePair]) -> Result<usize, AppError> {
        if pairs.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let mut written = 0;
        for pair in pairs {
            let (a, b) = if pair.service_a <= pair.service_b {
                (pair.service_a, pair.service_b)
            } else {
                (pair.service_b, pair.service_a)
            };
            let matched: Vec<String> = pair.matched_fields.iter().cloned().collect();

            let result = sqlx::query(
                r#"
                INSERT INTO duplicate_pairs (service_a, service_b, confidence, matched_fields)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (service_a, service_b) DO UPDATE SET
                    confidence = EXCLUDED.confidence,
                    matched_fields = EXCLUDED.matched_fields,
                    detected_at = NOW()
                "#,
            )
            .bind(a)
            .bind(b)
            .bind(pair.confidence)
            .bind(&matched)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

            written += result.rows_affected() as usize;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(written)
    }

    /// Get a stored service by id.
    pub async fn get(&self, id: Uuid) -> Result<Option<StoredService>, AppError> {
        let row = sqlx::query_as::<_, ServiceRow>(
            r#"
            SELECT record, first_seen_at, updated_at
            FROM services
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(StoredService::try_from).transpose()
    }

    /// Stored services whose name and suburb match after normalization
    /// (case and spacing ignored), oldest first.
    pub async fn find_collisions(
        &self,
        name: &str,
        suburb: &str,
    ) -> Result<Vec<StoredService>, AppError> {
        let rows = sqlx::query_as::<_, ServiceRow>(
            r#"
            SELECT record, first_seen_at, updated_at
            FROM services
            WHERE name_key = $1 AND suburb_key = $2
            ORDER BY first_seen_at ASC
            "#,
        )
        .bind(normalize_text(name))
        .bind(normalize_text(suburb))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(StoredService::try_from).collect()
    }

    /// Duplicate pairs that involve the given service, highest confidence first.
    pub async fn pairs_for(&self, id: Uuid) -> Result<Vec<DuplicatePair>, AppError> {
        let rows = sqlx::query_as::<_, PairRow>(
            r#"
            SELECT service_a, service_b, confidence, matched_fields
            FROM duplicate_pairs
            WHERE service_a = $1 OR service_b = $1
            ORDER BY confidence DESC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn count(&self) -> Result<i64, AppError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM services")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(row.0)
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(())
    }
}

// -- Internal row types for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct ServiceRow {
    record: serde_json::Value,
    first_seen_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ServiceRow> for StoredService {
    type Error = AppError;

    fn try_from(row: ServiceRow) -> Result<Self, Self::Error> {
        Ok(StoredService {
            service: serde_json::from_value(row.record)?,
            first_seen_at: row.first_seen_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PairRow {
    service_a: Uuid,
    service_b: Uuid,
    confidence: f64,
    matched_fields: Vec<String>,
}

impl From<PairRow> for DuplicatePair {
    fn from(row: PairRow) -> Self {
        DuplicatePair {
            service_a: row.service_a,
            service_b: row.service_b,
            confidence: row.confidence,
            matched_fields: row.matched_fields.into_iter().collect(),
        }
    }
}

// -- Trait implementation --

impl wayfinder_core::traits::ServiceStore for ServiceRepository {
    async fn upsert_services(&self, services: &[Service]) -> Result<usize, AppError> {
        self.upsert(services).await
    }

    async fn save_duplicate_pairs(&self, pairs: &[DuplicatePair]) -> Result<usize, AppError> {
        self.save_pairs(pairs).await
    }
}

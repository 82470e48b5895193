//! Quotation service: one buy/sell price per organization, metal and day

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use shared::models::{MetalKind, Quotation};
use shared::types::DateRange;
use shared::validation::validate_positive_price;

use crate::error::{AppError, AppResult};

/// Quotation service for recording and resolving daily metal prices
#[derive(Clone)]
pub struct QuotationService {
    db: PgPool,
}

/// Input for recording a quotation
#[derive(Debug, Deserialize)]
pub struct RecordQuotationInput {
    pub metal: MetalKind,
    pub quote_date: NaiveDate,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
}

/// Database row for a quotation
#[derive(Debug, FromRow)]
struct QuotationRow {
    id: Uuid,
    organization_id: Uuid,
    metal: String,
    quote_date: NaiveDate,
    buy_price: Decimal,
    sell_price: Decimal,
    created_at: DateTime<Utc>,
}

impl QuotationRow {
    fn into_quotation(self) -> AppResult<Quotation> {
        let metal = MetalKind::from_str(&self.metal)
            .ok_or_else(|| AppError::Internal(format!("Unknown metal kind: {}", self.metal)))?;

        Ok(Quotation {
            id: self.id,
            organization_id: self.organization_id,
            metal,
            quote_date: self.quote_date,
            buy_price: self.buy_price,
            sell_price: self.sell_price,
            created_at: self.created_at,
        })
    }
}

/// Fetch the effective quotation for a date inside an open transaction.
///
/// The effective quotation is the newest one dated on or before the
/// given date.
pub(crate) async fn effective_as_of_on(
    conn: &mut PgConnection,
    organization_id: Uuid,
    metal: MetalKind,
    date: NaiveDate,
) -> AppResult<Quotation> {
    let row = sqlx::query_as::<_, QuotationRow>(
        r#"
        SELECT id, organization_id, metal, quote_date, buy_price, sell_price, created_at
        FROM quotations
        WHERE organization_id = $1 AND metal = $2 AND quote_date <= $3
        ORDER BY quote_date DESC, created_at DESC
        LIMIT 1
        "#,
    )
    .bind(organization_id)
    .bind(metal.as_str())
    .bind(date)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Quotation".to_string()))?;

    row.into_quotation()
}

/// Fetch the latest quotation for a metal inside an open transaction,
/// if any exists
pub(crate) async fn latest_on(
    conn: &mut PgConnection,
    organization_id: Uuid,
    metal: MetalKind,
) -> AppResult<Option<Quotation>> {
    let row = sqlx::query_as::<_, QuotationRow>(
        r#"
        SELECT id, organization_id, metal, quote_date, buy_price, sell_price, created_at
        FROM quotations
        WHERE organization_id = $1 AND metal = $2
        ORDER BY quote_date DESC, created_at DESC
        LIMIT 1
        "#,
    )
    .bind(organization_id)
    .bind(metal.as_str())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(QuotationRow::into_quotation).transpose()
}

impl QuotationService {
    /// Create a new QuotationService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Record a quotation for one organization, metal and date.
    ///
    /// Each (organization, metal, date) key accepts exactly one record;
    /// a second attempt is rejected, including under concurrency.
    pub async fn record(
        &self,
        organization_id: Uuid,
        input: RecordQuotationInput,
    ) -> AppResult<Quotation> {
        if validate_positive_price(input.buy_price).is_err() {
            return Err(AppError::Validation {
                field: "buy_price".to_string(),
                message: "Buy price must be positive".to_string(),
                message_pt: "O preço de compra deve ser positivo".to_string(),
            });
        }
        if validate_positive_price(input.sell_price).is_err() {
            return Err(AppError::Validation {
                field: "sell_price".to_string(),
                message: "Sell price must be positive".to_string(),
                message_pt: "O preço de venda deve ser positivo".to_string(),
            });
        }

        // A duplicate (organization, metal, date) key returns no row
        let row = sqlx::query_as::<_, QuotationRow>(
            r#"
            INSERT INTO quotations (organization_id, metal, quote_date, buy_price, sell_price)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (organization_id, metal, quote_date) DO NOTHING
            RETURNING id, organization_id, metal, quote_date, buy_price, sell_price, created_at
            "#,
        )
        .bind(organization_id)
        .bind(input.metal.as_str())
        .bind(input.quote_date)
        .bind(input.buy_price)
        .bind(input.sell_price)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => {
                tracing::info!(
                    metal = input.metal.as_str(),
                    date = %input.quote_date,
                    "Quotation recorded"
                );
                row.into_quotation()
            }
            None => Err(AppError::Conflict {
                resource: "Quotation".to_string(),
                message: format!(
                    "A quotation for {} on {} already exists",
                    input.metal, input.quote_date
                ),
                message_pt: format!(
                    "Já existe uma cotação de {} para {}",
                    input.metal, input.quote_date
                ),
            }),
        }
    }

    /// Get the effective quotation for a date: the newest record dated
    /// on or before it
    pub async fn effective_as_of(
        &self,
        organization_id: Uuid,
        metal: MetalKind,
        date: NaiveDate,
    ) -> AppResult<Quotation> {
        let mut conn = self.db.acquire().await?;
        effective_as_of_on(&mut conn, organization_id, metal, date).await
    }

    /// Get the latest quotation for a metal
    pub async fn latest(&self, organization_id: Uuid, metal: MetalKind) -> AppResult<Quotation> {
        let mut conn = self.db.acquire().await?;
        latest_on(&mut conn, organization_id, metal)
            .await?
            .ok_or_else(|| AppError::NotFound("Quotation".to_string()))
    }

    /// Get a quotation by id
    pub async fn get(&self, organization_id: Uuid, quotation_id: Uuid) -> AppResult<Quotation> {
        let row = sqlx::query_as::<_, QuotationRow>(
            r#"
            SELECT id, organization_id, metal, quote_date, buy_price, sell_price, created_at
            FROM quotations
            WHERE id = $1 AND organization_id = $2
            "#,
        )
        .bind(quotation_id)
        .bind(organization_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Quotation".to_string()))?;

        row.into_quotation()
    }

    /// List quotations for a metal, optionally bounded to a date range
    pub async fn list(
        &self,
        organization_id: Uuid,
        metal: MetalKind,
        range: Option<DateRange>,
    ) -> AppResult<Vec<Quotation>> {
        let rows = match range {
            Some(range) => {
                sqlx::query_as::<_, QuotationRow>(
                    r#"
                    SELECT id, organization_id, metal, quote_date, buy_price, sell_price, created_at
                    FROM quotations
                    WHERE organization_id = $1 AND metal = $2
                      AND quote_date BETWEEN $3 AND $4
                    ORDER BY quote_date DESC
                    "#,
                )
                .bind(organization_id)
                .bind(metal.as_str())
                .bind(range.from)
                .bind(range.to)
                .fetch_all(&self.db)
                .await?
            }
            None => {
                sqlx::query_as::<_, QuotationRow>(
                    r#"
                    SELECT id, organization_id, metal, quote_date, buy_price, sell_price, created_at
                    FROM quotations
                    WHERE organization_id = $1 AND metal = $2
                    ORDER BY quote_date DESC
                    "#,
                )
                .bind(organization_id)
                .bind(metal.as_str())
                .fetch_all(&self.db)
                .await?
            }
        };

        rows.into_iter().map(QuotationRow::into_quotation).collect()
    }
}

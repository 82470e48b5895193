//! Inventory service: products, FIFO lots and the stock movement log

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use shared::models::{
    document_number, InventoryLot, LotSourceType, MetalKind, MovementKind, Product, StockMovement,
};
use shared::types::DateRange;
use shared::validation::validate_positive_grams;

use crate::error::{AppError, AppResult};

/// Inventory service for physical stock tracked in FIFO lots
#[derive(Clone)]
pub struct InventoryService {
    db: PgPool,
}

/// Input for registering a product
#[derive(Debug, Deserialize)]
pub struct CreateProductInput {
    pub name: String,
    pub metal: MetalKind,
    pub unit: Option<String>,
}

/// Input for receiving material into a new lot
#[derive(Debug, Deserialize)]
pub struct ReceiveLotInput {
    pub product_id: Uuid,
    pub batch_number: String,
    pub quantity: Decimal,
    pub cost_per_unit: Option<Decimal>,
    pub source_type: LotSourceType,
    pub source_id: Option<String>,
    pub source_document: Option<String>,
}

/// One lot's share of a FIFO consumption
#[derive(Debug, Clone, Serialize)]
pub struct LotConsumption {
    pub lot_id: Uuid,
    pub batch_number: String,
    pub grams: Decimal,
    pub cost_per_unit: Decimal,
}

/// One statement line with the balance after its movement
#[derive(Debug, Clone, Serialize)]
pub struct StockStatementLine {
    pub movement: StockMovement,
    pub balance: Decimal,
}

/// Chronological stock statement for one product
#[derive(Debug, Clone, Serialize)]
pub struct StockStatement {
    pub product: Product,
    pub opening_balance: Decimal,
    pub lines: Vec<StockStatementLine>,
    pub closing_balance: Decimal,
}

/// Outcome of reconciling a product's cached stock against its lots
#[derive(Debug, Clone, Serialize)]
pub struct StockReconciliation {
    pub product_id: Uuid,
    /// Cache value before reconciliation
    pub cached_stock: Decimal,
    /// Sum of lot remainders, the authoritative figure
    pub lots_remaining_total: Decimal,
    /// Signed sum of the movement log, shown for diagnosis
    pub movements_total: Decimal,
    pub corrected: bool,
}

/// Database row for a product
#[derive(Debug, FromRow)]
struct ProductRow {
    id: Uuid,
    organization_id: Uuid,
    name: String,
    metal: String,
    unit: String,
    current_stock: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ProductRow {
    fn into_product(self) -> AppResult<Product> {
        let metal = MetalKind::from_str(&self.metal)
            .ok_or_else(|| AppError::Internal(format!("Unknown metal kind: {}", self.metal)))?;

        Ok(Product {
            id: self.id,
            organization_id: self.organization_id,
            name: self.name,
            metal,
            unit: self.unit,
            current_stock: self.current_stock,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Database row for an inventory lot
#[derive(Debug, FromRow)]
struct LotRow {
    id: Uuid,
    organization_id: Uuid,
    product_id: Uuid,
    batch_number: String,
    original_quantity: Decimal,
    remaining_quantity: Decimal,
    cost_per_unit: Decimal,
    source_type: String,
    source_id: Option<String>,
    received_at: DateTime<Utc>,
}

impl LotRow {
    fn into_lot(self) -> AppResult<InventoryLot> {
        let source_type = LotSourceType::from_str(&self.source_type).ok_or_else(|| {
            AppError::Internal(format!("Unknown lot source type: {}", self.source_type))
        })?;

        Ok(InventoryLot {
            id: self.id,
            organization_id: self.organization_id,
            product_id: self.product_id,
            batch_number: self.batch_number,
            original_quantity: self.original_quantity,
            remaining_quantity: self.remaining_quantity,
            cost_per_unit: self.cost_per_unit,
            source_type,
            source_id: self.source_id,
            received_at: self.received_at,
        })
    }
}

/// Database row for a stock movement
#[derive(Debug, FromRow)]
struct MovementRow {
    id: Uuid,
    organization_id: Uuid,
    product_id: Uuid,
    lot_id: Option<Uuid>,
    quantity: Decimal,
    kind: String,
    source_document: Option<String>,
    created_at: DateTime<Utc>,
}

impl MovementRow {
    fn into_movement(self) -> AppResult<StockMovement> {
        let kind = MovementKind::from_str(&self.kind)
            .ok_or_else(|| AppError::Internal(format!("Unknown movement kind: {}", self.kind)))?;

        Ok(StockMovement {
            id: self.id,
            organization_id: self.organization_id,
            product_id: self.product_id,
            lot_id: self.lot_id,
            quantity: self.quantity,
            kind,
            source_document: self.source_document,
            created_at: self.created_at,
        })
    }
}

/// Everything needed to receive a lot from inside another service's
/// transaction
#[derive(Debug)]
pub(crate) struct ReceiveSpec {
    pub product_id: Uuid,
    pub batch_number: String,
    pub quantity: Decimal,
    pub cost_per_unit: Decimal,
    pub source_type: LotSourceType,
    pub source_id: Option<String>,
    pub source_document: Option<String>,
}

async fn insert_movement_on(
    conn: &mut PgConnection,
    organization_id: Uuid,
    product_id: Uuid,
    lot_id: Option<Uuid>,
    signed_quantity: Decimal,
    kind: MovementKind,
    source_document: Option<&str>,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO stock_movements (organization_id, product_id, lot_id, quantity, kind, source_document)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(organization_id)
    .bind(product_id)
    .bind(lot_id)
    .bind(signed_quantity)
    .bind(kind.as_str())
    .bind(source_document)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Receive a new lot inside an open transaction.
///
/// Writes the lot, its receipt movement and the product stock cache in
/// one step.
pub(crate) async fn receive_on(
    conn: &mut PgConnection,
    organization_id: Uuid,
    spec: ReceiveSpec,
) -> AppResult<InventoryLot> {
    let product_exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM products WHERE id = $1 AND organization_id = $2)",
    )
    .bind(spec.product_id)
    .bind(organization_id)
    .fetch_one(&mut *conn)
    .await?;

    if !product_exists {
        return Err(AppError::NotFound("Product".to_string()));
    }

    let lot = sqlx::query_as::<_, LotRow>(
        r#"
        INSERT INTO inventory_lots (organization_id, product_id, batch_number, original_quantity,
                                    remaining_quantity, cost_per_unit, source_type, source_id)
        VALUES ($1, $2, $3, $4, $4, $5, $6, $7)
        RETURNING id, organization_id, product_id, batch_number, original_quantity,
                  remaining_quantity, cost_per_unit, source_type, source_id, received_at
        "#,
    )
    .bind(organization_id)
    .bind(spec.product_id)
    .bind(&spec.batch_number)
    .bind(spec.quantity)
    .bind(spec.cost_per_unit)
    .bind(spec.source_type.as_str())
    .bind(&spec.source_id)
    .fetch_one(&mut *conn)
    .await?
    .into_lot()?;

    insert_movement_on(
        conn,
        organization_id,
        spec.product_id,
        Some(lot.id),
        spec.quantity,
        MovementKind::Receipt,
        spec.source_document.as_deref(),
    )
    .await?;

    sqlx::query(
        "UPDATE products SET current_stock = current_stock + $1, updated_at = NOW() WHERE id = $2",
    )
    .bind(spec.quantity)
    .bind(spec.product_id)
    .execute(&mut *conn)
    .await?;

    Ok(lot)
}

/// Consume grams from one lot inside an open transaction.
///
/// The lot row is locked before the remainder check so concurrent
/// consumers cannot both pass it.
pub(crate) async fn consume_on(
    conn: &mut PgConnection,
    organization_id: Uuid,
    lot_id: Uuid,
    grams: Decimal,
    kind: MovementKind,
    source_document: Option<&str>,
) -> AppResult<InventoryLot> {
    let lot = sqlx::query_as::<_, LotRow>(
        r#"
        SELECT id, organization_id, product_id, batch_number, original_quantity,
               remaining_quantity, cost_per_unit, source_type, source_id, received_at
        FROM inventory_lots
        WHERE id = $1 AND organization_id = $2
        FOR UPDATE
        "#,
    )
    .bind(lot_id)
    .bind(organization_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Inventory lot".to_string()))?
    .into_lot()?;

    if grams > lot.remaining_quantity {
        return Err(AppError::InsufficientLotQuantity {
            lot: lot.batch_number,
            requested: grams,
            available: lot.remaining_quantity,
        });
    }

    let updated = sqlx::query_as::<_, LotRow>(
        r#"
        UPDATE inventory_lots
        SET remaining_quantity = remaining_quantity - $1
        WHERE id = $2
        RETURNING id, organization_id, product_id, batch_number, original_quantity,
                  remaining_quantity, cost_per_unit, source_type, source_id, received_at
        "#,
    )
    .bind(grams)
    .bind(lot.id)
    .fetch_one(&mut *conn)
    .await?
    .into_lot()?;

    insert_movement_on(
        conn,
        organization_id,
        updated.product_id,
        Some(updated.id),
        -grams,
        kind,
        source_document,
    )
    .await?;

    sqlx::query(
        "UPDATE products SET current_stock = current_stock - $1, updated_at = NOW() WHERE id = $2",
    )
    .bind(grams)
    .bind(updated.product_id)
    .execute(&mut *conn)
    .await?;

    Ok(updated)
}

/// Return previously consumed grams to a lot inside an open transaction.
///
/// The remainder may never exceed the lot's original quantity.
pub(crate) async fn release_on(
    conn: &mut PgConnection,
    organization_id: Uuid,
    lot_id: Uuid,
    grams: Decimal,
    source_document: Option<&str>,
) -> AppResult<InventoryLot> {
    let lot = sqlx::query_as::<_, LotRow>(
        r#"
        SELECT id, organization_id, product_id, batch_number, original_quantity,
               remaining_quantity, cost_per_unit, source_type, source_id, received_at
        FROM inventory_lots
        WHERE id = $1 AND organization_id = $2
        FOR UPDATE
        "#,
    )
    .bind(lot_id)
    .bind(organization_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Inventory lot".to_string()))?
    .into_lot()?;

    if lot.remaining_quantity + grams > lot.original_quantity {
        return Err(AppError::InvariantViolation(format!(
            "Releasing {} g into lot {} would exceed its original quantity",
            grams, lot.batch_number
        )));
    }

    let updated = sqlx::query_as::<_, LotRow>(
        r#"
        UPDATE inventory_lots
        SET remaining_quantity = remaining_quantity + $1
        WHERE id = $2
        RETURNING id, organization_id, product_id, batch_number, original_quantity,
                  remaining_quantity, cost_per_unit, source_type, source_id, received_at
        "#,
    )
    .bind(grams)
    .bind(lot.id)
    .fetch_one(&mut *conn)
    .await?
    .into_lot()?;

    insert_movement_on(
        conn,
        organization_id,
        updated.product_id,
        Some(updated.id),
        grams,
        MovementKind::Release,
        source_document,
    )
    .await?;

    sqlx::query(
        "UPDATE products SET current_stock = current_stock + $1, updated_at = NOW() WHERE id = $2",
    )
    .bind(grams)
    .bind(updated.product_id)
    .execute(&mut *conn)
    .await?;

    Ok(updated)
}

impl InventoryService {
    /// Create a new InventoryService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Register a product
    pub async fn create_product(
        &self,
        organization_id: Uuid,
        input: CreateProductInput,
    ) -> AppResult<Product> {
        if input.name.trim().is_empty() {
            return Err(AppError::Validation {
                field: "name".to_string(),
                message: "Product name must not be empty".to_string(),
                message_pt: "O nome do produto não pode estar vazio".to_string(),
            });
        }

        let unit = input.unit.unwrap_or_else(|| "g".to_string());

        let row = sqlx::query_as::<_, ProductRow>(
            r#"
            INSERT INTO products (organization_id, name, metal, unit)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (organization_id, name) DO NOTHING
            RETURNING id, organization_id, name, metal, unit, current_stock, created_at, updated_at
            "#,
        )
        .bind(organization_id)
        .bind(&input.name)
        .bind(input.metal.as_str())
        .bind(&unit)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => row.into_product(),
            None => Err(AppError::Conflict {
                resource: "Product".to_string(),
                message: format!("A product named {} already exists", input.name),
                message_pt: format!("Já existe um produto chamado {}", input.name),
            }),
        }
    }

    /// Get a product with its cached stock
    pub async fn get_product(&self, organization_id: Uuid, product_id: Uuid) -> AppResult<Product> {
        let row = sqlx::query_as::<_, ProductRow>(
            r#"
            SELECT id, organization_id, name, metal, unit, current_stock, created_at, updated_at
            FROM products
            WHERE id = $1 AND organization_id = $2
            "#,
        )
        .bind(product_id)
        .bind(organization_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Product".to_string()))?;

        row.into_product()
    }

    /// List products for an organization
    pub async fn list_products(&self, organization_id: Uuid) -> AppResult<Vec<Product>> {
        let rows = sqlx::query_as::<_, ProductRow>(
            r#"
            SELECT id, organization_id, name, metal, unit, current_stock, created_at, updated_at
            FROM products
            WHERE organization_id = $1
            ORDER BY name
            "#,
        )
        .bind(organization_id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(ProductRow::into_product).collect()
    }

    /// Receive material into a new lot
    pub async fn receive(
        &self,
        organization_id: Uuid,
        input: ReceiveLotInput,
    ) -> AppResult<InventoryLot> {
        if validate_positive_grams(input.quantity).is_err() {
            return Err(AppError::Validation {
                field: "quantity".to_string(),
                message: "Quantity must be positive".to_string(),
                message_pt: "A quantidade deve ser positiva".to_string(),
            });
        }
        let cost_per_unit = input.cost_per_unit.unwrap_or(Decimal::ZERO);
        if cost_per_unit < Decimal::ZERO {
            return Err(AppError::Validation {
                field: "cost_per_unit".to_string(),
                message: "Cost per unit cannot be negative".to_string(),
                message_pt: "O custo unitário não pode ser negativo".to_string(),
            });
        }

        let mut tx = self.db.begin().await?;
        let lot = receive_on(
            &mut tx,
            organization_id,
            ReceiveSpec {
                product_id: input.product_id,
                batch_number: input.batch_number,
                quantity: input.quantity,
                cost_per_unit,
                source_type: input.source_type,
                source_id: input.source_id,
                source_document: input.source_document,
            },
        )
        .await?;
        tx.commit().await?;

        tracing::info!(
            lot_id = %lot.id,
            batch = %lot.batch_number,
            quantity = %lot.original_quantity,
            "Lot received"
        );

        Ok(lot)
    }

    /// Consume grams from a specific lot
    pub async fn consume(
        &self,
        organization_id: Uuid,
        lot_id: Uuid,
        grams: Decimal,
        kind: MovementKind,
        source_document: Option<String>,
    ) -> AppResult<InventoryLot> {
        if validate_positive_grams(grams).is_err() {
            return Err(AppError::Validation {
                field: "grams".to_string(),
                message: "Consumed quantity must be positive".to_string(),
                message_pt: "A quantidade consumida deve ser positiva".to_string(),
            });
        }

        let mut tx = self.db.begin().await?;
        let lot = consume_on(
            &mut tx,
            organization_id,
            lot_id,
            grams,
            kind,
            source_document.as_deref(),
        )
        .await?;
        tx.commit().await?;

        Ok(lot)
    }

    /// Consume grams from a product's lots in FIFO order.
    ///
    /// Lots are drained oldest first by receipt time; the total
    /// consumed always equals the requested amount or the whole call
    /// fails.
    pub async fn consume_fifo(
        &self,
        organization_id: Uuid,
        product_id: Uuid,
        grams: Decimal,
        kind: MovementKind,
        source_document: Option<String>,
    ) -> AppResult<Vec<LotConsumption>> {
        if validate_positive_grams(grams).is_err() {
            return Err(AppError::Validation {
                field: "grams".to_string(),
                message: "Consumed quantity must be positive".to_string(),
                message_pt: "A quantidade consumida deve ser positiva".to_string(),
            });
        }

        let mut tx = self.db.begin().await?;

        let product = sqlx::query_as::<_, ProductRow>(
            r#"
            SELECT id, organization_id, name, metal, unit, current_stock, created_at, updated_at
            FROM products
            WHERE id = $1 AND organization_id = $2
            "#,
        )
        .bind(product_id)
        .bind(organization_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Product".to_string()))?
        .into_product()?;

        let lots = sqlx::query_as::<_, LotRow>(
            r#"
            SELECT id, organization_id, product_id, batch_number, original_quantity,
                   remaining_quantity, cost_per_unit, source_type, source_id, received_at
            FROM inventory_lots
            WHERE product_id = $1 AND organization_id = $2 AND remaining_quantity > 0
            ORDER BY received_at ASC, id ASC
            FOR UPDATE
            "#,
        )
        .bind(product_id)
        .bind(organization_id)
        .fetch_all(&mut *tx)
        .await?;

        let available: Decimal = lots.iter().map(|l| l.remaining_quantity).sum();
        if available < grams {
            return Err(AppError::InsufficientLotQuantity {
                lot: product.name,
                requested: grams,
                available,
            });
        }

        let mut left = grams;
        let mut consumed = Vec::new();
        for lot in lots {
            if left.is_zero() {
                break;
            }
            let take = left.min(lot.remaining_quantity);

            sqlx::query(
                "UPDATE inventory_lots SET remaining_quantity = remaining_quantity - $1 WHERE id = $2",
            )
            .bind(take)
            .bind(lot.id)
            .execute(&mut *tx)
            .await?;

            insert_movement_on(
                &mut tx,
                organization_id,
                product_id,
                Some(lot.id),
                -take,
                kind,
                source_document.as_deref(),
            )
            .await?;

            consumed.push(LotConsumption {
                lot_id: lot.id,
                batch_number: lot.batch_number,
                grams: take,
                cost_per_unit: lot.cost_per_unit,
            });
            left -= take;
        }

        sqlx::query(
            "UPDATE products SET current_stock = current_stock - $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(grams)
        .bind(product_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            product_id = %product_id,
            grams = %grams,
            lots = consumed.len(),
            "FIFO consumption recorded"
        );

        Ok(consumed)
    }

    /// Return previously consumed grams to a lot
    pub async fn release(
        &self,
        organization_id: Uuid,
        lot_id: Uuid,
        grams: Decimal,
        source_document: Option<String>,
    ) -> AppResult<InventoryLot> {
        if validate_positive_grams(grams).is_err() {
            return Err(AppError::Validation {
                field: "grams".to_string(),
                message: "Released quantity must be positive".to_string(),
                message_pt: "A quantidade devolvida deve ser positiva".to_string(),
            });
        }

        let mut tx = self.db.begin().await?;
        let lot = release_on(
            &mut tx,
            organization_id,
            lot_id,
            grams,
            source_document.as_deref(),
        )
        .await?;
        tx.commit().await?;

        Ok(lot)
    }

    /// Get a lot by id
    pub async fn get_lot(&self, organization_id: Uuid, lot_id: Uuid) -> AppResult<InventoryLot> {
        let row = sqlx::query_as::<_, LotRow>(
            r#"
            SELECT id, organization_id, product_id, batch_number, original_quantity,
                   remaining_quantity, cost_per_unit, source_type, source_id, received_at
            FROM inventory_lots
            WHERE id = $1 AND organization_id = $2
            "#,
        )
        .bind(lot_id)
        .bind(organization_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Inventory lot".to_string()))?;

        row.into_lot()
    }

    /// List a product's lots, oldest first
    pub async fn list_lots(
        &self,
        organization_id: Uuid,
        product_id: Uuid,
    ) -> AppResult<Vec<InventoryLot>> {
        let rows = sqlx::query_as::<_, LotRow>(
            r#"
            SELECT id, organization_id, product_id, batch_number, original_quantity,
                   remaining_quantity, cost_per_unit, source_type, source_id, received_at
            FROM inventory_lots
            WHERE product_id = $1 AND organization_id = $2
            ORDER BY received_at ASC, id ASC
            "#,
        )
        .bind(product_id)
        .bind(organization_id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(LotRow::into_lot).collect()
    }

    /// Chronological stock statement for a product over a date range.
    ///
    /// Movements created at the same instant are ordered by the
    /// document number in their reference.
    pub async fn statement(
        &self,
        organization_id: Uuid,
        product_id: Uuid,
        range: DateRange,
    ) -> AppResult<StockStatement> {
        let product = self.get_product(organization_id, product_id).await?;

        let opening_balance = sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT COALESCE(SUM(quantity), 0)
            FROM stock_movements
            WHERE product_id = $1 AND organization_id = $2 AND created_at::date < $3
            "#,
        )
        .bind(product_id)
        .bind(organization_id)
        .bind(range.from)
        .fetch_one(&self.db)
        .await?;

        let rows = sqlx::query_as::<_, MovementRow>(
            r#"
            SELECT id, organization_id, product_id, lot_id, quantity, kind, source_document, created_at
            FROM stock_movements
            WHERE product_id = $1 AND organization_id = $2
              AND created_at::date BETWEEN $3 AND $4
            ORDER BY created_at ASC
            "#,
        )
        .bind(product_id)
        .bind(organization_id)
        .bind(range.from)
        .bind(range.to)
        .fetch_all(&self.db)
        .await?;

        let mut movements = rows
            .into_iter()
            .map(MovementRow::into_movement)
            .collect::<AppResult<Vec<_>>>()?;

        movements.sort_by_key(|m| {
            let doc = m
                .source_document
                .as_deref()
                .and_then(document_number)
                .unwrap_or(0);
            (m.created_at, doc)
        });

        let mut running = opening_balance;
        let mut lines = Vec::with_capacity(movements.len());
        for movement in movements {
            running += movement.quantity;
            lines.push(StockStatementLine {
                movement,
                balance: running,
            });
        }

        Ok(StockStatement {
            product,
            opening_balance,
            lines,
            closing_balance: running,
        })
    }

    /// Reconcile a product's cached stock against the sum of its lot
    /// remainders, correcting the cache when they diverge
    pub async fn reconcile(
        &self,
        organization_id: Uuid,
        product_id: Uuid,
    ) -> AppResult<StockReconciliation> {
        let mut tx = self.db.begin().await?;

        let product = sqlx::query_as::<_, ProductRow>(
            r#"
            SELECT id, organization_id, name, metal, unit, current_stock, created_at, updated_at
            FROM products
            WHERE id = $1 AND organization_id = $2
            FOR UPDATE
            "#,
        )
        .bind(product_id)
        .bind(organization_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Product".to_string()))?
        .into_product()?;

        let lots_remaining_total = sqlx::query_scalar::<_, Decimal>(
            "SELECT COALESCE(SUM(remaining_quantity), 0) FROM inventory_lots WHERE product_id = $1",
        )
        .bind(product_id)
        .fetch_one(&mut *tx)
        .await?;

        let movements_total = sqlx::query_scalar::<_, Decimal>(
            "SELECT COALESCE(SUM(quantity), 0) FROM stock_movements WHERE product_id = $1",
        )
        .bind(product_id)
        .fetch_one(&mut *tx)
        .await?;

        let corrected = product.current_stock != lots_remaining_total;
        if corrected {
            sqlx::query(
                "UPDATE products SET current_stock = $1, updated_at = NOW() WHERE id = $2",
            )
            .bind(lots_remaining_total)
            .bind(product_id)
            .execute(&mut *tx)
            .await?;

            tracing::warn!(
                product_id = %product_id,
                cached = %product.current_stock,
                actual = %lots_remaining_total,
                "Stock cache corrected"
            );
        }

        tx.commit().await?;

        Ok(StockReconciliation {
            product_id,
            cached_stock: product.current_stock,
            lots_remaining_total,
            movements_total,
            corrected,
        })
    }
}

//! Recovery order service: batching approved analyses through physical
//! processing and splitting the output into pure metal and residue

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use shared::models::{
    analysis_next_state, format_analysis_number, format_order_number, recovery_next_state,
    recovery_yield, round_currency, AnalysisEvent, AnalysisState, CommissionPayable, InventoryLot,
    LotSourceType, MetalKind, MovementKind, PriceSide, RawMaterialConsumption, RecoveryOrder,
    RecoveryOrderEvent, RecoveryOrderState,
};
use shared::validation::{validate_fraction, validate_positive_grams, validate_purity};

use crate::error::{AppError, AppResult};
use crate::services::analysis::fetch_analysis_for_update_on;
use crate::services::inventory::{consume_on, receive_on, release_on, ReceiveSpec};
use crate::services::quotation::latest_on;

/// Recovery order service
#[derive(Clone)]
pub struct RecoveryService {
    db: PgPool,
}

/// Raw material to draw from an inventory lot
#[derive(Debug, Deserialize)]
pub struct RawMaterialInput {
    pub lot_id: Uuid,
    pub grams: Decimal,
}

/// Input for opening a recovery order over approved analyses
#[derive(Debug, Deserialize)]
pub struct CreateRecoveryOrderInput {
    pub metal: MetalKind,
    pub analysis_ids: Vec<Uuid>,
    #[serde(default)]
    pub raw_materials: Vec<RawMaterialInput>,
    pub salesperson_id: Option<Uuid>,
}

/// Input for finalizing an order once the purity assay is in
#[derive(Debug, Deserialize)]
pub struct FinalizeRecoveryInput {
    /// Assayed purity fraction in (0, 1]
    pub purity: Decimal,
    /// Product that receives the recovered pure metal
    pub output_product_id: Uuid,
}

/// Input for recording a salesperson's commission on an order
#[derive(Debug, Deserialize)]
pub struct ApplyCommissionInput {
    pub salesperson_id: Uuid,
    /// Commission in currency
    pub amount: Decimal,
    /// Fraction in [0, 1], kept for reporting
    pub percent: Option<Decimal>,
}

/// A recovery order with its linked analyses and consumed lots
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryOrderDetail {
    pub order: RecoveryOrder,
    pub analysis_ids: Vec<Uuid>,
    pub consumptions: Vec<RawMaterialConsumption>,
}

/// Outcome of finalizing an order
#[derive(Debug, Clone, Serialize)]
pub struct FinalizedRecovery {
    pub order: RecoveryOrder,
    /// Lot created for the recovered pure metal
    pub recovered_lot: InventoryLot,
    /// Business-owned analysis spawned for the residue, if any
    pub residue_analysis_id: Option<Uuid>,
}

/// Database row for a recovery order
#[derive(Debug, FromRow)]
struct OrderRow {
    id: Uuid,
    organization_id: Uuid,
    order_number: String,
    metal: String,
    state: String,
    total_estimated_grams: Decimal,
    processing_result_grams: Option<Decimal>,
    purity: Option<Decimal>,
    recovered_pure_grams: Option<Decimal>,
    residue_grams: Option<Decimal>,
    residue_analysis_id: Option<Uuid>,
    salesperson_id: Option<Uuid>,
    commission_amount: Option<Decimal>,
    commission_percent: Option<Decimal>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_order(self) -> AppResult<RecoveryOrder> {
        let metal = MetalKind::from_str(&self.metal)
            .ok_or_else(|| AppError::Internal(format!("Unknown metal kind: {}", self.metal)))?;
        let state = RecoveryOrderState::from_str(&self.state)
            .ok_or_else(|| AppError::Internal(format!("Unknown order state: {}", self.state)))?;

        Ok(RecoveryOrder {
            id: self.id,
            organization_id: self.organization_id,
            order_number: self.order_number,
            metal,
            state,
            total_estimated_grams: self.total_estimated_grams,
            processing_result_grams: self.processing_result_grams,
            purity: self.purity,
            recovered_pure_grams: self.recovered_pure_grams,
            residue_grams: self.residue_grams,
            residue_analysis_id: self.residue_analysis_id,
            salesperson_id: self.salesperson_id,
            commission_amount: self.commission_amount,
            commission_percent: self.commission_percent,
            started_at: self.started_at,
            finished_at: self.finished_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Database row for a raw material consumption
#[derive(Debug, FromRow)]
struct ConsumptionRow {
    id: Uuid,
    order_id: Uuid,
    lot_id: Uuid,
    grams: Decimal,
    cost: Decimal,
    gold_equivalent_cost: Option<Decimal>,
    created_at: DateTime<Utc>,
}

impl ConsumptionRow {
    fn into_consumption(self) -> RawMaterialConsumption {
        RawMaterialConsumption {
            id: self.id,
            order_id: self.order_id,
            lot_id: self.lot_id,
            grams: self.grams,
            cost: self.cost,
            gold_equivalent_cost: self.gold_equivalent_cost,
            created_at: self.created_at,
        }
    }
}

/// Database row for a commission payable
#[derive(Debug, FromRow)]
struct CommissionRow {
    id: Uuid,
    organization_id: Uuid,
    order_id: Uuid,
    salesperson_id: Uuid,
    amount: Decimal,
    percent: Option<Decimal>,
    metal: String,
    gold_equivalent_grams: Decimal,
    created_at: DateTime<Utc>,
}

impl CommissionRow {
    fn into_commission(self) -> AppResult<CommissionPayable> {
        let metal = MetalKind::from_str(&self.metal)
            .ok_or_else(|| AppError::Internal(format!("Unknown metal kind: {}", self.metal)))?;

        Ok(CommissionPayable {
            id: self.id,
            organization_id: self.organization_id,
            order_id: self.order_id,
            salesperson_id: self.salesperson_id,
            amount: self.amount,
            percent: self.percent,
            metal,
            gold_equivalent_grams: self.gold_equivalent_grams,
            created_at: self.created_at,
        })
    }
}

/// Resolve the legal next state for an event, or fail with the
/// operation name the caller attempted
fn transition(
    order: &RecoveryOrder,
    event: RecoveryOrderEvent,
    operation: &str,
) -> AppResult<RecoveryOrderState> {
    recovery_next_state(order.state, event).ok_or_else(|| AppError::IllegalStateTransition {
        entity: format!("Recovery order {}", order.order_number),
        from: order.state.as_str().to_string(),
        operation: operation.to_string(),
    })
}

async fn fetch_order_for_update_on(
    conn: &mut PgConnection,
    organization_id: Uuid,
    order_id: Uuid,
) -> AppResult<RecoveryOrder> {
    sqlx::query_as::<_, OrderRow>(
        r#"
        SELECT id, organization_id, order_number, metal, state, total_estimated_grams,
               processing_result_grams, purity, recovered_pure_grams, residue_grams,
               residue_analysis_id, salesperson_id, commission_amount, commission_percent,
               started_at, finished_at, created_at, updated_at
        FROM recovery_orders
        WHERE id = $1 AND organization_id = $2
        FOR UPDATE
        "#,
    )
    .bind(order_id)
    .bind(organization_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Recovery order".to_string()))?
    .into_order()
}

/// Draw raw material from a lot into an order inside an open
/// transaction, pricing the draw at the lot's unit cost
async fn consume_raw_material_on(
    conn: &mut PgConnection,
    organization_id: Uuid,
    order: &RecoveryOrder,
    input: &RawMaterialInput,
) -> AppResult<RawMaterialConsumption> {
    let document = format!("Recovery order {}", order.order_number);
    let lot = consume_on(
        conn,
        organization_id,
        input.lot_id,
        input.grams,
        MovementKind::RecoveryConsumption,
        Some(&document),
    )
    .await?;

    let cost = round_currency(input.grams * lot.cost_per_unit);
    let gold_equivalent_cost = latest_on(conn, organization_id, order.metal)
        .await?
        .map(|q| q.grams_for_currency(cost, PriceSide::Buy));

    let consumption = sqlx::query_as::<_, ConsumptionRow>(
        r#"
        INSERT INTO recovery_order_consumptions (order_id, lot_id, grams, cost, gold_equivalent_cost)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, order_id, lot_id, grams, cost, gold_equivalent_cost, created_at
        "#,
    )
    .bind(order.id)
    .bind(lot.id)
    .bind(input.grams)
    .bind(cost)
    .bind(gold_equivalent_cost)
    .fetch_one(&mut *conn)
    .await?;

    Ok(consumption.into_consumption())
}

impl RecoveryService {
    /// Create a new RecoveryService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Open a recovery order over a batch of approved analyses.
    ///
    /// Every analysis must be approved, unlinked and of the order's
    /// metal; each one moves to in-recovery and the order's estimate
    /// becomes the sum of their recoverable amounts. Raw material, if
    /// given, is drawn from inventory in the same transaction.
    pub async fn create(
        &self,
        organization_id: Uuid,
        input: CreateRecoveryOrderInput,
    ) -> AppResult<RecoveryOrderDetail> {
        if input.analysis_ids.is_empty() {
            return Err(AppError::Validation {
                field: "analysis_ids".to_string(),
                message: "A recovery order needs at least one analysis".to_string(),
                message_pt: "Uma ordem de recuperação precisa de pelo menos uma análise"
                    .to_string(),
            });
        }
        for material in &input.raw_materials {
            if validate_positive_grams(material.grams).is_err() {
                return Err(AppError::Validation {
                    field: "raw_materials".to_string(),
                    message: "Raw material grams must be positive".to_string(),
                    message_pt: "As gramas de matéria-prima devem ser positivas".to_string(),
                });
            }
        }

        let mut tx = self.db.begin().await?;

        let sequence =
            sqlx::query_scalar::<_, i64>("SELECT next_document_number($1, 'recovery_order')")
                .bind(organization_id)
                .fetch_one(&mut *tx)
                .await?;
        let order_number = format_order_number(sequence);

        let order = sqlx::query_as::<_, OrderRow>(
            r#"
            INSERT INTO recovery_orders (organization_id, order_number, metal, state,
                                         total_estimated_grams, salesperson_id)
            VALUES ($1, $2, $3, 'pending', 0, $4)
            RETURNING id, organization_id, order_number, metal, state, total_estimated_grams,
                      processing_result_grams, purity, recovered_pure_grams, residue_grams,
                      residue_analysis_id, salesperson_id, commission_amount, commission_percent,
                      started_at, finished_at, created_at, updated_at
            "#,
        )
        .bind(organization_id)
        .bind(&order_number)
        .bind(input.metal.as_str())
        .bind(input.salesperson_id)
        .fetch_one(&mut *tx)
        .await?
        .into_order()?;

        let mut total_estimated = Decimal::ZERO;
        let mut analysis_ids = Vec::with_capacity(input.analysis_ids.len());
        for analysis_id in &input.analysis_ids {
            let analysis =
                fetch_analysis_for_update_on(&mut tx, organization_id, *analysis_id).await?;

            if analysis.metal != input.metal {
                return Err(AppError::Validation {
                    field: "analysis_ids".to_string(),
                    message: format!(
                        "Analysis {} is {}, but the order is {}",
                        analysis.analysis_number,
                        analysis.metal.as_str(),
                        input.metal.as_str()
                    ),
                    message_pt: format!(
                        "A análise {} é de {}, mas a ordem é de {}",
                        analysis.analysis_number,
                        analysis.metal.as_str(),
                        input.metal.as_str()
                    ),
                });
            }
            if analysis.recovery_order_id.is_some() {
                return Err(AppError::Conflict {
                    resource: "Chemical analysis".to_string(),
                    message: format!(
                        "Analysis {} is already linked to a recovery order",
                        analysis.analysis_number
                    ),
                    message_pt: format!(
                        "A análise {} já está vinculada a uma ordem de recuperação",
                        analysis.analysis_number
                    ),
                });
            }

            let next = analysis_next_state(analysis.state, AnalysisEvent::LinkToRecoveryOrder)
                .ok_or_else(|| AppError::IllegalStateTransition {
                    entity: format!("Chemical analysis {}", analysis.analysis_number),
                    from: analysis.state.as_str().to_string(),
                    operation: "link to recovery order".to_string(),
                })?;

            sqlx::query(
                r#"
                UPDATE chemical_analyses
                SET state = $1, recovery_order_id = $2, updated_at = NOW()
                WHERE id = $3
                "#,
            )
            .bind(next.as_str())
            .bind(order.id)
            .bind(analysis.id)
            .execute(&mut *tx)
            .await?;

            total_estimated += analysis.gross_recoverable_grams.unwrap_or(Decimal::ZERO);
            analysis_ids.push(analysis.id);
        }

        let mut consumptions = Vec::with_capacity(input.raw_materials.len());
        for material in &input.raw_materials {
            let consumption =
                consume_raw_material_on(&mut tx, organization_id, &order, material).await?;
            consumptions.push(consumption);
        }

        let order = sqlx::query_as::<_, OrderRow>(
            r#"
            UPDATE recovery_orders
            SET total_estimated_grams = $1, updated_at = NOW()
            WHERE id = $2
            RETURNING id, organization_id, order_number, metal, state, total_estimated_grams,
                      processing_result_grams, purity, recovered_pure_grams, residue_grams,
                      residue_analysis_id, salesperson_id, commission_amount, commission_percent,
                      started_at, finished_at, created_at, updated_at
            "#,
        )
        .bind(total_estimated)
        .bind(order.id)
        .fetch_one(&mut *tx)
        .await?
        .into_order()?;

        tx.commit().await?;

        tracing::info!(
            order_id = %order.id,
            number = %order.order_number,
            analyses = analysis_ids.len(),
            estimated_grams = %order.total_estimated_grams,
            "Recovery order created"
        );

        Ok(RecoveryOrderDetail {
            order,
            analysis_ids,
            consumptions,
        })
    }

    /// Start physical processing
    pub async fn start(&self, organization_id: Uuid, order_id: Uuid) -> AppResult<RecoveryOrder> {
        let mut tx = self.db.begin().await?;

        let order = fetch_order_for_update_on(&mut tx, organization_id, order_id).await?;
        let next = transition(&order, RecoveryOrderEvent::Start, "start")?;

        let updated = sqlx::query_as::<_, OrderRow>(
            r#"
            UPDATE recovery_orders
            SET state = $1, started_at = NOW(), updated_at = NOW()
            WHERE id = $2
            RETURNING id, organization_id, order_number, metal, state, total_estimated_grams,
                      processing_result_grams, purity, recovered_pure_grams, residue_grams,
                      residue_analysis_id, salesperson_id, commission_amount, commission_percent,
                      started_at, finished_at, created_at, updated_at
            "#,
        )
        .bind(next.as_str())
        .bind(order.id)
        .fetch_one(&mut *tx)
        .await?
        .into_order()?;

        tx.commit().await?;

        Ok(updated)
    }

    /// Draw additional raw material into an open order
    pub async fn add_raw_material(
        &self,
        organization_id: Uuid,
        order_id: Uuid,
        input: RawMaterialInput,
    ) -> AppResult<RawMaterialConsumption> {
        if validate_positive_grams(input.grams).is_err() {
            return Err(AppError::Validation {
                field: "grams".to_string(),
                message: "Raw material grams must be positive".to_string(),
                message_pt: "As gramas de matéria-prima devem ser positivas".to_string(),
            });
        }

        let mut tx = self.db.begin().await?;

        let order = fetch_order_for_update_on(&mut tx, organization_id, order_id).await?;
        if !matches!(
            order.state,
            RecoveryOrderState::Pending | RecoveryOrderState::InProgress
        ) {
            return Err(AppError::IllegalStateTransition {
                entity: format!("Recovery order {}", order.order_number),
                from: order.state.as_str().to_string(),
                operation: "add raw material".to_string(),
            });
        }

        let consumption = consume_raw_material_on(&mut tx, organization_id, &order, &input).await?;

        tx.commit().await?;

        Ok(consumption)
    }

    /// Record the weighed output of processing.
    ///
    /// Repeatable until finalization so a weighing mistake can be
    /// corrected.
    pub async fn enter_processing_result(
        &self,
        organization_id: Uuid,
        order_id: Uuid,
        result_grams: Decimal,
    ) -> AppResult<RecoveryOrder> {
        if validate_positive_grams(result_grams).is_err() {
            return Err(AppError::Validation {
                field: "result_grams".to_string(),
                message: "Processing result must be positive".to_string(),
                message_pt: "O resultado do processamento deve ser positivo".to_string(),
            });
        }

        let mut tx = self.db.begin().await?;

        let order = fetch_order_for_update_on(&mut tx, organization_id, order_id).await?;
        let next = transition(
            &order,
            RecoveryOrderEvent::RecordProcessingResult,
            "record processing result",
        )?;

        let updated = sqlx::query_as::<_, OrderRow>(
            r#"
            UPDATE recovery_orders
            SET state = $1, processing_result_grams = $2, updated_at = NOW()
            WHERE id = $3
            RETURNING id, organization_id, order_number, metal, state, total_estimated_grams,
                      processing_result_grams, purity, recovered_pure_grams, residue_grams,
                      residue_analysis_id, salesperson_id, commission_amount, commission_percent,
                      started_at, finished_at, created_at, updated_at
            "#,
        )
        .bind(next.as_str())
        .bind(result_grams)
        .bind(order.id)
        .fetch_one(&mut *tx)
        .await?
        .into_order()?;

        tx.commit().await?;

        tracing::info!(
            order_id = %updated.id,
            number = %updated.order_number,
            result_grams = %result_grams,
            "Processing result recorded"
        );

        Ok(updated)
    }

    /// Finalize an order with its assayed purity.
    ///
    /// The weighed result splits into recovered pure metal, received
    /// into inventory as a new lot, and residue, which spawns a
    /// business-owned analysis. Linked analyses close as recovered.
    /// Client accounts were already credited at approval and are not
    /// touched here.
    pub async fn finalize_with_purity(
        &self,
        organization_id: Uuid,
        order_id: Uuid,
        input: FinalizeRecoveryInput,
    ) -> AppResult<FinalizedRecovery> {
        if validate_purity(input.purity).is_err() {
            return Err(AppError::Validation {
                field: "purity".to_string(),
                message: "Purity must be a fraction above 0 and at most 1".to_string(),
                message_pt: "A pureza deve ser uma fração acima de 0 e no máximo 1".to_string(),
            });
        }

        let mut tx = self.db.begin().await?;

        let order = fetch_order_for_update_on(&mut tx, organization_id, order_id).await?;
        let next = transition(
            &order,
            RecoveryOrderEvent::FinalizeWithPurity,
            "finalize with purity",
        )?;

        let result_grams = order.processing_result_grams.ok_or_else(|| {
            AppError::InvariantViolation(format!(
                "Recovery order {} has no processing result",
                order.order_number
            ))
        })?;

        let (recovered, residue) = recovery_yield(result_grams, input.purity);

        // The recovered lot carries the day's buy price as its cost, or
        // zero when no quotation has been recorded yet
        let cost_per_unit = latest_on(&mut tx, organization_id, order.metal)
            .await?
            .map(|q| q.buy_price)
            .unwrap_or(Decimal::ZERO);

        let document = format!("Recovery order {}", order.order_number);
        let recovered_lot = receive_on(
            &mut tx,
            organization_id,
            ReceiveSpec {
                product_id: input.output_product_id,
                batch_number: order.order_number.clone(),
                quantity: recovered,
                cost_per_unit,
                source_type: LotSourceType::Recovery,
                source_id: Some(order.id.to_string()),
                source_document: Some(document),
            },
        )
        .await?;

        let residue_analysis_id = if residue > Decimal::ZERO {
            let sequence =
                sqlx::query_scalar::<_, i64>("SELECT next_document_number($1, 'analysis')")
                    .bind(organization_id)
                    .fetch_one(&mut *tx)
                    .await?;
            let analysis_number = format_analysis_number(sequence);

            let id = sqlx::query_scalar::<_, Uuid>(
                r#"
                INSERT INTO chemical_analyses (organization_id, client_id, analysis_number, metal,
                                               description, input_quantity, input_unit, state,
                                               gross_grams, entry_date, residue_of_order_id)
                VALUES ($1, NULL, $2, $3, $4, $5, 'g', 'residue', $5, $6, $7)
                RETURNING id
                "#,
            )
            .bind(organization_id)
            .bind(&analysis_number)
            .bind(order.metal.as_str())
            .bind(format!("Residue from recovery order {}", order.order_number))
            .bind(residue)
            .bind(Utc::now().date_naive())
            .bind(order.id)
            .fetch_one(&mut *tx)
            .await?;

            Some(id)
        } else {
            None
        };

        sqlx::query(
            r#"
            UPDATE chemical_analyses
            SET state = $1, finalized_at = NOW(), updated_at = NOW()
            WHERE recovery_order_id = $2 AND state = $3
            "#,
        )
        .bind(AnalysisState::FinalizedRecovered.as_str())
        .bind(order.id)
        .bind(AnalysisState::InRecovery.as_str())
        .execute(&mut *tx)
        .await?;

        let updated = sqlx::query_as::<_, OrderRow>(
            r#"
            UPDATE recovery_orders
            SET state = $1, purity = $2, recovered_pure_grams = $3, residue_grams = $4,
                residue_analysis_id = $5, finished_at = NOW(), updated_at = NOW()
            WHERE id = $6
            RETURNING id, organization_id, order_number, metal, state, total_estimated_grams,
                      processing_result_grams, purity, recovered_pure_grams, residue_grams,
                      residue_analysis_id, salesperson_id, commission_amount, commission_percent,
                      started_at, finished_at, created_at, updated_at
            "#,
        )
        .bind(next.as_str())
        .bind(input.purity)
        .bind(recovered)
        .bind(residue)
        .bind(residue_analysis_id)
        .bind(order.id)
        .fetch_one(&mut *tx)
        .await?
        .into_order()?;

        tx.commit().await?;

        tracing::info!(
            order_id = %updated.id,
            number = %updated.order_number,
            recovered_grams = %recovered,
            residue_grams = %residue,
            "Recovery order finalized"
        );

        Ok(FinalizedRecovery {
            order: updated,
            recovered_lot,
            residue_analysis_id,
        })
    }

    /// Record a salesperson's commission on an order, restated in grams
    /// at the latest sell price
    pub async fn apply_commission(
        &self,
        organization_id: Uuid,
        order_id: Uuid,
        input: ApplyCommissionInput,
    ) -> AppResult<CommissionPayable> {
        if input.amount <= Decimal::ZERO {
            return Err(AppError::Validation {
                field: "amount".to_string(),
                message: "Commission amount must be positive".to_string(),
                message_pt: "O valor da comissão deve ser positivo".to_string(),
            });
        }
        if let Some(percent) = input.percent {
            if validate_fraction(percent).is_err() {
                return Err(AppError::Validation {
                    field: "percent".to_string(),
                    message: "Commission percent must be a fraction between 0 and 1".to_string(),
                    message_pt: "O percentual de comissão deve ser uma fração entre 0 e 1"
                        .to_string(),
                });
            }
        }

        let mut tx = self.db.begin().await?;

        let order = fetch_order_for_update_on(&mut tx, organization_id, order_id).await?;
        if order.state == RecoveryOrderState::Cancelled {
            return Err(AppError::Conflict {
                resource: "Recovery order".to_string(),
                message: format!(
                    "Order {} is cancelled and cannot carry a commission",
                    order.order_number
                ),
                message_pt: format!(
                    "A ordem {} foi cancelada e não pode ter comissão",
                    order.order_number
                ),
            });
        }

        let quotation = latest_on(&mut tx, organization_id, order.metal)
            .await?
            .ok_or_else(|| AppError::NotFound("Quotation".to_string()))?;
        let gold_equivalent_grams = quotation.grams_for_currency(input.amount, PriceSide::Sell);

        sqlx::query(
            r#"
            UPDATE recovery_orders
            SET salesperson_id = $1, commission_amount = $2, commission_percent = $3,
                updated_at = NOW()
            WHERE id = $4
            "#,
        )
        .bind(input.salesperson_id)
        .bind(input.amount)
        .bind(input.percent)
        .bind(order.id)
        .execute(&mut *tx)
        .await?;

        let commission = sqlx::query_as::<_, CommissionRow>(
            r#"
            INSERT INTO commission_payables (organization_id, order_id, salesperson_id, amount,
                                             percent, metal, gold_equivalent_grams)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, organization_id, order_id, salesperson_id, amount, percent, metal,
                      gold_equivalent_grams, created_at
            "#,
        )
        .bind(organization_id)
        .bind(order.id)
        .bind(input.salesperson_id)
        .bind(input.amount)
        .bind(input.percent)
        .bind(order.metal.as_str())
        .bind(gold_equivalent_grams)
        .fetch_one(&mut *tx)
        .await?
        .into_commission()?;

        tx.commit().await?;

        tracing::info!(
            order_id = %order.id,
            number = %order.order_number,
            amount = %input.amount,
            gold_equivalent_grams = %gold_equivalent_grams,
            "Commission applied"
        );

        Ok(commission)
    }

    /// Cancel an order before finalization.
    ///
    /// Consumed raw material goes back to its lots and linked analyses
    /// return to approved, unlinked, ready for another batch.
    pub async fn cancel(&self, organization_id: Uuid, order_id: Uuid) -> AppResult<RecoveryOrder> {
        let mut tx = self.db.begin().await?;

        let order = fetch_order_for_update_on(&mut tx, organization_id, order_id).await?;
        let next = transition(&order, RecoveryOrderEvent::Cancel, "cancel")?;

        let consumptions = sqlx::query_as::<_, ConsumptionRow>(
            r#"
            SELECT id, order_id, lot_id, grams, cost, gold_equivalent_cost, created_at
            FROM recovery_order_consumptions
            WHERE order_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(order.id)
        .fetch_all(&mut *tx)
        .await?;

        let document = format!("Cancellation of recovery order {}", order.order_number);
        for consumption in &consumptions {
            release_on(
                &mut tx,
                organization_id,
                consumption.lot_id,
                consumption.grams,
                Some(&document),
            )
            .await?;
        }

        sqlx::query(
            r#"
            UPDATE chemical_analyses
            SET state = $1, recovery_order_id = NULL, updated_at = NOW()
            WHERE recovery_order_id = $2 AND state = $3
            "#,
        )
        .bind(AnalysisState::ApprovedForRecovery.as_str())
        .bind(order.id)
        .bind(AnalysisState::InRecovery.as_str())
        .execute(&mut *tx)
        .await?;

        let updated = sqlx::query_as::<_, OrderRow>(
            r#"
            UPDATE recovery_orders
            SET state = $1, updated_at = NOW()
            WHERE id = $2
            RETURNING id, organization_id, order_number, metal, state, total_estimated_grams,
                      processing_result_grams, purity, recovered_pure_grams, residue_grams,
                      residue_analysis_id, salesperson_id, commission_amount, commission_percent,
                      started_at, finished_at, created_at, updated_at
            "#,
        )
        .bind(next.as_str())
        .bind(order.id)
        .fetch_one(&mut *tx)
        .await?
        .into_order()?;

        tx.commit().await?;

        tracing::info!(
            order_id = %updated.id,
            number = %updated.order_number,
            released_lots = consumptions.len(),
            "Recovery order cancelled"
        );

        Ok(updated)
    }

    /// Get an order with its linked analyses and consumptions
    pub async fn get(
        &self,
        organization_id: Uuid,
        order_id: Uuid,
    ) -> AppResult<RecoveryOrderDetail> {
        let order = sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT id, organization_id, order_number, metal, state, total_estimated_grams,
                   processing_result_grams, purity, recovered_pure_grams, residue_grams,
                   residue_analysis_id, salesperson_id, commission_amount, commission_percent,
                   started_at, finished_at, created_at, updated_at
            FROM recovery_orders
            WHERE id = $1 AND organization_id = $2
            "#,
        )
        .bind(order_id)
        .bind(organization_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Recovery order".to_string()))?
        .into_order()?;

        let analysis_ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM chemical_analyses
            WHERE recovery_order_id = $1
            ORDER BY analysis_number ASC
            "#,
        )
        .bind(order.id)
        .fetch_all(&self.db)
        .await?;

        let consumptions = sqlx::query_as::<_, ConsumptionRow>(
            r#"
            SELECT id, order_id, lot_id, grams, cost, gold_equivalent_cost, created_at
            FROM recovery_order_consumptions
            WHERE order_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(order.id)
        .fetch_all(&self.db)
        .await?
        .into_iter()
        .map(ConsumptionRow::into_consumption)
        .collect();

        Ok(RecoveryOrderDetail {
            order,
            analysis_ids,
            consumptions,
        })
    }

    /// List orders for an organization, newest first
    pub async fn list(&self, organization_id: Uuid) -> AppResult<Vec<RecoveryOrder>> {
        let rows = sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT id, organization_id, order_number, metal, state, total_estimated_grams,
                   processing_result_grams, purity, recovered_pure_grams, residue_grams,
                   residue_analysis_id, salesperson_id, commission_amount, commission_percent,
                   started_at, finished_at, created_at, updated_at
            FROM recovery_orders
            WHERE organization_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(organization_id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(OrderRow::into_order).collect()
    }

    /// List commission payables, newest first
    pub async fn list_commissions(
        &self,
        organization_id: Uuid,
    ) -> AppResult<Vec<CommissionPayable>> {
        let rows = sqlx::query_as::<_, CommissionRow>(
            r#"
            SELECT id, organization_id, order_id, salesperson_id, amount, percent, metal,
                   gold_equivalent_grams, created_at
            FROM commission_payables
            WHERE organization_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(organization_id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(CommissionRow::into_commission).collect()
    }
}

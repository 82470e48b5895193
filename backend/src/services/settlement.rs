//! Settlement service: metal receivables, currency deposits, payments
//! in metal and the sale adjustment that reconciles a paid sale

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use shared::models::{
    round_currency, round_grams, EntryKind, InventoryLot, LotSourceType, MetalAccountEntry,
    MetalDeposit, MetalKind, MetalReceivable, MetalReceivablePayment, PriceSide, ReceivableStatus,
    SaleAdjustment,
};
use shared::validation::validate_positive_grams;

use crate::config::RefiningConfig;
use crate::error::{AppError, AppResult};
use crate::services::inventory::{receive_on, ReceiveSpec};
use crate::services::ledger::{credit_on, debit_on, EntrySpec};
use crate::services::quotation::{effective_as_of_on, latest_on};

/// Settlement service
#[derive(Clone)]
pub struct SettlementService {
    db: PgPool,
    defaults: RefiningConfig,
}

/// Input for a client's currency deposit
#[derive(Debug, Deserialize)]
pub struct RecordDepositInput {
    pub client_id: Uuid,
    pub metal: MetalKind,
    /// Currency amount paid in
    pub amount: Decimal,
    pub payment_date: Option<NaiveDate>,
}

/// Input for opening a gram obligation for a sale
#[derive(Debug, Deserialize)]
pub struct CreateReceivableInput {
    pub client_id: Uuid,
    pub metal: MetalKind,
    pub grams: Decimal,
    pub sale_reference: Option<String>,
    /// Falls back to the configured due window when absent
    pub due_date: Option<NaiveDate>,
}

/// Input for a currency payment against a receivable
#[derive(Debug, Deserialize)]
pub struct ApplyPaymentInput {
    pub amount: Decimal,
    pub payment_date: Option<NaiveDate>,
}

/// Input for settling a sale in account grams instead of currency
#[derive(Debug, Deserialize)]
pub struct RecordMetalPaymentInput {
    pub client_id: Uuid,
    pub metal: MetalKind,
    pub grams: Decimal,
    /// Product that receives the surrendered grams
    pub product_id: Uuid,
    pub sale_reference: String,
}

/// Outcome of applying a currency payment
#[derive(Debug, Clone, Serialize)]
pub struct ReceivablePaymentOutcome {
    pub receivable: MetalReceivable,
    pub payment: MetalReceivablePayment,
    /// Grams bought beyond the remainder, credited as a deposit
    pub overpayment_grams: Decimal,
}

/// Outcome of a payment made in account grams
#[derive(Debug, Clone, Serialize)]
pub struct MetalPaymentOutcome {
    pub entry: MetalAccountEntry,
    pub lot: InventoryLot,
}

/// Database row for a metal receivable
#[derive(Debug, FromRow)]
struct ReceivableRow {
    id: Uuid,
    organization_id: Uuid,
    client_id: Uuid,
    metal: String,
    grams: Decimal,
    remaining_grams: Decimal,
    status: String,
    sale_reference: Option<String>,
    due_date: Option<NaiveDate>,
    costs: Decimal,
    received_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ReceivableRow {
    fn into_receivable(self) -> AppResult<MetalReceivable> {
        let metal = MetalKind::from_str(&self.metal)
            .ok_or_else(|| AppError::Internal(format!("Unknown metal kind: {}", self.metal)))?;
        let status = ReceivableStatus::from_str(&self.status).ok_or_else(|| {
            AppError::Internal(format!("Unknown receivable status: {}", self.status))
        })?;

        Ok(MetalReceivable {
            id: self.id,
            organization_id: self.organization_id,
            client_id: self.client_id,
            metal,
            grams: self.grams,
            remaining_grams: self.remaining_grams,
            status,
            sale_reference: self.sale_reference,
            due_date: self.due_date,
            costs: self.costs,
            received_at: self.received_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Database row for a receivable payment
#[derive(Debug, FromRow)]
struct PaymentRow {
    id: Uuid,
    receivable_id: Uuid,
    paid_amount: Decimal,
    quotation_id: Uuid,
    sell_price_used: Decimal,
    grams_credited: Decimal,
    payment_date: NaiveDate,
    created_at: DateTime<Utc>,
}

impl PaymentRow {
    fn into_payment(self) -> MetalReceivablePayment {
        MetalReceivablePayment {
            id: self.id,
            receivable_id: self.receivable_id,
            paid_amount: self.paid_amount,
            quotation_id: self.quotation_id,
            sell_price_used: self.sell_price_used,
            grams_credited: self.grams_credited,
            payment_date: self.payment_date,
            created_at: self.created_at,
        }
    }
}

/// Database row for a deposit
#[derive(Debug, FromRow)]
struct DepositRow {
    id: Uuid,
    organization_id: Uuid,
    client_id: Uuid,
    metal: String,
    paid_amount: Decimal,
    quotation_id: Uuid,
    sell_price_used: Decimal,
    grams_credited: Decimal,
    payment_date: NaiveDate,
    created_at: DateTime<Utc>,
}

impl DepositRow {
    fn into_deposit(self) -> AppResult<MetalDeposit> {
        let metal = MetalKind::from_str(&self.metal)
            .ok_or_else(|| AppError::Internal(format!("Unknown metal kind: {}", self.metal)))?;

        Ok(MetalDeposit {
            id: self.id,
            organization_id: self.organization_id,
            client_id: self.client_id,
            metal,
            paid_amount: self.paid_amount,
            quotation_id: self.quotation_id,
            sell_price_used: self.sell_price_used,
            grams_credited: self.grams_credited,
            payment_date: self.payment_date,
            created_at: self.created_at,
        })
    }
}

/// Database row for a sale adjustment
#[derive(Debug, FromRow)]
struct AdjustmentRow {
    id: Uuid,
    organization_id: Uuid,
    receivable_id: Uuid,
    payment_received: Decimal,
    payment_equivalent_grams: Decimal,
    implied_price: Option<Decimal>,
    expected_grams: Decimal,
    gross_discrepancy_grams: Decimal,
    costs: Decimal,
    costs_in_grams: Decimal,
    net_discrepancy_grams: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AdjustmentRow {
    fn into_adjustment(self) -> SaleAdjustment {
        SaleAdjustment {
            id: self.id,
            organization_id: self.organization_id,
            receivable_id: self.receivable_id,
            payment_received: self.payment_received,
            payment_equivalent_grams: self.payment_equivalent_grams,
            implied_price: self.implied_price,
            expected_grams: self.expected_grams,
            gross_discrepancy_grams: self.gross_discrepancy_grams,
            costs: self.costs,
            costs_in_grams: self.costs_in_grams,
            net_discrepancy_grams: self.net_discrepancy_grams,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

async fn fetch_receivable_for_update_on(
    conn: &mut PgConnection,
    organization_id: Uuid,
    receivable_id: Uuid,
) -> AppResult<MetalReceivable> {
    sqlx::query_as::<_, ReceivableRow>(
        r#"
        SELECT id, organization_id, client_id, metal, grams, remaining_grams, status,
               sale_reference, due_date, costs, received_at, created_at, updated_at
        FROM metal_receivables
        WHERE id = $1 AND organization_id = $2
        FOR UPDATE
        "#,
    )
    .bind(receivable_id)
    .bind(organization_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Metal receivable".to_string()))?
    .into_receivable()
}

/// Recompute and upsert the sale adjustment for a fully paid
/// receivable.
///
/// The adjustment compares the grams the payments actually bought
/// against the grams the sale promised, restating the sale's currency
/// costs at the average price the payments implied.
async fn upsert_sale_adjustment_on(
    conn: &mut PgConnection,
    organization_id: Uuid,
    receivable: &MetalReceivable,
) -> AppResult<SaleAdjustment> {
    let (payment_received, payment_equivalent_grams) = sqlx::query_as::<_, (Decimal, Decimal)>(
        r#"
        SELECT COALESCE(SUM(paid_amount), 0), COALESCE(SUM(grams_credited), 0)
        FROM metal_receivable_payments
        WHERE receivable_id = $1
        "#,
    )
    .bind(receivable.id)
    .fetch_one(&mut *conn)
    .await?;

    let implied_price = if payment_equivalent_grams > Decimal::ZERO {
        Some(round_currency(payment_received / payment_equivalent_grams))
    } else {
        None
    };

    let gross_discrepancy_grams = payment_equivalent_grams - receivable.grams;
    let costs_in_grams = match implied_price {
        Some(price) if price > Decimal::ZERO => round_grams(receivable.costs / price),
        _ => Decimal::ZERO,
    };
    let net_discrepancy_grams = gross_discrepancy_grams - costs_in_grams;

    let adjustment = sqlx::query_as::<_, AdjustmentRow>(
        r#"
        INSERT INTO sale_adjustments (organization_id, receivable_id, payment_received,
                                      payment_equivalent_grams, implied_price, expected_grams,
                                      gross_discrepancy_grams, costs, costs_in_grams,
                                      net_discrepancy_grams)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (receivable_id) DO UPDATE
        SET payment_received = EXCLUDED.payment_received,
            payment_equivalent_grams = EXCLUDED.payment_equivalent_grams,
            implied_price = EXCLUDED.implied_price,
            expected_grams = EXCLUDED.expected_grams,
            gross_discrepancy_grams = EXCLUDED.gross_discrepancy_grams,
            costs = EXCLUDED.costs,
            costs_in_grams = EXCLUDED.costs_in_grams,
            net_discrepancy_grams = EXCLUDED.net_discrepancy_grams,
            updated_at = NOW()
        RETURNING id, organization_id, receivable_id, payment_received, payment_equivalent_grams,
                  implied_price, expected_grams, gross_discrepancy_grams, costs, costs_in_grams,
                  net_discrepancy_grams, created_at, updated_at
        "#,
    )
    .bind(organization_id)
    .bind(receivable.id)
    .bind(payment_received)
    .bind(payment_equivalent_grams)
    .bind(implied_price)
    .bind(receivable.grams)
    .bind(gross_discrepancy_grams)
    .bind(receivable.costs)
    .bind(costs_in_grams)
    .bind(net_discrepancy_grams)
    .fetch_one(&mut *conn)
    .await?;

    Ok(adjustment.into_adjustment())
}

impl SettlementService {
    /// Create a new SettlementService instance
    pub fn new(db: PgPool, defaults: RefiningConfig) -> Self {
        Self { db, defaults }
    }

    /// Convert a client's currency deposit into account grams at the
    /// sell price effective on the payment date
    pub async fn record_deposit(
        &self,
        organization_id: Uuid,
        input: RecordDepositInput,
    ) -> AppResult<MetalDeposit> {
        if input.amount <= Decimal::ZERO {
            return Err(AppError::Validation {
                field: "amount".to_string(),
                message: "Deposit amount must be positive".to_string(),
                message_pt: "O valor do depósito deve ser positivo".to_string(),
            });
        }

        let payment_date = input.payment_date.unwrap_or_else(|| Utc::now().date_naive());

        let mut tx = self.db.begin().await?;

        let quotation =
            effective_as_of_on(&mut tx, organization_id, input.metal, payment_date).await?;
        let grams = quotation.grams_for_currency(input.amount, PriceSide::Sell);
        if grams <= Decimal::ZERO {
            return Err(AppError::Validation {
                field: "amount".to_string(),
                message: "Amount is too small to buy any metal at the effective price".to_string(),
                message_pt: "O valor é pequeno demais para comprar metal na cotação vigente"
                    .to_string(),
            });
        }

        let deposit = sqlx::query_as::<_, DepositRow>(
            r#"
            INSERT INTO metal_deposits (organization_id, client_id, metal, paid_amount,
                                        quotation_id, sell_price_used, grams_credited, payment_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, organization_id, client_id, metal, paid_amount, quotation_id,
                      sell_price_used, grams_credited, payment_date, created_at
            "#,
        )
        .bind(organization_id)
        .bind(input.client_id)
        .bind(input.metal.as_str())
        .bind(input.amount)
        .bind(quotation.id)
        .bind(quotation.sell_price)
        .bind(grams)
        .bind(payment_date)
        .fetch_one(&mut *tx)
        .await?
        .into_deposit()?;

        credit_on(
            &mut tx,
            organization_id,
            EntrySpec {
                client_id: input.client_id,
                metal: input.metal,
                grams,
                kind: EntryKind::Deposit,
                description: format!("Deposit of {} BRL", input.amount),
                source_reference: Some(deposit.id.to_string()),
                entry_date: payment_date,
            },
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            deposit_id = %deposit.id,
            client_id = %deposit.client_id,
            amount = %deposit.paid_amount,
            grams = %deposit.grams_credited,
            "Deposit recorded"
        );

        Ok(deposit)
    }

    /// Open a gram obligation for a sale
    pub async fn create_receivable(
        &self,
        organization_id: Uuid,
        input: CreateReceivableInput,
    ) -> AppResult<MetalReceivable> {
        if validate_positive_grams(input.grams).is_err() {
            return Err(AppError::Validation {
                field: "grams".to_string(),
                message: "Receivable grams must be positive".to_string(),
                message_pt: "As gramas a receber devem ser positivas".to_string(),
            });
        }

        let due_date = input.due_date.unwrap_or_else(|| {
            Utc::now().date_naive() + Duration::days(self.defaults.receivable_due_days)
        });

        let receivable = sqlx::query_as::<_, ReceivableRow>(
            r#"
            INSERT INTO metal_receivables (organization_id, client_id, metal, grams,
                                           remaining_grams, status, sale_reference, due_date)
            VALUES ($1, $2, $3, $4, $4, 'pending', $5, $6)
            RETURNING id, organization_id, client_id, metal, grams, remaining_grams, status,
                      sale_reference, due_date, costs, received_at, created_at, updated_at
            "#,
        )
        .bind(organization_id)
        .bind(input.client_id)
        .bind(input.metal.as_str())
        .bind(input.grams)
        .bind(&input.sale_reference)
        .bind(due_date)
        .fetch_one(&self.db)
        .await?
        .into_receivable()?;

        tracing::info!(
            receivable_id = %receivable.id,
            client_id = %receivable.client_id,
            grams = %receivable.grams,
            "Receivable created"
        );

        Ok(receivable)
    }

    /// Apply a currency payment against a receivable.
    ///
    /// The payment buys grams at the sell price effective on the
    /// payment date; grams beyond the remainder are credited to the
    /// client's account as a deposit. A receivable that reaches paid
    /// gets its sale adjustment computed in the same transaction.
    pub async fn apply_receivable_payment(
        &self,
        organization_id: Uuid,
        receivable_id: Uuid,
        input: ApplyPaymentInput,
    ) -> AppResult<ReceivablePaymentOutcome> {
        if input.amount <= Decimal::ZERO {
            return Err(AppError::Validation {
                field: "amount".to_string(),
                message: "Payment amount must be positive".to_string(),
                message_pt: "O valor do pagamento deve ser positivo".to_string(),
            });
        }

        let payment_date = input.payment_date.unwrap_or_else(|| Utc::now().date_naive());

        let mut tx = self.db.begin().await?;

        let receivable =
            fetch_receivable_for_update_on(&mut tx, organization_id, receivable_id).await?;
        if receivable.status == ReceivableStatus::Paid {
            return Err(AppError::AlreadySettled(format!(
                "Receivable {} is already paid",
                receivable.id
            )));
        }

        let quotation =
            effective_as_of_on(&mut tx, organization_id, receivable.metal, payment_date).await?;
        let paid_grams = quotation.grams_for_currency(input.amount, PriceSide::Sell);
        let applied = paid_grams.min(receivable.remaining_grams);
        let overpayment_grams = paid_grams - applied;

        let payment = sqlx::query_as::<_, PaymentRow>(
            r#"
            INSERT INTO metal_receivable_payments (receivable_id, paid_amount, quotation_id,
                                                   sell_price_used, grams_credited, payment_date)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, receivable_id, paid_amount, quotation_id, sell_price_used,
                      grams_credited, payment_date, created_at
            "#,
        )
        .bind(receivable.id)
        .bind(input.amount)
        .bind(quotation.id)
        .bind(quotation.sell_price)
        .bind(paid_grams)
        .bind(payment_date)
        .fetch_one(&mut *tx)
        .await?
        .into_payment();

        if overpayment_grams > Decimal::ZERO {
            credit_on(
                &mut tx,
                organization_id,
                EntrySpec {
                    client_id: receivable.client_id,
                    metal: receivable.metal,
                    grams: overpayment_grams,
                    kind: EntryKind::Deposit,
                    description: format!("Overpayment on receivable {}", receivable.id),
                    source_reference: Some(payment.id.to_string()),
                    entry_date: payment_date,
                },
            )
            .await?;
        }

        let remaining = receivable.remaining_grams - applied;
        let status = ReceivableStatus::after_payment(remaining);

        let updated = if status == ReceivableStatus::Paid {
            sqlx::query_as::<_, ReceivableRow>(
                r#"
                UPDATE metal_receivables
                SET remaining_grams = $1, status = $2, received_at = NOW(), updated_at = NOW()
                WHERE id = $3
                RETURNING id, organization_id, client_id, metal, grams, remaining_grams, status,
                          sale_reference, due_date, costs, received_at, created_at, updated_at
                "#,
            )
            .bind(remaining)
            .bind(status.as_str())
            .bind(receivable.id)
            .fetch_one(&mut *tx)
            .await?
            .into_receivable()?
        } else {
            sqlx::query_as::<_, ReceivableRow>(
                r#"
                UPDATE metal_receivables
                SET remaining_grams = $1, status = $2, updated_at = NOW()
                WHERE id = $3
                RETURNING id, organization_id, client_id, metal, grams, remaining_grams, status,
                          sale_reference, due_date, costs, received_at, created_at, updated_at
                "#,
            )
            .bind(remaining)
            .bind(status.as_str())
            .bind(receivable.id)
            .fetch_one(&mut *tx)
            .await?
            .into_receivable()?
        };

        if updated.status == ReceivableStatus::Paid {
            upsert_sale_adjustment_on(&mut tx, organization_id, &updated).await?;
        }

        tx.commit().await?;

        tracing::info!(
            receivable_id = %updated.id,
            amount = %input.amount,
            applied_grams = %applied,
            overpayment_grams = %overpayment_grams,
            status = %updated.status.as_str(),
            "Receivable payment applied"
        );

        Ok(ReceivablePaymentOutcome {
            receivable: updated,
            payment,
            overpayment_grams,
        })
    }

    /// Settle a sale in account grams instead of currency.
    ///
    /// The client's account is debited without overdraft and the
    /// surrendered grams enter inventory as a new lot priced at the
    /// latest sell price.
    pub async fn record_sale_metal_payment(
        &self,
        organization_id: Uuid,
        input: RecordMetalPaymentInput,
    ) -> AppResult<MetalPaymentOutcome> {
        if validate_positive_grams(input.grams).is_err() {
            return Err(AppError::Validation {
                field: "grams".to_string(),
                message: "Payment grams must be positive".to_string(),
                message_pt: "As gramas do pagamento devem ser positivas".to_string(),
            });
        }
        if input.sale_reference.trim().is_empty() {
            return Err(AppError::Validation {
                field: "sale_reference".to_string(),
                message: "Sale reference must not be empty".to_string(),
                message_pt: "A referência da venda não pode estar vazia".to_string(),
            });
        }

        let mut tx = self.db.begin().await?;

        let entry = debit_on(
            &mut tx,
            organization_id,
            EntrySpec {
                client_id: input.client_id,
                metal: input.metal,
                grams: input.grams,
                kind: EntryKind::SalePayment,
                description: format!("Payment in metal for {}", input.sale_reference),
                source_reference: Some(input.sale_reference.clone()),
                entry_date: Utc::now().date_naive(),
            },
            false,
        )
        .await?;

        let cost_per_unit = latest_on(&mut tx, organization_id, input.metal)
            .await?
            .map(|q| q.sell_price)
            .unwrap_or(Decimal::ZERO);

        let lot = receive_on(
            &mut tx,
            organization_id,
            ReceiveSpec {
                product_id: input.product_id,
                batch_number: input.sale_reference.clone(),
                quantity: input.grams,
                cost_per_unit,
                source_type: LotSourceType::SalePayment,
                source_id: Some(entry.id.to_string()),
                source_document: Some(input.sale_reference.clone()),
            },
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            client_id = %input.client_id,
            grams = %input.grams,
            lot_id = %lot.id,
            reference = %input.sale_reference,
            "Sale settled in metal"
        );

        Ok(MetalPaymentOutcome { entry, lot })
    }

    /// Record or revise the currency costs attributed to a sale.
    ///
    /// On a fully paid receivable the sale adjustment is recomputed
    /// with the new costs.
    pub async fn record_sale_costs(
        &self,
        organization_id: Uuid,
        receivable_id: Uuid,
        costs: Decimal,
    ) -> AppResult<MetalReceivable> {
        if costs < Decimal::ZERO {
            return Err(AppError::Validation {
                field: "costs".to_string(),
                message: "Costs cannot be negative".to_string(),
                message_pt: "Os custos não podem ser negativos".to_string(),
            });
        }

        let mut tx = self.db.begin().await?;

        fetch_receivable_for_update_on(&mut tx, organization_id, receivable_id).await?;

        let updated = sqlx::query_as::<_, ReceivableRow>(
            r#"
            UPDATE metal_receivables
            SET costs = $1, updated_at = NOW()
            WHERE id = $2
            RETURNING id, organization_id, client_id, metal, grams, remaining_grams, status,
                      sale_reference, due_date, costs, received_at, created_at, updated_at
            "#,
        )
        .bind(costs)
        .bind(receivable_id)
        .fetch_one(&mut *tx)
        .await?
        .into_receivable()?;

        if updated.status == ReceivableStatus::Paid {
            upsert_sale_adjustment_on(&mut tx, organization_id, &updated).await?;
        }

        tx.commit().await?;

        Ok(updated)
    }

    /// Get a receivable by id
    pub async fn get_receivable(
        &self,
        organization_id: Uuid,
        receivable_id: Uuid,
    ) -> AppResult<MetalReceivable> {
        let row = sqlx::query_as::<_, ReceivableRow>(
            r#"
            SELECT id, organization_id, client_id, metal, grams, remaining_grams, status,
                   sale_reference, due_date, costs, received_at, created_at, updated_at
            FROM metal_receivables
            WHERE id = $1 AND organization_id = $2
            "#,
        )
        .bind(receivable_id)
        .bind(organization_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Metal receivable".to_string()))?;

        row.into_receivable()
    }

    /// List receivables for an organization, newest first
    pub async fn list_receivables(
        &self,
        organization_id: Uuid,
    ) -> AppResult<Vec<MetalReceivable>> {
        let rows = sqlx::query_as::<_, ReceivableRow>(
            r#"
            SELECT id, organization_id, client_id, metal, grams, remaining_grams, status,
                   sale_reference, due_date, costs, received_at, created_at, updated_at
            FROM metal_receivables
            WHERE organization_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(organization_id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(ReceivableRow::into_receivable).collect()
    }

    /// List open receivables ordered by due date, soonest first
    pub async fn list_open_receivables(
        &self,
        organization_id: Uuid,
    ) -> AppResult<Vec<MetalReceivable>> {
        let rows = sqlx::query_as::<_, ReceivableRow>(
            r#"
            SELECT id, organization_id, client_id, metal, grams, remaining_grams, status,
                   sale_reference, due_date, costs, received_at, created_at, updated_at
            FROM metal_receivables
            WHERE organization_id = $1 AND status IN ('pending', 'partially_paid')
            ORDER BY due_date ASC NULLS LAST, created_at ASC
            "#,
        )
        .bind(organization_id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(ReceivableRow::into_receivable).collect()
    }

    /// List the payments applied against a receivable, oldest first
    pub async fn list_payments(
        &self,
        organization_id: Uuid,
        receivable_id: Uuid,
    ) -> AppResult<Vec<MetalReceivablePayment>> {
        self.get_receivable(organization_id, receivable_id).await?;

        let rows = sqlx::query_as::<_, PaymentRow>(
            r#"
            SELECT id, receivable_id, paid_amount, quotation_id, sell_price_used,
                   grams_credited, payment_date, created_at
            FROM metal_receivable_payments
            WHERE receivable_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(receivable_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(PaymentRow::into_payment).collect())
    }

    /// List a client's deposits, newest first
    pub async fn list_deposits(
        &self,
        organization_id: Uuid,
        client_id: Uuid,
    ) -> AppResult<Vec<MetalDeposit>> {
        let rows = sqlx::query_as::<_, DepositRow>(
            r#"
            SELECT id, organization_id, client_id, metal, paid_amount, quotation_id,
                   sell_price_used, grams_credited, payment_date, created_at
            FROM metal_deposits
            WHERE organization_id = $1 AND client_id = $2
            ORDER BY created_at DESC
            "#,
        )
        .bind(organization_id)
        .bind(client_id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(DepositRow::into_deposit).collect()
    }

    /// Get the sale adjustment for a fully paid receivable.
    ///
    /// Not found until the receivable reaches paid.
    pub async fn sale_adjustment(
        &self,
        organization_id: Uuid,
        receivable_id: Uuid,
    ) -> AppResult<SaleAdjustment> {
        let row = sqlx::query_as::<_, AdjustmentRow>(
            r#"
            SELECT id, organization_id, receivable_id, payment_received, payment_equivalent_grams,
                   implied_price, expected_grams, gross_discrepancy_grams, costs, costs_in_grams,
                   net_discrepancy_grams, created_at, updated_at
            FROM sale_adjustments
            WHERE receivable_id = $1 AND organization_id = $2
            "#,
        )
        .bind(receivable_id)
        .bind(organization_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Sale adjustment".to_string()))?;

        Ok(row.into_adjustment())
    }
}

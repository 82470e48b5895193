//! Chemical analysis service: intake, measured results, client approval
//! and residue write-off

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use shared::models::{
    analysis_next_state, compute_estimates, format_analysis_number, round_currency, AnalysisEvent,
    AnalysisState, ChemicalAnalysis, EntryKind, MetalKind,
};
use shared::validation::{validate_fraction, validate_positive_grams};

use crate::config::RefiningConfig;
use crate::error::{AppError, AppResult};
use crate::services::ledger::{credit_on, debit_on, EntrySpec};
use crate::services::quotation::latest_on;

/// Chemical analysis service
#[derive(Clone)]
pub struct AnalysisService {
    db: PgPool,
    defaults: RefiningConfig,
}

/// Input for registering received client material
#[derive(Debug, Deserialize)]
pub struct RegisterAnalysisInput {
    pub client_id: Uuid,
    pub metal: MetalKind,
    pub description: String,
    pub input_quantity: Decimal,
    pub input_unit: Option<String>,
    pub entry_date: Option<NaiveDate>,
}

/// Input for recording a measured analysis result
#[derive(Debug, Deserialize)]
pub struct EnterResultInput {
    /// Measured metal content per input unit
    pub result_value: Decimal,
    pub result_unit: Option<String>,
    /// Fraction in [0, 1]; the configured default applies when absent
    pub break_percent: Option<Decimal>,
    /// Fraction in [0, 1]; the configured default applies when absent
    pub service_fee_percent: Option<Decimal>,
}

/// Outcome of writing off a residue analysis
#[derive(Debug, Clone, Serialize)]
pub struct ResidueWriteOff {
    pub analysis: ChemicalAnalysis,
    pub grams_written_off: Decimal,
    /// Sell price used to value the loss
    pub sell_price: Decimal,
    pub estimated_loss: Decimal,
}

/// Database row for a chemical analysis
#[derive(Debug, FromRow)]
struct AnalysisRow {
    id: Uuid,
    organization_id: Uuid,
    client_id: Option<Uuid>,
    analysis_number: String,
    metal: String,
    description: String,
    input_quantity: Decimal,
    input_unit: String,
    state: String,
    result_value: Option<Decimal>,
    result_unit: Option<String>,
    break_percent: Option<Decimal>,
    service_fee_percent: Option<Decimal>,
    gross_grams: Option<Decimal>,
    gross_recoverable_grams: Option<Decimal>,
    service_fee_grams: Option<Decimal>,
    net_to_client_grams: Option<Decimal>,
    entry_date: NaiveDate,
    started_at: Option<DateTime<Utc>>,
    result_entered_at: Option<DateTime<Utc>>,
    approved_at: Option<DateTime<Utc>>,
    refused_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    finalized_at: Option<DateTime<Utc>>,
    written_off: bool,
    recovery_order_id: Option<Uuid>,
    residue_of_order_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AnalysisRow {
    fn into_analysis(self) -> AppResult<ChemicalAnalysis> {
        let metal = MetalKind::from_str(&self.metal)
            .ok_or_else(|| AppError::Internal(format!("Unknown metal kind: {}", self.metal)))?;
        let state = AnalysisState::from_str(&self.state)
            .ok_or_else(|| AppError::Internal(format!("Unknown analysis state: {}", self.state)))?;

        Ok(ChemicalAnalysis {
            id: self.id,
            organization_id: self.organization_id,
            client_id: self.client_id,
            analysis_number: self.analysis_number,
            metal,
            description: self.description,
            input_quantity: self.input_quantity,
            input_unit: self.input_unit,
            state,
            result_value: self.result_value,
            result_unit: self.result_unit,
            break_percent: self.break_percent,
            service_fee_percent: self.service_fee_percent,
            gross_grams: self.gross_grams,
            gross_recoverable_grams: self.gross_recoverable_grams,
            service_fee_grams: self.service_fee_grams,
            net_to_client_grams: self.net_to_client_grams,
            entry_date: self.entry_date,
            started_at: self.started_at,
            result_entered_at: self.result_entered_at,
            approved_at: self.approved_at,
            refused_at: self.refused_at,
            cancelled_at: self.cancelled_at,
            finalized_at: self.finalized_at,
            written_off: self.written_off,
            recovery_order_id: self.recovery_order_id,
            residue_of_order_id: self.residue_of_order_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Resolve the legal next state for an event, or fail with the
/// operation name the caller attempted
fn transition(
    analysis: &ChemicalAnalysis,
    event: AnalysisEvent,
    operation: &str,
) -> AppResult<AnalysisState> {
    analysis_next_state(analysis.state, event).ok_or_else(|| AppError::IllegalStateTransition {
        entity: format!("Chemical analysis {}", analysis.analysis_number),
        from: analysis.state.as_str().to_string(),
        operation: operation.to_string(),
    })
}

/// Fetch an analysis with a row lock inside an open transaction
pub(crate) async fn fetch_analysis_for_update_on(
    conn: &mut PgConnection,
    organization_id: Uuid,
    analysis_id: Uuid,
) -> AppResult<ChemicalAnalysis> {
    sqlx::query_as::<_, AnalysisRow>(
        r#"
        SELECT id, organization_id, client_id, analysis_number, metal, description,
               input_quantity, input_unit, state, result_value, result_unit,
               break_percent, service_fee_percent, gross_grams, gross_recoverable_grams,
               service_fee_grams, net_to_client_grams, entry_date, started_at,
               result_entered_at, approved_at, refused_at, cancelled_at, finalized_at,
               written_off, recovery_order_id, residue_of_order_id, created_at, updated_at
        FROM chemical_analyses
        WHERE id = $1 AND organization_id = $2
        FOR UPDATE
        "#,
    )
    .bind(analysis_id)
    .bind(organization_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Chemical analysis".to_string()))?
    .into_analysis()
}

impl AnalysisService {
    /// Create a new AnalysisService instance
    pub fn new(db: PgPool, defaults: RefiningConfig) -> Self {
        Self { db, defaults }
    }

    /// Register received client material as a new analysis
    pub async fn register(
        &self,
        organization_id: Uuid,
        input: RegisterAnalysisInput,
    ) -> AppResult<ChemicalAnalysis> {
        if input.description.trim().is_empty() {
            return Err(AppError::Validation {
                field: "description".to_string(),
                message: "Description must not be empty".to_string(),
                message_pt: "A descrição não pode estar vazia".to_string(),
            });
        }
        if validate_positive_grams(input.input_quantity).is_err() {
            return Err(AppError::Validation {
                field: "input_quantity".to_string(),
                message: "Input quantity must be positive".to_string(),
                message_pt: "A quantidade de entrada deve ser positiva".to_string(),
            });
        }

        let input_unit = input.input_unit.unwrap_or_else(|| "g".to_string());
        let entry_date = input.entry_date.unwrap_or_else(|| Utc::now().date_naive());

        let mut tx = self.db.begin().await?;

        let sequence =
            sqlx::query_scalar::<_, i64>("SELECT next_document_number($1, 'analysis')")
                .bind(organization_id)
                .fetch_one(&mut *tx)
                .await?;
        let analysis_number = format_analysis_number(sequence);

        let analysis = sqlx::query_as::<_, AnalysisRow>(
            r#"
            INSERT INTO chemical_analyses (organization_id, client_id, analysis_number, metal,
                                           description, input_quantity, input_unit, state, entry_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'received', $8)
            RETURNING id, organization_id, client_id, analysis_number, metal, description,
                      input_quantity, input_unit, state, result_value, result_unit,
                      break_percent, service_fee_percent, gross_grams, gross_recoverable_grams,
                      service_fee_grams, net_to_client_grams, entry_date, started_at,
                      result_entered_at, approved_at, refused_at, cancelled_at, finalized_at,
                      written_off, recovery_order_id, residue_of_order_id, created_at, updated_at
            "#,
        )
        .bind(organization_id)
        .bind(input.client_id)
        .bind(&analysis_number)
        .bind(input.metal.as_str())
        .bind(&input.description)
        .bind(input.input_quantity)
        .bind(&input_unit)
        .bind(entry_date)
        .fetch_one(&mut *tx)
        .await?
        .into_analysis()?;

        tx.commit().await?;

        tracing::info!(
            analysis_id = %analysis.id,
            number = %analysis.analysis_number,
            metal = %analysis.metal.as_str(),
            "Analysis registered"
        );

        Ok(analysis)
    }

    /// Move an analysis from the intake queue onto the bench
    pub async fn start_analysis(
        &self,
        organization_id: Uuid,
        analysis_id: Uuid,
    ) -> AppResult<ChemicalAnalysis> {
        let mut tx = self.db.begin().await?;

        let analysis = fetch_analysis_for_update_on(&mut tx, organization_id, analysis_id).await?;
        let next = transition(&analysis, AnalysisEvent::StartAnalysis, "start analysis")?;

        let updated = sqlx::query_as::<_, AnalysisRow>(
            r#"
            UPDATE chemical_analyses
            SET state = $1, started_at = NOW(), updated_at = NOW()
            WHERE id = $2
            RETURNING id, organization_id, client_id, analysis_number, metal, description,
                      input_quantity, input_unit, state, result_value, result_unit,
                      break_percent, service_fee_percent, gross_grams, gross_recoverable_grams,
                      service_fee_grams, net_to_client_grams, entry_date, started_at,
                      result_entered_at, approved_at, refused_at, cancelled_at, finalized_at,
                      written_off, recovery_order_id, residue_of_order_id, created_at, updated_at
            "#,
        )
        .bind(next.as_str())
        .bind(analysis.id)
        .fetch_one(&mut *tx)
        .await?
        .into_analysis()?;

        tx.commit().await?;

        Ok(updated)
    }

    /// Record the measured result and compute the estimate chain.
    ///
    /// The analysis moves to awaiting client approval; the fee and net
    /// figures always reconstruct the recoverable amount exactly.
    pub async fn enter_result(
        &self,
        organization_id: Uuid,
        analysis_id: Uuid,
        input: EnterResultInput,
    ) -> AppResult<ChemicalAnalysis> {
        if input.result_value <= Decimal::ZERO {
            return Err(AppError::Validation {
                field: "result_value".to_string(),
                message: "Result value must be positive".to_string(),
                message_pt: "O valor do resultado deve ser positivo".to_string(),
            });
        }

        let break_percent = input
            .break_percent
            .unwrap_or(self.defaults.default_break_percent);
        if validate_fraction(break_percent).is_err() {
            return Err(AppError::Validation {
                field: "break_percent".to_string(),
                message: "Break percent must be a fraction between 0 and 1".to_string(),
                message_pt: "O percentual de quebra deve ser uma fração entre 0 e 1".to_string(),
            });
        }

        let service_fee_percent = input
            .service_fee_percent
            .unwrap_or(self.defaults.default_service_fee_percent);
        if validate_fraction(service_fee_percent).is_err() {
            return Err(AppError::Validation {
                field: "service_fee_percent".to_string(),
                message: "Service fee percent must be a fraction between 0 and 1".to_string(),
                message_pt: "O percentual de serviço deve ser uma fração entre 0 e 1".to_string(),
            });
        }

        let result_unit = input.result_unit.unwrap_or_else(|| "g/g".to_string());

        let mut tx = self.db.begin().await?;

        let analysis = fetch_analysis_for_update_on(&mut tx, organization_id, analysis_id).await?;
        let next = transition(&analysis, AnalysisEvent::EnterResult, "enter result")?;

        let estimates = compute_estimates(
            analysis.input_quantity,
            input.result_value,
            break_percent,
            service_fee_percent,
        );

        let updated = sqlx::query_as::<_, AnalysisRow>(
            r#"
            UPDATE chemical_analyses
            SET state = $1, result_value = $2, result_unit = $3, break_percent = $4,
                service_fee_percent = $5, gross_grams = $6, gross_recoverable_grams = $7,
                service_fee_grams = $8, net_to_client_grams = $9,
                result_entered_at = NOW(), updated_at = NOW()
            WHERE id = $10
            RETURNING id, organization_id, client_id, analysis_number, metal, description,
                      input_quantity, input_unit, state, result_value, result_unit,
                      break_percent, service_fee_percent, gross_grams, gross_recoverable_grams,
                      service_fee_grams, net_to_client_grams, entry_date, started_at,
                      result_entered_at, approved_at, refused_at, cancelled_at, finalized_at,
                      written_off, recovery_order_id, residue_of_order_id, created_at, updated_at
            "#,
        )
        .bind(next.as_str())
        .bind(input.result_value)
        .bind(&result_unit)
        .bind(break_percent)
        .bind(service_fee_percent)
        .bind(estimates.gross_grams)
        .bind(estimates.gross_recoverable_grams)
        .bind(estimates.service_fee_grams)
        .bind(estimates.net_to_client_grams)
        .bind(analysis.id)
        .fetch_one(&mut *tx)
        .await?
        .into_analysis()?;

        tx.commit().await?;

        tracing::info!(
            analysis_id = %updated.id,
            number = %updated.analysis_number,
            net_grams = %estimates.net_to_client_grams,
            "Analysis result entered"
        );

        Ok(updated)
    }

    /// Record the client's approval and credit their metal account.
    ///
    /// The net estimate is credited in the same transaction as the
    /// state change; a zero or negative net approves without an entry.
    pub async fn approve(
        &self,
        organization_id: Uuid,
        analysis_id: Uuid,
    ) -> AppResult<ChemicalAnalysis> {
        let mut tx = self.db.begin().await?;

        let analysis = fetch_analysis_for_update_on(&mut tx, organization_id, analysis_id).await?;
        let next = transition(&analysis, AnalysisEvent::Approve, "approve")?;

        let net = analysis.net_to_client_grams.unwrap_or(Decimal::ZERO);
        if net > Decimal::ZERO {
            let client_id = analysis.client_id.ok_or_else(|| {
                AppError::InvariantViolation(format!(
                    "Analysis {} has no client to credit",
                    analysis.analysis_number
                ))
            })?;

            credit_on(
                &mut tx,
                organization_id,
                EntrySpec {
                    client_id,
                    metal: analysis.metal,
                    grams: net,
                    kind: EntryKind::RecoveryCredit,
                    description: format!("Credit from analysis {}", analysis.analysis_number),
                    source_reference: Some(analysis.id.to_string()),
                    entry_date: Utc::now().date_naive(),
                },
            )
            .await?;
        }

        let updated = sqlx::query_as::<_, AnalysisRow>(
            r#"
            UPDATE chemical_analyses
            SET state = $1, approved_at = NOW(), updated_at = NOW()
            WHERE id = $2
            RETURNING id, organization_id, client_id, analysis_number, metal, description,
                      input_quantity, input_unit, state, result_value, result_unit,
                      break_percent, service_fee_percent, gross_grams, gross_recoverable_grams,
                      service_fee_grams, net_to_client_grams, entry_date, started_at,
                      result_entered_at, approved_at, refused_at, cancelled_at, finalized_at,
                      written_off, recovery_order_id, residue_of_order_id, created_at, updated_at
            "#,
        )
        .bind(next.as_str())
        .bind(analysis.id)
        .fetch_one(&mut *tx)
        .await?
        .into_analysis()?;

        tx.commit().await?;

        tracing::info!(
            analysis_id = %updated.id,
            number = %updated.analysis_number,
            credited_grams = %net,
            "Analysis approved"
        );

        Ok(updated)
    }

    /// Record the client's refusal; the material goes back to them
    pub async fn refuse(
        &self,
        organization_id: Uuid,
        analysis_id: Uuid,
    ) -> AppResult<ChemicalAnalysis> {
        let mut tx = self.db.begin().await?;

        let analysis = fetch_analysis_for_update_on(&mut tx, organization_id, analysis_id).await?;
        let next = transition(&analysis, AnalysisEvent::Refuse, "refuse")?;

        let updated = sqlx::query_as::<_, AnalysisRow>(
            r#"
            UPDATE chemical_analyses
            SET state = $1, refused_at = NOW(), updated_at = NOW()
            WHERE id = $2
            RETURNING id, organization_id, client_id, analysis_number, metal, description,
                      input_quantity, input_unit, state, result_value, result_unit,
                      break_percent, service_fee_percent, gross_grams, gross_recoverable_grams,
                      service_fee_grams, net_to_client_grams, entry_date, started_at,
                      result_entered_at, approved_at, refused_at, cancelled_at, finalized_at,
                      written_off, recovery_order_id, residue_of_order_id, created_at, updated_at
            "#,
        )
        .bind(next.as_str())
        .bind(analysis.id)
        .fetch_one(&mut *tx)
        .await?
        .into_analysis()?;

        tx.commit().await?;

        Ok(updated)
    }

    /// Take an approved analysis back to awaiting approval, reversing
    /// the credit issued on approval.
    ///
    /// The reversal is authorized to overdraw; the client may already
    /// have spent the credited grams.
    pub async fn revert_to_pending_approval(
        &self,
        organization_id: Uuid,
        analysis_id: Uuid,
    ) -> AppResult<ChemicalAnalysis> {
        let mut tx = self.db.begin().await?;

        let analysis = fetch_analysis_for_update_on(&mut tx, organization_id, analysis_id).await?;
        let next = transition(
            &analysis,
            AnalysisEvent::RevertToPendingApproval,
            "revert approval",
        )?;

        let net = analysis.net_to_client_grams.unwrap_or(Decimal::ZERO);
        if net > Decimal::ZERO {
            let client_id = analysis.client_id.ok_or_else(|| {
                AppError::InvariantViolation(format!(
                    "Analysis {} has no client to debit",
                    analysis.analysis_number
                ))
            })?;

            debit_on(
                &mut tx,
                organization_id,
                EntrySpec {
                    client_id,
                    metal: analysis.metal,
                    grams: net,
                    kind: EntryKind::Correction,
                    description: format!(
                        "Reversal of credit from analysis {}",
                        analysis.analysis_number
                    ),
                    source_reference: Some(analysis.id.to_string()),
                    entry_date: Utc::now().date_naive(),
                },
                true,
            )
            .await?;
        }

        let updated = sqlx::query_as::<_, AnalysisRow>(
            r#"
            UPDATE chemical_analyses
            SET state = $1, approved_at = NULL, updated_at = NOW()
            WHERE id = $2
            RETURNING id, organization_id, client_id, analysis_number, metal, description,
                      input_quantity, input_unit, state, result_value, result_unit,
                      break_percent, service_fee_percent, gross_grams, gross_recoverable_grams,
                      service_fee_grams, net_to_client_grams, entry_date, started_at,
                      result_entered_at, approved_at, refused_at, cancelled_at, finalized_at,
                      written_off, recovery_order_id, residue_of_order_id, created_at, updated_at
            "#,
        )
        .bind(next.as_str())
        .bind(analysis.id)
        .fetch_one(&mut *tx)
        .await?
        .into_analysis()?;

        tx.commit().await?;

        tracing::info!(
            analysis_id = %updated.id,
            number = %updated.analysis_number,
            reversed_grams = %net,
            "Analysis approval reverted"
        );

        Ok(updated)
    }

    /// Cancel an analysis that is not yet in recovery.
    ///
    /// Cancelling an approved analysis reverses the credit issued on
    /// approval, overdrawing the account if the grams were spent.
    pub async fn cancel(
        &self,
        organization_id: Uuid,
        analysis_id: Uuid,
    ) -> AppResult<ChemicalAnalysis> {
        let mut tx = self.db.begin().await?;

        let analysis = fetch_analysis_for_update_on(&mut tx, organization_id, analysis_id).await?;
        let was_approved = analysis.state == AnalysisState::ApprovedForRecovery;
        let next = transition(&analysis, AnalysisEvent::Cancel, "cancel")?;

        let net = analysis.net_to_client_grams.unwrap_or(Decimal::ZERO);
        if was_approved && net > Decimal::ZERO {
            let client_id = analysis.client_id.ok_or_else(|| {
                AppError::InvariantViolation(format!(
                    "Analysis {} has no client to debit",
                    analysis.analysis_number
                ))
            })?;

            debit_on(
                &mut tx,
                organization_id,
                EntrySpec {
                    client_id,
                    metal: analysis.metal,
                    grams: net,
                    kind: EntryKind::Correction,
                    description: format!(
                        "Reversal of credit from cancelled analysis {}",
                        analysis.analysis_number
                    ),
                    source_reference: Some(analysis.id.to_string()),
                    entry_date: Utc::now().date_naive(),
                },
                true,
            )
            .await?;
        }

        let updated = sqlx::query_as::<_, AnalysisRow>(
            r#"
            UPDATE chemical_analyses
            SET state = $1, cancelled_at = NOW(), updated_at = NOW()
            WHERE id = $2
            RETURNING id, organization_id, client_id, analysis_number, metal, description,
                      input_quantity, input_unit, state, result_value, result_unit,
                      break_percent, service_fee_percent, gross_grams, gross_recoverable_grams,
                      service_fee_grams, net_to_client_grams, entry_date, started_at,
                      result_entered_at, approved_at, refused_at, cancelled_at, finalized_at,
                      written_off, recovery_order_id, residue_of_order_id, created_at, updated_at
            "#,
        )
        .bind(next.as_str())
        .bind(analysis.id)
        .fetch_one(&mut *tx)
        .await?
        .into_analysis()?;

        tx.commit().await?;

        tracing::info!(
            analysis_id = %updated.id,
            number = %updated.analysis_number,
            "Analysis cancelled"
        );

        Ok(updated)
    }

    /// Value a business-owned residue at the latest sell price and
    /// write it off.
    ///
    /// The loss stays with the business; no client account is touched.
    pub async fn write_off_residue(
        &self,
        organization_id: Uuid,
        analysis_id: Uuid,
    ) -> AppResult<ResidueWriteOff> {
        let mut tx = self.db.begin().await?;

        let analysis = fetch_analysis_for_update_on(&mut tx, organization_id, analysis_id).await?;

        if analysis.written_off {
            return Err(AppError::Conflict {
                resource: "Chemical analysis".to_string(),
                message: format!("Residue {} is already written off", analysis.analysis_number),
                message_pt: format!("O resíduo {} já foi baixado", analysis.analysis_number),
            });
        }

        let next = transition(&analysis, AnalysisEvent::WriteOffResidue, "write off residue")?;

        let grams = analysis.gross_grams.unwrap_or(Decimal::ZERO);
        if grams <= Decimal::ZERO {
            return Err(AppError::Conflict {
                resource: "Chemical analysis".to_string(),
                message: format!("Residue {} has no grams to write off", analysis.analysis_number),
                message_pt: format!("O resíduo {} não tem gramas para baixar", analysis.analysis_number),
            });
        }

        let quotation = latest_on(&mut tx, organization_id, analysis.metal)
            .await?
            .ok_or_else(|| AppError::NotFound("Quotation".to_string()))?;
        let estimated_loss = round_currency(grams * quotation.sell_price);

        let updated = sqlx::query_as::<_, AnalysisRow>(
            r#"
            UPDATE chemical_analyses
            SET state = $1, written_off = TRUE, cancelled_at = NOW(), updated_at = NOW()
            WHERE id = $2
            RETURNING id, organization_id, client_id, analysis_number, metal, description,
                      input_quantity, input_unit, state, result_value, result_unit,
                      break_percent, service_fee_percent, gross_grams, gross_recoverable_grams,
                      service_fee_grams, net_to_client_grams, entry_date, started_at,
                      result_entered_at, approved_at, refused_at, cancelled_at, finalized_at,
                      written_off, recovery_order_id, residue_of_order_id, created_at, updated_at
            "#,
        )
        .bind(next.as_str())
        .bind(analysis.id)
        .fetch_one(&mut *tx)
        .await?
        .into_analysis()?;

        tx.commit().await?;

        tracing::info!(
            analysis_id = %updated.id,
            number = %updated.analysis_number,
            grams = %grams,
            estimated_loss = %estimated_loss,
            "Residue written off"
        );

        Ok(ResidueWriteOff {
            analysis: updated,
            grams_written_off: grams,
            sell_price: quotation.sell_price,
            estimated_loss,
        })
    }

    /// Get an analysis by id
    pub async fn get(
        &self,
        organization_id: Uuid,
        analysis_id: Uuid,
    ) -> AppResult<ChemicalAnalysis> {
        let row = sqlx::query_as::<_, AnalysisRow>(
            r#"
            SELECT id, organization_id, client_id, analysis_number, metal, description,
                   input_quantity, input_unit, state, result_value, result_unit,
                   break_percent, service_fee_percent, gross_grams, gross_recoverable_grams,
                   service_fee_grams, net_to_client_grams, entry_date, started_at,
                   result_entered_at, approved_at, refused_at, cancelled_at, finalized_at,
                   written_off, recovery_order_id, residue_of_order_id, created_at, updated_at
            FROM chemical_analyses
            WHERE id = $1 AND organization_id = $2
            "#,
        )
        .bind(analysis_id)
        .bind(organization_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Chemical analysis".to_string()))?;

        row.into_analysis()
    }

    /// List analyses for an organization, newest first
    pub async fn list(&self, organization_id: Uuid) -> AppResult<Vec<ChemicalAnalysis>> {
        let rows = sqlx::query_as::<_, AnalysisRow>(
            r#"
            SELECT id, organization_id, client_id, analysis_number, metal, description,
                   input_quantity, input_unit, state, result_value, result_unit,
                   break_percent, service_fee_percent, gross_grams, gross_recoverable_grams,
                   service_fee_grams, net_to_client_grams, entry_date, started_at,
                   result_entered_at, approved_at, refused_at, cancelled_at, finalized_at,
                   written_off, recovery_order_id, residue_of_order_id, created_at, updated_at
            FROM chemical_analyses
            WHERE organization_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(organization_id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(AnalysisRow::into_analysis).collect()
    }

    /// List a client's analyses, newest first
    pub async fn list_for_client(
        &self,
        organization_id: Uuid,
        client_id: Uuid,
    ) -> AppResult<Vec<ChemicalAnalysis>> {
        let rows = sqlx::query_as::<_, AnalysisRow>(
            r#"
            SELECT id, organization_id, client_id, analysis_number, metal, description,
                   input_quantity, input_unit, state, result_value, result_unit,
                   break_percent, service_fee_percent, gross_grams, gross_recoverable_grams,
                   service_fee_grams, net_to_client_grams, entry_date, started_at,
                   result_entered_at, approved_at, refused_at, cancelled_at, finalized_at,
                   written_off, recovery_order_id, residue_of_order_id, created_at, updated_at
            FROM chemical_analyses
            WHERE organization_id = $1 AND client_id = $2
            ORDER BY created_at DESC
            "#,
        )
        .bind(organization_id)
        .bind(client_id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(AnalysisRow::into_analysis).collect()
    }

    /// List approved analyses not yet linked to a recovery order,
    /// oldest first so batches drain the backlog in order
    pub async fn list_approved_unlinked(
        &self,
        organization_id: Uuid,
    ) -> AppResult<Vec<ChemicalAnalysis>> {
        let rows = sqlx::query_as::<_, AnalysisRow>(
            r#"
            SELECT id, organization_id, client_id, analysis_number, metal, description,
                   input_quantity, input_unit, state, result_value, result_unit,
                   break_percent, service_fee_percent, gross_grams, gross_recoverable_grams,
                   service_fee_grams, net_to_client_grams, entry_date, started_at,
                   result_entered_at, approved_at, refused_at, cancelled_at, finalized_at,
                   written_off, recovery_order_id, residue_of_order_id, created_at, updated_at
            FROM chemical_analyses
            WHERE organization_id = $1 AND state = 'approved_for_recovery'
              AND recovery_order_id IS NULL
            ORDER BY created_at ASC
            "#,
        )
        .bind(organization_id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(AnalysisRow::into_analysis).collect()
    }
}

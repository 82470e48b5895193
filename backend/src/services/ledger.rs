//! Metal account ledger: append-only signed gram entries per client and metal

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use shared::models::{EntryKind, MetalAccount, MetalAccountEntry, MetalKind};
use shared::types::DateRange;
use shared::validation::validate_positive_grams;

use crate::error::{AppError, AppResult};

/// Ledger service for metal accounts and their entry log
#[derive(Clone)]
pub struct LedgerService {
    db: PgPool,
}

/// Input for recording a ledger entry.
///
/// `grams` is an unsigned magnitude; the operation decides the sign.
#[derive(Debug, Deserialize)]
pub struct RecordEntryInput {
    pub grams: Decimal,
    pub kind: EntryKind,
    pub description: String,
    pub source_reference: Option<String>,
    pub entry_date: Option<NaiveDate>,
}

/// An account with its derived balance
#[derive(Debug, Clone, Serialize)]
pub struct AccountSummary {
    pub account: MetalAccount,
    pub balance: Decimal,
}

/// One statement line with the running balance after its entry
#[derive(Debug, Clone, Serialize)]
pub struct StatementLine {
    pub entry: MetalAccountEntry,
    pub running_balance: Decimal,
}

/// Chronological statement for one account
#[derive(Debug, Clone, Serialize)]
pub struct AccountStatement {
    pub account: MetalAccount,
    pub opening_balance: Decimal,
    pub lines: Vec<StatementLine>,
    pub closing_balance: Decimal,
}

/// Database row for a metal account
#[derive(Debug, FromRow)]
struct AccountRow {
    id: Uuid,
    organization_id: Uuid,
    client_id: Uuid,
    metal: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AccountRow {
    fn into_account(self) -> AppResult<MetalAccount> {
        let metal = MetalKind::from_str(&self.metal)
            .ok_or_else(|| AppError::Internal(format!("Unknown metal kind: {}", self.metal)))?;

        Ok(MetalAccount {
            id: self.id,
            organization_id: self.organization_id,
            client_id: self.client_id,
            metal,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Database row for a ledger entry
#[derive(Debug, FromRow)]
struct EntryRow {
    id: Uuid,
    account_id: Uuid,
    entry_date: NaiveDate,
    grams: Decimal,
    kind: String,
    description: String,
    source_reference: Option<String>,
    created_at: DateTime<Utc>,
}

impl EntryRow {
    fn into_entry(self) -> AppResult<MetalAccountEntry> {
        let kind = EntryKind::from_str(&self.kind)
            .ok_or_else(|| AppError::Internal(format!("Unknown entry kind: {}", self.kind)))?;

        Ok(MetalAccountEntry {
            id: self.id,
            account_id: self.account_id,
            entry_date: self.entry_date,
            grams: self.grams,
            kind,
            description: self.description,
            source_reference: self.source_reference,
            created_at: self.created_at,
        })
    }
}

/// Everything needed to post one entry from inside another service's
/// transaction
#[derive(Debug)]
pub(crate) struct EntrySpec {
    pub client_id: Uuid,
    pub metal: MetalKind,
    /// Unsigned magnitude in grams
    pub grams: Decimal,
    pub kind: EntryKind,
    pub description: String,
    pub source_reference: Option<String>,
    pub entry_date: NaiveDate,
}

/// Find or lazily create the account for a (client, metal) pair inside
/// an open transaction
pub(crate) async fn find_or_create_account_on(
    conn: &mut PgConnection,
    organization_id: Uuid,
    client_id: Uuid,
    metal: MetalKind,
) -> AppResult<MetalAccount> {
    sqlx::query(
        r#"
        INSERT INTO metal_accounts (organization_id, client_id, metal)
        VALUES ($1, $2, $3)
        ON CONFLICT (organization_id, client_id, metal) DO NOTHING
        "#,
    )
    .bind(organization_id)
    .bind(client_id)
    .bind(metal.as_str())
    .execute(&mut *conn)
    .await?;

    let row = sqlx::query_as::<_, AccountRow>(
        r#"
        SELECT id, organization_id, client_id, metal, created_at, updated_at
        FROM metal_accounts
        WHERE organization_id = $1 AND client_id = $2 AND metal = $3
        "#,
    )
    .bind(organization_id)
    .bind(client_id)
    .bind(metal.as_str())
    .fetch_one(&mut *conn)
    .await?;

    row.into_account()
}

/// Lock an account row and derive its balance from the entry log
pub(crate) async fn locked_balance_on(
    conn: &mut PgConnection,
    account_id: Uuid,
) -> AppResult<Decimal> {
    sqlx::query("SELECT id FROM metal_accounts WHERE id = $1 FOR UPDATE")
        .bind(account_id)
        .execute(&mut *conn)
        .await?;

    let balance = sqlx::query_scalar::<_, Decimal>(
        "SELECT COALESCE(SUM(grams), 0) FROM metal_account_entries WHERE account_id = $1",
    )
    .bind(account_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(balance)
}

async fn insert_entry_on(
    conn: &mut PgConnection,
    account_id: Uuid,
    entry_date: NaiveDate,
    signed_grams: Decimal,
    kind: EntryKind,
    description: &str,
    source_reference: Option<&str>,
) -> AppResult<MetalAccountEntry> {
    let row = sqlx::query_as::<_, EntryRow>(
        r#"
        INSERT INTO metal_account_entries (account_id, entry_date, grams, kind, description, source_reference)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, account_id, entry_date, grams, kind, description, source_reference, created_at
        "#,
    )
    .bind(account_id)
    .bind(entry_date)
    .bind(signed_grams)
    .bind(kind.as_str())
    .bind(description)
    .bind(source_reference)
    .fetch_one(&mut *conn)
    .await?;

    row.into_entry()
}

/// Post a credit inside an open transaction
pub(crate) async fn credit_on(
    conn: &mut PgConnection,
    organization_id: Uuid,
    spec: EntrySpec,
) -> AppResult<MetalAccountEntry> {
    let account =
        find_or_create_account_on(conn, organization_id, spec.client_id, spec.metal).await?;

    insert_entry_on(
        conn,
        account.id,
        spec.entry_date,
        spec.grams,
        spec.kind,
        &spec.description,
        spec.source_reference.as_deref(),
    )
    .await
}

/// Post a debit inside an open transaction.
///
/// The account row is locked and the balance derived before the entry
/// is written, so concurrent debits cannot both pass the check.
pub(crate) async fn debit_on(
    conn: &mut PgConnection,
    organization_id: Uuid,
    spec: EntrySpec,
    authorize_overdraft: bool,
) -> AppResult<MetalAccountEntry> {
    let account =
        find_or_create_account_on(conn, organization_id, spec.client_id, spec.metal).await?;

    let balance = locked_balance_on(conn, account.id).await?;
    if !authorize_overdraft && balance < spec.grams {
        return Err(AppError::InsufficientBalance {
            account: format!("{}/{}", spec.client_id, spec.metal.as_str()),
            requested: spec.grams,
            available: balance,
        });
    }

    insert_entry_on(
        conn,
        account.id,
        spec.entry_date,
        -spec.grams,
        spec.kind,
        &spec.description,
        spec.source_reference.as_deref(),
    )
    .await
}

impl LedgerService {
    /// Create a new LedgerService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Find or lazily create the account for a (client, metal) pair
    pub async fn find_or_create_account(
        &self,
        organization_id: Uuid,
        client_id: Uuid,
        metal: MetalKind,
    ) -> AppResult<MetalAccount> {
        let mut conn = self.db.acquire().await?;
        find_or_create_account_on(&mut conn, organization_id, client_id, metal).await
    }

    /// Credit grams to a client's account
    pub async fn credit(
        &self,
        organization_id: Uuid,
        client_id: Uuid,
        metal: MetalKind,
        input: RecordEntryInput,
    ) -> AppResult<MetalAccountEntry> {
        self.validate_entry(&input)?;
        let entry_date = input.entry_date.unwrap_or_else(|| Utc::now().date_naive());

        let mut tx = self.db.begin().await?;
        let entry = credit_on(
            &mut tx,
            organization_id,
            EntrySpec {
                client_id,
                metal,
                grams: input.grams,
                kind: input.kind,
                description: input.description,
                source_reference: input.source_reference,
                entry_date,
            },
        )
        .await?;
        tx.commit().await?;

        tracing::info!(
            account_id = %entry.account_id,
            grams = %entry.grams,
            kind = entry.kind.as_str(),
            "Ledger credit recorded"
        );

        Ok(entry)
    }

    /// Debit grams from a client's account.
    ///
    /// Without `authorize_overdraft` the debit is rejected when it
    /// would push the derived balance negative.
    pub async fn debit(
        &self,
        organization_id: Uuid,
        client_id: Uuid,
        metal: MetalKind,
        input: RecordEntryInput,
        authorize_overdraft: bool,
    ) -> AppResult<MetalAccountEntry> {
        self.validate_entry(&input)?;
        let entry_date = input.entry_date.unwrap_or_else(|| Utc::now().date_naive());

        let mut tx = self.db.begin().await?;
        let entry = debit_on(
            &mut tx,
            organization_id,
            EntrySpec {
                client_id,
                metal,
                grams: input.grams,
                kind: input.kind,
                description: input.description,
                source_reference: input.source_reference,
                entry_date,
            },
            authorize_overdraft,
        )
        .await?;
        tx.commit().await?;

        tracing::info!(
            account_id = %entry.account_id,
            grams = %entry.grams,
            kind = entry.kind.as_str(),
            "Ledger debit recorded"
        );

        Ok(entry)
    }

    /// Derived balance for a (client, metal) pair, zero when the
    /// account does not exist yet
    pub async fn balance(
        &self,
        organization_id: Uuid,
        client_id: Uuid,
        metal: MetalKind,
    ) -> AppResult<Decimal> {
        let balance = sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT COALESCE(SUM(e.grams), 0)
            FROM metal_accounts a
            LEFT JOIN metal_account_entries e ON e.account_id = a.id
            WHERE a.organization_id = $1 AND a.client_id = $2 AND a.metal = $3
            "#,
        )
        .bind(organization_id)
        .bind(client_id)
        .bind(metal.as_str())
        .fetch_one(&self.db)
        .await?;

        Ok(balance)
    }

    /// Get one account with its derived balance
    pub async fn get_account(
        &self,
        organization_id: Uuid,
        account_id: Uuid,
    ) -> AppResult<AccountSummary> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT id, organization_id, client_id, metal, created_at, updated_at
            FROM metal_accounts
            WHERE id = $1 AND organization_id = $2
            "#,
        )
        .bind(account_id)
        .bind(organization_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Metal account".to_string()))?;

        let account = row.into_account()?;
        let balance = sqlx::query_scalar::<_, Decimal>(
            "SELECT COALESCE(SUM(grams), 0) FROM metal_account_entries WHERE account_id = $1",
        )
        .bind(account.id)
        .fetch_one(&self.db)
        .await?;

        Ok(AccountSummary { account, balance })
    }

    /// List all accounts of an organization with their balances
    pub async fn list_accounts(&self, organization_id: Uuid) -> AppResult<Vec<AccountSummary>> {
        let rows = sqlx::query_as::<_, (Uuid, Uuid, Uuid, String, DateTime<Utc>, DateTime<Utc>, Decimal)>(
            r#"
            SELECT a.id, a.organization_id, a.client_id, a.metal, a.created_at, a.updated_at,
                   COALESCE(SUM(e.grams), 0) as balance
            FROM metal_accounts a
            LEFT JOIN metal_account_entries e ON e.account_id = a.id
            WHERE a.organization_id = $1
            GROUP BY a.id, a.organization_id, a.client_id, a.metal, a.created_at, a.updated_at
            ORDER BY a.created_at
            "#,
        )
        .bind(organization_id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter()
            .map(|r| {
                let metal = MetalKind::from_str(&r.3)
                    .ok_or_else(|| AppError::Internal(format!("Unknown metal kind: {}", r.3)))?;
                Ok(AccountSummary {
                    account: MetalAccount {
                        id: r.0,
                        organization_id: r.1,
                        client_id: r.2,
                        metal,
                        created_at: r.4,
                        updated_at: r.5,
                    },
                    balance: r.6,
                })
            })
            .collect()
    }

    /// Chronological statement with running balances, optionally bounded
    /// to a date range
    pub async fn statement(
        &self,
        organization_id: Uuid,
        client_id: Uuid,
        metal: MetalKind,
        range: Option<DateRange>,
    ) -> AppResult<AccountStatement> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT id, organization_id, client_id, metal, created_at, updated_at
            FROM metal_accounts
            WHERE organization_id = $1 AND client_id = $2 AND metal = $3
            "#,
        )
        .bind(organization_id)
        .bind(client_id)
        .bind(metal.as_str())
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Metal account".to_string()))?;

        let account = row.into_account()?;

        let opening_balance = match &range {
            Some(range) => {
                sqlx::query_scalar::<_, Decimal>(
                    r#"
                    SELECT COALESCE(SUM(grams), 0)
                    FROM metal_account_entries
                    WHERE account_id = $1 AND entry_date < $2
                    "#,
                )
                .bind(account.id)
                .bind(range.from)
                .fetch_one(&self.db)
                .await?
            }
            None => Decimal::ZERO,
        };

        let rows = match &range {
            Some(range) => {
                sqlx::query_as::<_, EntryRow>(
                    r#"
                    SELECT id, account_id, entry_date, grams, kind, description, source_reference, created_at
                    FROM metal_account_entries
                    WHERE account_id = $1 AND entry_date BETWEEN $2 AND $3
                    ORDER BY entry_date ASC, created_at ASC
                    "#,
                )
                .bind(account.id)
                .bind(range.from)
                .bind(range.to)
                .fetch_all(&self.db)
                .await?
            }
            None => {
                sqlx::query_as::<_, EntryRow>(
                    r#"
                    SELECT id, account_id, entry_date, grams, kind, description, source_reference, created_at
                    FROM metal_account_entries
                    WHERE account_id = $1
                    ORDER BY entry_date ASC, created_at ASC
                    "#,
                )
                .bind(account.id)
                .fetch_all(&self.db)
                .await?
            }
        };

        let mut running = opening_balance;
        let mut lines = Vec::with_capacity(rows.len());
        for row in rows {
            let entry = row.into_entry()?;
            running += entry.grams;
            lines.push(StatementLine {
                entry,
                running_balance: running,
            });
        }

        Ok(AccountStatement {
            account,
            opening_balance,
            lines,
            closing_balance: running,
        })
    }

    /// Reverse an earlier entry with a compensating correction.
    ///
    /// Entries are immutable; this is the only sanctioned way to undo
    /// one. The correction may push the balance negative.
    pub async fn compensate(
        &self,
        organization_id: Uuid,
        entry_id: Uuid,
        description: Option<String>,
    ) -> AppResult<MetalAccountEntry> {
        let mut tx = self.db.begin().await?;

        let original = sqlx::query_as::<_, EntryRow>(
            r#"
            SELECT e.id, e.account_id, e.entry_date, e.grams, e.kind, e.description,
                   e.source_reference, e.created_at
            FROM metal_account_entries e
            JOIN metal_accounts a ON a.id = e.account_id
            WHERE e.id = $1 AND a.organization_id = $2
            "#,
        )
        .bind(entry_id)
        .bind(organization_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Ledger entry".to_string()))?
        .into_entry()?;

        // Serialize against concurrent debits on the same account
        locked_balance_on(&mut tx, original.account_id).await?;

        let description = description
            .unwrap_or_else(|| format!("Reversal of entry {}", original.id));

        let entry = insert_entry_on(
            &mut tx,
            original.account_id,
            Utc::now().date_naive(),
            -original.grams,
            EntryKind::Correction,
            &description,
            Some(&original.id.to_string()),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            original_entry = %original.id,
            correction = %entry.id,
            "Ledger entry compensated"
        );

        Ok(entry)
    }

    fn validate_entry(&self, input: &RecordEntryInput) -> AppResult<()> {
        if validate_positive_grams(input.grams).is_err() {
            return Err(AppError::Validation {
                field: "grams".to_string(),
                message: "Gram amount must be positive".to_string(),
                message_pt: "A quantidade em gramas deve ser positiva".to_string(),
            });
        }
        if input.description.trim().is_empty() {
            return Err(AppError::Validation {
                field: "description".to_string(),
                message: "Description must not be empty".to_string(),
                message_pt: "A descrição não pode estar vazia".to_string(),
            });
        }
        Ok(())
    }
}

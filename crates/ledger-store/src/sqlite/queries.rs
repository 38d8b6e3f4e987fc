//! Row-level reads and writes over a borrowed connection. Both the store and
//! the transaction scope call into these.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use rust_decimal::Decimal;
use uuid::Uuid;

use genealogy_core::money;
use genealogy_core::{
    CommissionTransaction, CoreError, EntryKind, Investment, InvestmentId, InvestmentStatus,
    LedgerEntry, PaymentProvider, Plan, User, UserId,
};

use crate::StoreError;

// =============================================================================
// Column codecs
// =============================================================================

pub(crate) fn ts(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion(idx, e))
}

fn opt_uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| Uuid::parse_str(&s).map_err(|e| conversion(idx, e)))
        .transpose()
}

fn decimal_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw).map_err(|e| conversion(idx, e))
}

fn opt_decimal_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| Decimal::from_str(&s).map_err(|e| conversion(idx, e)))
        .transpose()
}

fn time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion(idx, e))
}

fn opt_time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| conversion(idx, e))
    })
    .transpose()
}

fn parsed_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = CoreError>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion(idx, e))
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

// =============================================================================
// Users
// =============================================================================

const USER_COLUMNS: &str = "id, display_name, referral_code, sponsor_id, registered_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: uuid_col(row, 0)?,
        display_name: row.get(1)?,
        referral_code: row.get(2)?,
        sponsor_id: opt_uuid_col(row, 3)?,
        registered_at: time_col(row, 4)?,
    })
}

pub fn get_user(conn: &Connection, id: &UserId) -> Result<User, StoreError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
    conn.query_row(&sql, params![id.to_string()], user_from_row)
        .optional()?
        .ok_or_else(|| CoreError::not_found("user", id).into())
}

pub fn find_user_by_code(conn: &Connection, code: &str) -> Result<Option<User>, StoreError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE referral_code = ?");
    Ok(conn.query_row(&sql, params![code], user_from_row).optional()?)
}

pub fn recruits_of(conn: &Connection, sponsor: &UserId) -> Result<Vec<User>, StoreError> {
    let sql = format!(
        "SELECT {USER_COLUMNS} FROM users WHERE sponsor_id = ? ORDER BY registered_at, id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![sponsor.to_string()], user_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn insert_user(conn: &Connection, user: &User) -> Result<(), StoreError> {
    if let Some(sponsor) = &user.sponsor_id {
        if sponsor == &user.id {
            return Err(CoreError::SponsorCycle(user.id.to_string()).into());
        }
        get_user(conn, sponsor).map_err(|err| {
            if err.is_not_found() {
                CoreError::not_found("sponsor", sponsor).into()
            } else {
                err
            }
        })?;
    }
    conn.execute(
        "INSERT INTO users (id, display_name, referral_code, sponsor_id, registered_at)
         VALUES (?, ?, ?, ?, ?)",
        params![
            user.id.to_string(),
            user.display_name,
            user.referral_code,
            user.sponsor_id.map(|s| s.to_string()),
            ts(&user.registered_at),
        ],
    )
    .map_err(|e| {
        if is_constraint_violation(&e) {
            StoreError::Internal(format!(
                "user {} or referral code {} already exists",
                user.id, user.referral_code
            ))
        } else {
            e.into()
        }
    })?;
    Ok(())
}

// =============================================================================
// Plans
// =============================================================================

const PLAN_COLUMNS: &str = "id, name, monthly_rate, duration_months, min_amount, max_amount";

fn plan_from_row(row: &Row<'_>) -> rusqlite::Result<Plan> {
    Ok(Plan {
        id: row.get(0)?,
        name: row.get(1)?,
        monthly_rate: decimal_col(row, 2)?,
        duration_months: row.get(3)?,
        min_amount: decimal_col(row, 4)?,
        max_amount: opt_decimal_col(row, 5)?,
    })
}

pub fn get_plan(conn: &Connection, id: &str) -> Result<Plan, StoreError> {
    let sql = format!("SELECT {PLAN_COLUMNS} FROM plans WHERE id = ?");
    conn.query_row(&sql, params![id], plan_from_row)
        .optional()?
        .ok_or_else(|| CoreError::not_found("plan", id).into())
}

pub fn plans(conn: &Connection) -> Result<Vec<Plan>, StoreError> {
    let sql = format!("SELECT {PLAN_COLUMNS} FROM plans ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], plan_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn upsert_plan(conn: &Connection, plan: &Plan) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO plans (id, name, monthly_rate, duration_months, min_amount, max_amount)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            monthly_rate = excluded.monthly_rate,
            duration_months = excluded.duration_months,
            min_amount = excluded.min_amount,
            max_amount = excluded.max_amount",
        params![
            plan.id,
            plan.name,
            plan.monthly_rate.to_string(),
            plan.duration_months,
            plan.min_amount.to_string(),
            plan.max_amount.map(|m| m.to_string()),
        ],
    )?;
    Ok(())
}

// =============================================================================
// Investments
// =============================================================================

const INVESTMENT_COLUMNS: &str =
    "id, user_id, plan_id, amount, start_date, end_date, status, closed_at";

fn investment_from_row(row: &Row<'_>) -> rusqlite::Result<Investment> {
    Ok(Investment {
        id: uuid_col(row, 0)?,
        user_id: uuid_col(row, 1)?,
        plan_id: row.get(2)?,
        amount: decimal_col(row, 3)?,
        start_date: time_col(row, 4)?,
        end_date: time_col(row, 5)?,
        status: parsed_col(row, 6)?,
        closed_at: opt_time_col(row, 7)?,
    })
}

pub fn get_investment(conn: &Connection, id: &InvestmentId) -> Result<Investment, StoreError> {
    let sql = format!("SELECT {INVESTMENT_COLUMNS} FROM investments WHERE id = ?");
    conn.query_row(&sql, params![id.to_string()], investment_from_row)
        .optional()?
        .ok_or_else(|| CoreError::not_found("investment", id).into())
}

pub fn investments_of(conn: &Connection, user: &UserId) -> Result<Vec<Investment>, StoreError> {
    let sql = format!(
        "SELECT {INVESTMENT_COLUMNS} FROM investments WHERE user_id = ? ORDER BY start_date"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![user.to_string()], investment_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn due_investments(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<Investment>, StoreError> {
    let sql = format!(
        "SELECT {INVESTMENT_COLUMNS} FROM investments
         WHERE status = ? AND end_date <= ? ORDER BY end_date"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![InvestmentStatus::Active.as_str(), ts(&now)],
        investment_from_row,
    )?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn has_active_investment(conn: &Connection, user: &UserId) -> Result<bool, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM investments WHERE user_id = ? AND status = ?",
        params![user.to_string(), InvestmentStatus::Active.as_str()],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn insert_investment(conn: &Connection, investment: &Investment) -> Result<(), StoreError> {
    get_user(conn, &investment.user_id)?;
    get_plan(conn, &investment.plan_id)?;
    conn.execute(
        "INSERT INTO investments (id, user_id, plan_id, amount, start_date, end_date, status, closed_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            investment.id.to_string(),
            investment.user_id.to_string(),
            investment.plan_id,
            investment.amount.to_string(),
            ts(&investment.start_date),
            ts(&investment.end_date),
            investment.status.as_str(),
            investment.closed_at.as_ref().map(ts),
        ],
    )?;
    Ok(())
}

pub fn update_investment(conn: &Connection, investment: &Investment) -> Result<(), StoreError> {
    let changed = conn.execute(
        "UPDATE investments SET status = ?, closed_at = ? WHERE id = ?",
        params![
            investment.status.as_str(),
            investment.closed_at.as_ref().map(ts),
            investment.id.to_string(),
        ],
    )?;
    if changed == 0 {
        return Err(CoreError::not_found("investment", investment.id).into());
    }
    Ok(())
}

// =============================================================================
// Commissions
// =============================================================================

const COMMISSION_COLUMNS: &str =
    "id, investment_id, beneficiary_id, source_user_id, level, rate, amount, created_at";

fn commission_from_row(row: &Row<'_>) -> rusqlite::Result<CommissionTransaction> {
    Ok(CommissionTransaction {
        id: uuid_col(row, 0)?,
        investment_id: uuid_col(row, 1)?,
        beneficiary_id: uuid_col(row, 2)?,
        source_user_id: uuid_col(row, 3)?,
        level: row.get(4)?,
        rate: decimal_col(row, 5)?,
        amount: decimal_col(row, 6)?,
        created_at: time_col(row, 7)?,
    })
}

pub fn commissions_for(
    conn: &Connection,
    investment: &InvestmentId,
) -> Result<Vec<CommissionTransaction>, StoreError> {
    let sql = format!(
        "SELECT {COMMISSION_COLUMNS} FROM commissions WHERE investment_id = ? ORDER BY level"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![investment.to_string()], commission_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn commissions_earned_by(
    conn: &Connection,
    user: &UserId,
) -> Result<Vec<CommissionTransaction>, StoreError> {
    let sql = format!(
        "SELECT {COMMISSION_COLUMNS} FROM commissions WHERE beneficiary_id = ? ORDER BY created_at"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![user.to_string()], commission_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn insert_commissions(
    conn: &Connection,
    rows: &[CommissionTransaction],
) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(
        "INSERT INTO commissions
            (id, investment_id, beneficiary_id, source_user_id, level, rate, amount, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )?;
    for row in rows {
        stmt.execute(params![
            row.id.to_string(),
            row.investment_id.to_string(),
            row.beneficiary_id.to_string(),
            row.source_user_id.to_string(),
            row.level,
            row.rate.to_string(),
            row.amount.to_string(),
            ts(&row.created_at),
        ])
        .map_err(|e| {
            if is_constraint_violation(&e) {
                CoreError::DuplicateCommission(row.investment_id.to_string()).into()
            } else {
                StoreError::from(e)
            }
        })?;
    }
    Ok(())
}

// =============================================================================
// Wallet entries
// =============================================================================

const ENTRY_COLUMNS: &str = "id, user_id, kind, amount, provider, reference, created_at";

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let provider: Option<String> = row.get(4)?;
    Ok(LedgerEntry {
        id: uuid_col(row, 0)?,
        user_id: uuid_col(row, 1)?,
        kind: parsed_col::<EntryKind>(row, 2)?,
        amount: decimal_col(row, 3)?,
        provider: provider
            .map(|p| p.parse::<PaymentProvider>().map_err(|e| conversion(4, e)))
            .transpose()?,
        reference: row.get(5)?,
        created_at: time_col(row, 6)?,
    })
}

pub fn entries_of(conn: &Connection, user: &UserId) -> Result<Vec<LedgerEntry>, StoreError> {
    let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE user_id = ? ORDER BY created_at");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![user.to_string()], entry_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Summed in Rust; SQLite arithmetic on decimal text would go through floats.
pub fn balances(conn: &Connection) -> Result<BTreeMap<UserId, Decimal>, StoreError> {
    let mut out = BTreeMap::new();
    let mut users = conn.prepare("SELECT id FROM users")?;
    for id in users.query_map([], |row| uuid_col(row, 0))? {
        out.insert(id?, Decimal::ZERO);
    }
    let mut stmt = conn.prepare("SELECT user_id, amount FROM entries")?;
    let rows = stmt.query_map([], |row| Ok((uuid_col(row, 0)?, decimal_col(row, 1)?)))?;
    for row in rows {
        let (user, amount) = row?;
        let balance = out.entry(user).or_insert(Decimal::ZERO);
        *balance = money::checked_add(*balance, amount)?;
    }
    Ok(out)
}

pub fn entry_by_reference(
    conn: &Connection,
    provider: PaymentProvider,
    reference: &str,
) -> Result<Option<LedgerEntry>, StoreError> {
    let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE provider = ? AND reference = ?");
    Ok(conn
        .query_row(&sql, params![provider.as_str(), reference], entry_from_row)
        .optional()?)
}

pub fn post_entry(conn: &Connection, entry: &LedgerEntry) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO entries (id, user_id, kind, amount, provider, reference, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            entry.id.to_string(),
            entry.user_id.to_string(),
            entry.kind.as_str(),
            entry.amount.to_string(),
            entry.provider.map(|p| p.as_str()),
            entry.reference,
            ts(&entry.created_at),
        ],
    )
    .map_err(|e| {
        if is_constraint_violation(&e) {
            StoreError::Internal(format!(
                "entry {} conflicts with an existing provider reference",
                entry.id
            ))
        } else {
            e.into()
        }
    })?;
    Ok(())
}

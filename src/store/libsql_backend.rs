//! libSQL backend — async `ShopStore` trait implementation.
//!
//! Supports local file and in-memory databases. Every statement goes through
//! one mutex-guarded connection so a transaction never shares the connection
//! with another request's statements.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, TransactionBehavior, params};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::pipeline::types::{Direction, MessageType, NewSmsMessage, SmsMessage};
use crate::shop::{
    Client, Estimate, EstimateStatus, NewClient, NewEstimate, NewRepair, NewRepairPart, Repair,
    RepairNote, RepairPart, RepairStatus,
};
use crate::sms::phone::normalize_phone;
use crate::store::migrations;
use crate::store::traits::{ApprovalPlan, ApprovalWrite, ShopStore};

/// libSQL database backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Mutex<Connection>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        Ok(backend)
    }

    /// Run arbitrary SQL against the shared connection.
    #[cfg(test)]
    pub(crate) async fn execute_raw(&self, sql: &str) -> Result<(), DatabaseError> {
        let conn = self.conn.lock().await;
        conn.execute_batch(sql)
            .await
            .map_err(|e| DatabaseError::Query(format!("execute_raw: {e}")))?;
        Ok(())
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn: Mutex::new(conn),
        })
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical write format: fixed microsecond precision, `Z` suffix.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    // SQLite datetime() output, written by other tools against the same file
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref()
        .filter(|s| !s.is_empty())
        .map(|s| parse_datetime(s))
}

/// Map a column read error, tagging it with the column.
fn col(name: &'static str) -> impl Fn(libsql::Error) -> DatabaseError {
    move |e| DatabaseError::Query(format!("{name}: {e}"))
}

fn parse_money(raw: &str, name: &str) -> Result<Decimal, DatabaseError> {
    Decimal::from_str(raw.trim())
        .map_err(|e| DatabaseError::Serialization(format!("{name}: {raw:?}: {e}")))
}

fn money(row: &libsql::Row, idx: i32, name: &'static str) -> Result<Decimal, DatabaseError> {
    let raw: String = row.get(idx).map_err(col(name))?;
    parse_money(&raw, name)
}

fn opt_money(
    row: &libsql::Row,
    idx: i32,
    name: &'static str,
) -> Result<Option<Decimal>, DatabaseError> {
    let raw: Option<String> = row.get(idx).ok();
    raw.filter(|s| !s.trim().is_empty())
        .map(|s| parse_money(&s, name))
        .transpose()
}

fn flag(row: &libsql::Row, idx: i32, name: &'static str) -> Result<bool, DatabaseError> {
    let v: i64 = row.get(idx).map_err(col(name))?;
    Ok(v != 0)
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_int(v: Option<i64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Integer(v),
        None => libsql::Value::Null,
    }
}

fn opt_decimal(v: Option<Decimal>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Text(v.to_string()),
        None => libsql::Value::Null,
    }
}

// ── Row mapping ─────────────────────────────────────────────────────

const CLIENT_COLUMNS: &str = "clients.id, clients.name, clients.phone, clients.email, clients.sms_opted_in, clients.created_at, clients.updated_at";

const REPAIR_COLUMNS: &str = "id, client_id, claim_number, device, status, priority, labor_cost, tax_exempt, shipping_fee, onsite_fee, rush_fee, deposit_amount, diagnostic_fee, diagnostic_fee_collected, created_at, updated_at";

const ESTIMATE_COLUMNS: &str = "id, repair_id, label, status, labor_cost, parts_cost, total_cost, notified_date, approved_date, created_at";

const PART_COLUMNS: &str = "id, repair_id, part_id, name, quantity, unit_price, created_at";

const NOTE_COLUMNS: &str = "id, repair_id, author, content, created_at";

const SMS_COLUMNS: &str = "id, provider_sid, direction, from_number, to_number, body, client_id, repair_id, message_type, created_at";

fn row_to_client(row: &libsql::Row) -> Result<Client, DatabaseError> {
    let created: String = row.get(5).map_err(col("client.created_at"))?;
    let updated: String = row.get(6).map_err(col("client.updated_at"))?;
    Ok(Client {
        id: row.get(0).map_err(col("client.id"))?,
        name: row.get(1).map_err(col("client.name"))?,
        phone: row.get::<String>(2).ok().filter(|p| !p.is_empty()),
        email: row.get::<String>(3).ok().filter(|e| !e.is_empty()),
        sms_opted_in: flag(row, 4, "client.sms_opted_in")?,
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

fn row_to_repair(row: &libsql::Row) -> Result<Repair, DatabaseError> {
    let status: String = row.get(4).map_err(col("repair.status"))?;
    let priority: String = row.get(5).map_err(col("repair.priority"))?;
    let created: String = row.get(14).map_err(col("repair.created_at"))?;
    let updated: String = row.get(15).map_err(col("repair.updated_at"))?;
    Ok(Repair {
        id: row.get(0).map_err(col("repair.id"))?,
        client_id: row.get(1).map_err(col("repair.client_id"))?,
        claim_number: row.get(2).map_err(col("repair.claim_number"))?,
        device: row.get::<String>(3).unwrap_or_default(),
        status: status.parse().map_err(DatabaseError::Serialization)?,
        priority: priority.parse().map_err(DatabaseError::Serialization)?,
        labor_cost: money(row, 6, "repair.labor_cost")?,
        tax_exempt: flag(row, 7, "repair.tax_exempt")?,
        shipping_fee: money(row, 8, "repair.shipping_fee")?,
        onsite_fee: money(row, 9, "repair.onsite_fee")?,
        rush_fee: money(row, 10, "repair.rush_fee")?,
        deposit_amount: money(row, 11, "repair.deposit_amount")?,
        diagnostic_fee: opt_money(row, 12, "repair.diagnostic_fee")?,
        diagnostic_fee_collected: flag(row, 13, "repair.diagnostic_fee_collected")?,
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

fn row_to_estimate(row: &libsql::Row) -> Result<Estimate, DatabaseError> {
    let status: String = row.get(3).map_err(col("estimate.status"))?;
    let notified: Option<String> = row.get(7).ok();
    let approved: Option<String> = row.get(8).ok();
    let created: String = row.get(9).map_err(col("estimate.created_at"))?;
    Ok(Estimate {
        id: row.get(0).map_err(col("estimate.id"))?,
        repair_id: row.get(1).map_err(col("estimate.repair_id"))?,
        label: row.get::<String>(2).ok().filter(|l| !l.is_empty()),
        status: status
            .parse::<EstimateStatus>()
            .map_err(DatabaseError::Serialization)?,
        labor_cost: money(row, 4, "estimate.labor_cost")?,
        parts_cost: money(row, 5, "estimate.parts_cost")?,
        total_cost: money(row, 6, "estimate.total_cost")?,
        notified_date: parse_optional_datetime(&notified),
        approved_date: parse_optional_datetime(&approved),
        created_at: parse_datetime(&created),
    })
}

fn row_to_part(row: &libsql::Row) -> Result<RepairPart, DatabaseError> {
    let created: String = row.get(6).map_err(col("repair_part.created_at"))?;
    Ok(RepairPart {
        id: row.get(0).map_err(col("repair_part.id"))?,
        repair_id: row.get(1).map_err(col("repair_part.repair_id"))?,
        part_id: row.get::<i64>(2).ok(),
        name: row.get(3).map_err(col("repair_part.name"))?,
        quantity: row.get(4).map_err(col("repair_part.quantity"))?,
        unit_price: money(row, 5, "repair_part.unit_price")?,
        created_at: parse_datetime(&created),
    })
}

fn row_to_note(row: &libsql::Row) -> Result<RepairNote, DatabaseError> {
    let created: String = row.get(4).map_err(col("repair_note.created_at"))?;
    Ok(RepairNote {
        id: row.get(0).map_err(col("repair_note.id"))?,
        repair_id: row.get(1).map_err(col("repair_note.repair_id"))?,
        author: row.get(2).map_err(col("repair_note.author"))?,
        content: row.get(3).map_err(col("repair_note.content"))?,
        created_at: parse_datetime(&created),
    })
}

fn row_to_sms(row: &libsql::Row) -> Result<SmsMessage, DatabaseError> {
    let id: String = row.get(0).map_err(col("sms.id"))?;
    let direction: String = row.get(2).map_err(col("sms.direction"))?;
    let message_type: String = row.get(8).map_err(col("sms.message_type"))?;
    let created: String = row.get(9).map_err(col("sms.created_at"))?;
    Ok(SmsMessage {
        id: Uuid::parse_str(&id)
            .map_err(|e| DatabaseError::Serialization(format!("sms.id: {e}")))?,
        provider_sid: row.get::<String>(1).ok().filter(|s| !s.is_empty()),
        direction: direction
            .parse::<Direction>()
            .map_err(DatabaseError::Serialization)?,
        from_number: row.get(3).map_err(col("sms.from_number"))?,
        to_number: row.get(4).map_err(col("sms.to_number"))?,
        body: row.get(5).map_err(col("sms.body"))?,
        client_id: row.get::<i64>(6).ok(),
        repair_id: row.get::<i64>(7).ok(),
        message_type: message_type
            .parse::<MessageType>()
            .map_err(DatabaseError::Serialization)?,
        created_at: parse_datetime(&created),
    })
}

/// Collect every row of a query through `map`.
async fn collect_rows<T>(
    mut rows: libsql::Rows,
    op: &'static str,
    map: fn(&libsql::Row) -> Result<T, DatabaseError>,
) -> Result<Vec<T>, DatabaseError> {
    let mut out = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
    {
        out.push(map(&row)?);
    }
    Ok(out)
}

/// First row of a query through `map`, if any.
async fn first_row<T>(
    mut rows: libsql::Rows,
    op: &'static str,
    map: fn(&libsql::Row) -> Result<T, DatabaseError>,
) -> Result<Option<T>, DatabaseError> {
    match rows.next().await {
        Ok(Some(row)) => Ok(Some(map(&row)?)),
        Ok(None) => Ok(None),
        Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
    }
}

// ── Approval transaction ────────────────────────────────────────────

/// The writes of one approval. Runs inside an open transaction; the caller
/// commits or rolls back based on the result.
async fn write_approval(
    conn: &Connection,
    plan: &ApprovalPlan,
) -> Result<ApprovalWrite, DatabaseError> {
    let now = ts(&plan.approved_at);

    let claimed = conn
        .execute(
            "UPDATE estimates SET status = 'approved', approved_date = ?1, notified_date = ?1
             WHERE id = ?2 AND repair_id = ?3 AND status = 'pending'",
            params![now.clone(), plan.estimate_id, plan.repair_id],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("approve_estimate: {e}")))?;
    if claimed == 0 {
        return Ok(ApprovalWrite::AlreadyResolved);
    }

    let updated = conn
        .execute(
            // Only pre-repair states advance; see `RepairStatus::is_pre_repair`.
            "UPDATE repairs SET
                 status = CASE WHEN status IN ('queued', 'diagnosing', 'estimate', 'parts')
                               THEN ?1 ELSE status END,
                 labor_cost = ?2, updated_at = ?3
             WHERE id = ?4",
            params![
                RepairStatus::Repairing.as_str(),
                plan.labor_cost.to_string(),
                now.clone(),
                plan.repair_id
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("approve_repair: {e}")))?;
    if updated == 0 {
        return Err(DatabaseError::NotFound {
            entity: "repair".into(),
            id: plan.repair_id.to_string(),
        });
    }

    let part_id = match &plan.parts_line {
        Some(part) => {
            conn.execute(
                "INSERT INTO repair_parts (repair_id, part_id, name, quantity, unit_price, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    part.repair_id,
                    opt_int(part.part_id),
                    part.name.clone(),
                    part.quantity,
                    part.unit_price.to_string(),
                    now.clone()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("approve_part: {e}")))?;
            Some(conn.last_insert_rowid())
        }
        None => None,
    };

    conn.execute(
        "INSERT INTO repair_notes (repair_id, author, content, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![plan.repair_id, plan.note_author.clone(), plan.note.clone(), now],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("approve_note: {e}")))?;
    let note_id = conn.last_insert_rowid();

    Ok(ApprovalWrite::Applied { part_id, note_id })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl ShopStore for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        let conn = self.conn.lock().await;
        migrations::run_migrations(&conn).await
    }

    // ── Clients ─────────────────────────────────────────────────────

    async fn create_client(&self, client: &NewClient) -> Result<i64, DatabaseError> {
        let conn = self.conn.lock().await;
        let now = ts(&Utc::now());
        let phone = client
            .phone
            .as_deref()
            .map(normalize_phone)
            .filter(|p| !p.is_empty());

        conn.execute(
            "INSERT INTO clients (name, phone, email, sms_opted_in, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                client.name.clone(),
                opt_text(phone.as_deref()),
                opt_text(client.email.as_deref()),
                client.sms_opted_in as i64,
                now
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("create_client: {e}")))?;

        let id = conn.last_insert_rowid();
        debug!(client_id = id, "Client inserted");
        Ok(id)
    }

    async fn get_client(&self, id: i64) -> Result<Option<Client>, DatabaseError> {
        let conn = self.conn.lock().await;
        let rows = conn
            .query(
                &format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_client: {e}")))?;
        first_row(rows, "get_client", row_to_client).await
    }

    async fn add_client_phone(
        &self,
        client_id: i64,
        phone: &str,
        label: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let phone = normalize_phone(phone);
        if phone.is_empty() {
            return Err(DatabaseError::Constraint(
                "client phone has no digits".into(),
            ));
        }

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO client_phones (client_id, phone, label, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![client_id, phone, opt_text(label), ts(&Utc::now())],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("add_client_phone: {e}")))?;
        Ok(())
    }

    async fn list_client_phones(&self, client_id: i64) -> Result<Vec<String>, DatabaseError> {
        let conn = self.conn.lock().await;
        let rows = conn
            .query(
                "SELECT phone FROM client_phones WHERE client_id = ?1 ORDER BY id ASC",
                params![client_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_client_phones: {e}")))?;
        collect_rows(rows, "list_client_phones", |row| {
            row.get::<String>(0).map_err(col("client_phone.phone"))
        })
        .await
    }

    async fn find_client_by_listed_phone(
        &self,
        phone: &str,
    ) -> Result<Option<Client>, DatabaseError> {
        if phone.is_empty() {
            return Ok(None);
        }
        let conn = self.conn.lock().await;
        let rows = conn
            .query(
                &format!(
                    "SELECT {CLIENT_COLUMNS} FROM clients
                     JOIN client_phones ON client_phones.client_id = clients.id
                     WHERE client_phones.phone = ?1
                     ORDER BY client_phones.id ASC LIMIT 1"
                ),
                params![phone],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_client_by_listed_phone: {e}")))?;
        first_row(rows, "find_client_by_listed_phone", row_to_client).await
    }

    async fn find_client_by_primary_phone(
        &self,
        phone: &str,
    ) -> Result<Option<Client>, DatabaseError> {
        if phone.is_empty() {
            return Ok(None);
        }
        let conn = self.conn.lock().await;
        let rows = conn
            .query(
                &format!(
                    "SELECT {CLIENT_COLUMNS} FROM clients WHERE phone = ?1 ORDER BY id ASC LIMIT 1"
                ),
                params![phone],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_client_by_primary_phone: {e}")))?;
        first_row(rows, "find_client_by_primary_phone", row_to_client).await
    }

    async fn set_client_sms_opt_in(
        &self,
        client_id: i64,
        opted_in: bool,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn.lock().await;
        let affected = conn
            .execute(
                "UPDATE clients SET sms_opted_in = ?1, updated_at = ?2 WHERE id = ?3",
                params![opted_in as i64, ts(&Utc::now()), client_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_client_sms_opt_in: {e}")))?;

        debug!(client_id, opted_in, "Client SMS consent updated");
        Ok(affected > 0)
    }

    // ── Repairs ─────────────────────────────────────────────────────

    async fn create_repair(&self, repair: &NewRepair) -> Result<i64, DatabaseError> {
        let conn = self.conn.lock().await;
        let now = ts(&Utc::now());
        conn.execute(
            "INSERT INTO repairs (client_id, claim_number, device, status, priority, labor_cost,
                tax_exempt, shipping_fee, onsite_fee, rush_fee, deposit_amount, diagnostic_fee,
                diagnostic_fee_collected, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
            params![
                repair.client_id,
                repair.claim_number.clone(),
                repair.device.clone(),
                repair.status.as_str(),
                repair.priority.to_string(),
                repair.labor_cost.to_string(),
                repair.tax_exempt as i64,
                repair.shipping_fee.to_string(),
                repair.onsite_fee.to_string(),
                repair.rush_fee.to_string(),
                repair.deposit_amount.to_string(),
                opt_decimal(repair.diagnostic_fee),
                repair.diagnostic_fee_collected as i64,
                now
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("create_repair: {e}")))?;

        let id = conn.last_insert_rowid();
        debug!(repair_id = id, claim = %repair.claim_number, "Repair inserted");
        Ok(id)
    }

    async fn get_repair(&self, id: i64) -> Result<Option<Repair>, DatabaseError> {
        let conn = self.conn.lock().await;
        let rows = conn
            .query(
                &format!("SELECT {REPAIR_COLUMNS} FROM repairs WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_repair: {e}")))?;
        first_row(rows, "get_repair", row_to_repair).await
    }

    async fn add_repair_part(&self, part: &NewRepairPart) -> Result<i64, DatabaseError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO repair_parts (repair_id, part_id, name, quantity, unit_price, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                part.repair_id,
                opt_int(part.part_id),
                part.name.clone(),
                part.quantity,
                part.unit_price.to_string(),
                ts(&Utc::now())
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("add_repair_part: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    async fn list_repair_parts(&self, repair_id: i64) -> Result<Vec<RepairPart>, DatabaseError> {
        let conn = self.conn.lock().await;
        let rows = conn
            .query(
                &format!("SELECT {PART_COLUMNS} FROM repair_parts WHERE repair_id = ?1 ORDER BY id ASC"),
                params![repair_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_repair_parts: {e}")))?;
        collect_rows(rows, "list_repair_parts", row_to_part).await
    }

    async fn list_repair_notes(&self, repair_id: i64) -> Result<Vec<RepairNote>, DatabaseError> {
        let conn = self.conn.lock().await;
        let rows = conn
            .query(
                &format!("SELECT {NOTE_COLUMNS} FROM repair_notes WHERE repair_id = ?1 ORDER BY id ASC"),
                params![repair_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_repair_notes: {e}")))?;
        collect_rows(rows, "list_repair_notes", row_to_note).await
    }

    // ── Estimates ───────────────────────────────────────────────────

    async fn create_estimate(&self, estimate: &NewEstimate) -> Result<i64, DatabaseError> {
        let conn = self.conn.lock().await;
        let total = estimate.labor_cost + estimate.parts_cost;
        conn.execute(
            "INSERT INTO estimates (repair_id, label, status, labor_cost, parts_cost, total_cost, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                estimate.repair_id,
                opt_text(estimate.label.as_deref()),
                EstimateStatus::Pending.as_str(),
                estimate.labor_cost.to_string(),
                estimate.parts_cost.to_string(),
                total.to_string(),
                ts(&Utc::now())
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("create_estimate: {e}")))?;

        let id = conn.last_insert_rowid();
        debug!(estimate_id = id, repair_id = estimate.repair_id, "Estimate inserted");
        Ok(id)
    }

    async fn get_estimate(&self, id: i64) -> Result<Option<Estimate>, DatabaseError> {
        let conn = self.conn.lock().await;
        let rows = conn
            .query(
                &format!("SELECT {ESTIMATE_COLUMNS} FROM estimates WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_estimate: {e}")))?;
        first_row(rows, "get_estimate", row_to_estimate).await
    }

    async fn latest_pending_estimate(
        &self,
        repair_id: i64,
    ) -> Result<Option<Estimate>, DatabaseError> {
        let conn = self.conn.lock().await;
        let rows = conn
            .query(
                &format!(
                    "SELECT {ESTIMATE_COLUMNS} FROM estimates
                     WHERE repair_id = ?1 AND status = 'pending'
                     ORDER BY created_at DESC, id DESC LIMIT 1"
                ),
                params![repair_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("latest_pending_estimate: {e}")))?;
        first_row(rows, "latest_pending_estimate", row_to_estimate).await
    }

    async fn mark_estimate_notified(
        &self,
        id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn.lock().await;
        let affected = conn
            .execute(
                "UPDATE estimates SET notified_date = ?1 WHERE id = ?2",
                params![ts(&at), id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_estimate_notified: {e}")))?;
        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "estimate".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn apply_estimate_approval(
        &self,
        plan: &ApprovalPlan,
    ) -> Result<ApprovalWrite, DatabaseError> {
        let conn = self.conn.lock().await;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await
            .map_err(|e| DatabaseError::Query(format!("approval begin: {e}")))?;

        match write_approval(&tx, plan).await {
            Ok(ApprovalWrite::AlreadyResolved) => {
                tx.rollback()
                    .await
                    .map_err(|e| DatabaseError::Query(format!("approval rollback: {e}")))?;
                debug!(estimate_id = plan.estimate_id, "Estimate no longer pending");
                Ok(ApprovalWrite::AlreadyResolved)
            }
            Ok(applied) => {
                tx.commit()
                    .await
                    .map_err(|e| DatabaseError::Query(format!("approval commit: {e}")))?;
                info!(
                    estimate_id = plan.estimate_id,
                    repair_id = plan.repair_id,
                    "Estimate approval committed"
                );
                Ok(applied)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    warn!(error = %rb, "Approval rollback failed");
                }
                Err(e)
            }
        }
    }

    // ── SMS log ─────────────────────────────────────────────────────

    async fn insert_sms_message(&self, message: &NewSmsMessage) -> Result<Uuid, DatabaseError> {
        let conn = self.conn.lock().await;
        let id = Uuid::new_v4();
        conn.execute(
            &format!(
                "INSERT INTO sms_messages ({SMS_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            params![
                id.to_string(),
                opt_text(message.provider_sid.as_deref()),
                message.direction.as_str(),
                message.from_number.clone(),
                message.to_number.clone(),
                message.body.clone(),
                opt_int(message.client_id),
                opt_int(message.repair_id),
                message.message_type.as_str(),
                ts(&Utc::now())
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert_sms_message: {e}")))?;
        Ok(id)
    }

    async fn inbound_sid_exists(&self, provider_sid: &str) -> Result<bool, DatabaseError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT 1 FROM sms_messages WHERE provider_sid = ?1 AND direction = 'inbound' LIMIT 1",
                params![provider_sid],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("inbound_sid_exists: {e}")))?;
        match rows.next().await {
            Ok(row) => Ok(row.is_some()),
            Err(e) => Err(DatabaseError::Query(format!("inbound_sid_exists: {e}"))),
        }
    }

    async fn latest_outbound_message(
        &self,
        to_number: &str,
        message_type: MessageType,
    ) -> Result<Option<SmsMessage>, DatabaseError> {
        let conn = self.conn.lock().await;
        let rows = conn
            .query(
                &format!(
                    "SELECT {SMS_COLUMNS} FROM sms_messages
                     WHERE to_number = ?1 AND direction = 'outbound' AND message_type = ?2
                     ORDER BY created_at DESC, rowid DESC LIMIT 1"
                ),
                params![to_number, message_type.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("latest_outbound_message: {e}")))?;
        first_row(rows, "latest_outbound_message", row_to_sms).await
    }

    async fn list_sms_messages_for_number(
        &self,
        number: &str,
        limit: usize,
    ) -> Result<Vec<SmsMessage>, DatabaseError> {
        let conn = self.conn.lock().await;
        let rows = conn
            .query(
                &format!(
                    "SELECT {SMS_COLUMNS} FROM sms_messages
                     WHERE from_number = ?1 OR to_number = ?1
                     ORDER BY created_at DESC, rowid DESC LIMIT ?2"
                ),
                params![number, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_sms_messages_for_number: {e}")))?;
        collect_rows(rows, "list_sms_messages_for_number", row_to_sms).await
    }

    async fn count_sms_messages(&self) -> Result<i64, DatabaseError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query("SELECT COUNT(*) FROM sms_messages", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("count_sms_messages: {e}")))?;
        match rows.next().await {
            Ok(Some(row)) => row.get(0).map_err(col("count_sms_messages")),
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("count_sms_messages: {e}"))),
        }
    }
}

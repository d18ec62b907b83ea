use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Result, TrackerError};
use crate::models::Table;
use crate::notify::{ChangeCallback, ChangeEvent, ChangeFeed, ChangeKind, Subscription};
use crate::store::{DataStore, FilterOp, Query, format_time_of_day, format_timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Text,
    Integer,
    Date,
    Time,
    Timestamp,
}

struct Column {
    name: &'static str,
    kind: ColumnKind,
    /// Whether `update` may patch the column.
    mutable: bool,
}

const fn col(name: &'static str, kind: ColumnKind) -> Column {
    Column {
        name,
        kind,
        mutable: false,
    }
}

const fn mutable(name: &'static str, kind: ColumnKind) -> Column {
    Column {
        name,
        kind,
        mutable: true,
    }
}

const MEAL_COLUMNS: &[Column] = &[
    col("id", ColumnKind::Text),
    col("user_id", ColumnKind::Text),
    col("food_name", ColumnKind::Text),
    col("calories", ColumnKind::Integer),
    col("meal_time", ColumnKind::Time),
    col("created_at", ColumnKind::Timestamp),
];

const WATER_COLUMNS: &[Column] = &[
    col("id", ColumnKind::Text),
    col("user_id", ColumnKind::Text),
    col("amount_ml", ColumnKind::Integer),
    col("created_at", ColumnKind::Timestamp),
];

const GOAL_COLUMNS: &[Column] = &[
    col("id", ColumnKind::Text),
    col("user_id", ColumnKind::Text),
    col("date", ColumnKind::Date),
    mutable("calorie_goal", ColumnKind::Integer),
    mutable("water_goal_ml", ColumnKind::Integer),
    mutable("calorie_progress", ColumnKind::Integer),
    mutable("water_progress_ml", ColumnKind::Integer),
    col("created_at", ColumnKind::Timestamp),
    mutable("synced_at", ColumnKind::Timestamp),
];

fn columns(table: Table) -> &'static [Column] {
    match table {
        Table::Meals => MEAL_COLUMNS,
        Table::WaterIntake => WATER_COLUMNS,
        Table::Goals => GOAL_COLUMNS,
    }
}

fn find_column(table: Table, name: &str) -> Result<&'static Column> {
    columns(table)
        .iter()
        .find(|c| c.name == name)
        .ok_or_else(|| TrackerError::Validation(format!("unknown column {table}.{name}")))
}

fn column_list(cols: &[Column]) -> String {
    cols.iter().map(|c| c.name).collect::<Vec<_>>().join(", ")
}

/// Convert a JSON value for `column` into its stored form. Dates, times and timestamps are
/// normalized so that text comparison in SQL matches chronological order.
fn to_sql(table: Table, column: &Column, value: &Value) -> Result<SqlValue> {
    let mismatch = || {
        TrackerError::Validation(format!(
            "bad value for {table}.{}: {value}",
            column.name
        ))
    };
    match (column.kind, value) {
        (_, Value::Null) => Ok(SqlValue::Null),
        (ColumnKind::Integer, Value::Number(n)) => n.as_i64().map(SqlValue::Integer).ok_or_else(mismatch),
        (ColumnKind::Text, Value::String(s)) => Ok(SqlValue::Text(s.clone())),
        (ColumnKind::Date, Value::String(s)) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(|d| SqlValue::Text(d.format("%Y-%m-%d").to_string()))
            .map_err(|_| mismatch()),
        (ColumnKind::Time, Value::String(s)) => NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
            .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
            .map(|t| SqlValue::Text(format_time_of_day(t)))
            .map_err(|_| mismatch()),
        (ColumnKind::Timestamp, Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|ts| SqlValue::Text(format_timestamp(ts.with_timezone(&Utc))))
            .map_err(|_| mismatch()),
        _ => Err(mismatch()),
    }
}

fn row_to_json(row: &rusqlite::Row, cols: &[Column]) -> rusqlite::Result<Value> {
    let mut map = Map::new();
    for (i, column) in cols.iter().enumerate() {
        let value = match row.get::<_, SqlValue>(i)? {
            SqlValue::Integer(n) => Value::from(n),
            SqlValue::Real(f) => Value::from(f),
            SqlValue::Text(s) => Value::String(s),
            SqlValue::Null | SqlValue::Blob(_) => Value::Null,
        };
        map.insert(column.name.to_string(), value);
    }
    Ok(Value::Object(map))
}

fn into_object(table: Table, value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(TrackerError::Validation(format!(
            "{table} rows must be JSON objects, got {other}"
        ))),
    }
}

fn user_of(row: &Value) -> Option<String> {
    row.get("user_id").and_then(Value::as_str).map(str::to_string)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    /// Argon2 PHC string, or a `sha256$salt$hex` hash carried over from schema v2.
    pub password_hash: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub access_token: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Local SQLite Data Store.
///
/// The connection sits behind a mutex so the store can be shared across threads; change
/// events are published only after the lock is released.
pub struct Database {
    conn: Mutex<Connection>,
    changes: ChangeFeed,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| {
            TrackerError::Connectivity(format!(
                "Failed to open database {}: {e}",
                path.display()
            ))
        })?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrate(&conn)?;
        Ok(Database {
            conn: Mutex::new(conn),
            changes: ChangeFeed::new(),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| TrackerError::Connectivity("database lock poisoned".to_string()))
    }

    /// The push stream for rows written through this database.
    #[must_use]
    pub fn changes(&self) -> &ChangeFeed {
        &self.changes
    }

    // --- Users & sessions ---

    fn user_from_row(row: &rusqlite::Row) -> rusqlite::Result<UserRecord> {
        Ok(UserRecord {
            id: row.get(0)?,
            email: row.get(1)?,
            password_hash: row.get(2)?,
            created_at: row.get(3)?,
        })
    }

    pub fn insert_user(&self, email: &str, password_hash: &str) -> Result<UserRecord> {
        let user = UserRecord {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            created_at: format_timestamp(Utc::now()),
        };
        self.conn()?.execute(
            "INSERT INTO users (id, email, password_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![user.id, user.email, user.password_hash, user.created_at],
        )?;
        Ok(user)
    }

    pub fn set_password_hash(&self, user_id: &str, password_hash: &str) -> Result<()> {
        let changed = self.conn()?.execute(
            "UPDATE users SET password_hash = ?1 WHERE id = ?2",
            params![password_hash, user_id],
        )?;
        if changed == 0 {
            return Err(TrackerError::NotFound(format!("user {user_id}")));
        }
        Ok(())
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                "SELECT id, email, password_hash, created_at
                 FROM users WHERE email = ?1",
                params![email],
                Self::user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn get_user(&self, id: &str) -> Result<UserRecord> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, email, password_hash, created_at
             FROM users WHERE id = ?1",
            params![id],
            Self::user_from_row,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => TrackerError::NotFound(format!("user {id}")),
            other => other.into(),
        })
    }

    pub fn insert_session(&self, access_token: &str, user_id: &str, expires_at: DateTime<Utc>) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO sessions (access_token, user_id, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                access_token,
                user_id,
                format_timestamp(Utc::now()),
                format_timestamp(expires_at)
            ],
        )?;
        Ok(())
    }

    pub fn get_session(&self, access_token: &str) -> Result<Option<SessionRecord>> {
        let conn = self.conn()?;
        let row: Option<(String, String, String)> = conn
            .query_row(
                "SELECT access_token, user_id, expires_at FROM sessions WHERE access_token = ?1",
                params![access_token],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        row.map(|(access_token, user_id, expires_at)| {
            let expires_at = DateTime::parse_from_rfc3339(&expires_at)
                .map_err(|e| TrackerError::Connectivity(format!("malformed session expiry: {e}")))?
                .with_timezone(&Utc);
            Ok(SessionRecord {
                access_token,
                user_id,
                expires_at,
            })
        })
        .transpose()
    }

    pub fn delete_session(&self, access_token: &str) -> Result<bool> {
        let n = self.conn()?.execute(
            "DELETE FROM sessions WHERE access_token = ?1",
            params![access_token],
        )?;
        Ok(n > 0)
    }

    pub fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        let n = self.conn()?.execute(
            "DELETE FROM sessions WHERE expires_at <= ?1",
            params![format_timestamp(now)],
        )?;
        Ok(n)
    }

    // --- Rows ---

    fn select_by_id(conn: &Connection, table: Table, id: &str) -> Result<Value> {
        let cols = columns(table);
        conn.query_row(
            &format!("SELECT {} FROM {table} WHERE id = ?1", column_list(cols)),
            params![id],
            |row| row_to_json(row, cols),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => TrackerError::NotFound(format!("{table} row {id}")),
            other => other.into(),
        })
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version < 1 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                password_salt TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                access_token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS meals (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                food_name TEXT NOT NULL CHECK (length(trim(food_name)) > 0),
                calories INTEGER NOT NULL CHECK (calories > 0),
                meal_time TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS water_intake (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                amount_ml INTEGER NOT NULL CHECK (amount_ml > 0),
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS goals (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                date TEXT NOT NULL,
                calorie_goal INTEGER NOT NULL CHECK (calorie_goal > 0),
                water_goal_ml INTEGER NOT NULL CHECK (water_goal_ml > 0),
                calorie_progress INTEGER NOT NULL DEFAULT 0 CHECK (calorie_progress >= 0),
                water_progress_ml INTEGER NOT NULL DEFAULT 0 CHECK (water_progress_ml >= 0),
                created_at TEXT NOT NULL,
                UNIQUE (user_id, date)
            );

            CREATE INDEX IF NOT EXISTS idx_meals_user_created ON meals(user_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_water_user_created ON water_intake(user_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);

            PRAGMA user_version = 1;",
        )?;
    }

    if version < 2 {
        conn.execute_batch(
            "ALTER TABLE goals ADD COLUMN synced_at TEXT;
             PRAGMA user_version = 2;",
        )?;
    }

    // Passwords move to argon2. Old salted SHA-256 hashes are folded into one tagged string
    // and upgraded on the next successful sign-in.
    if version < 3 {
        conn.execute_batch(
            "UPDATE users SET password_hash = 'sha256$' || password_salt || '$' || password_hash;
             ALTER TABLE users DROP COLUMN password_salt;
             PRAGMA user_version = 3;",
        )?;
    }

    Ok(())
}

impl DataStore for Database {
    fn insert(&self, table: Table, row: Value) -> Result<Value> {
        let mut fields = into_object(table, row)?;
        fields
            .entry("id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        fields
            .entry("created_at")
            .or_insert_with(|| Value::String(format_timestamp(Utc::now())));

        let mut names = Vec::with_capacity(fields.len());
        let mut values = Vec::with_capacity(fields.len());
        for (key, value) in &fields {
            let column = find_column(table, key)?;
            names.push(column.name);
            values.push(to_sql(table, column, value)?);
        }
        let placeholders = (1..=names.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({placeholders})",
            names.join(", ")
        );
        let id = fields
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| TrackerError::Validation(format!("{table}.id must be a string")))?;

        let stored = {
            let conn = self.conn()?;
            conn.execute(&sql, params_from_iter(values))?;
            Self::select_by_id(&conn, table, &id)?
        };
        tracing::debug!(%table, %id, "row inserted");
        self.changes.publish(&ChangeEvent::push(
            table,
            ChangeKind::Insert,
            user_of(&stored),
            Some(id),
        ));
        Ok(stored)
    }

    fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>> {
        let cols = columns(table);
        let mut clauses = Vec::with_capacity(query.filters.len());
        let mut values = Vec::with_capacity(query.filters.len());
        for (i, filter) in query.filters.iter().enumerate() {
            let column = find_column(table, &filter.column)?;
            let op = match filter.op {
                FilterOp::Eq => "=",
                FilterOp::Gte => ">=",
                FilterOp::Lt => "<",
            };
            clauses.push(format!("{} {op} ?{}", column.name, i + 1));
            values.push(to_sql(table, column, &filter.value)?);
        }

        let mut sql = format!("SELECT {} FROM {table}", column_list(cols));
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        if let Some(order) = &query.order {
            let column = find_column(table, &order.column)?;
            let dir = if order.ascending { "ASC" } else { "DESC" };
            sql.push_str(&format!(" ORDER BY {} {dir}, rowid ASC", column.name));
        }
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), |row| row_to_json(row, cols))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn update(&self, table: Table, id: &str, patch: Value) -> Result<Value> {
        let fields = into_object(table, patch)?;
        if fields.is_empty() {
            return Err(TrackerError::Validation(format!(
                "empty update for {table} row {id}"
            )));
        }

        let mut sets = Vec::with_capacity(fields.len());
        let mut values = Vec::with_capacity(fields.len() + 1);
        for (i, (key, value)) in fields.iter().enumerate() {
            let column = find_column(table, key)?;
            if !column.mutable {
                return Err(TrackerError::Validation(format!(
                    "{table}.{key} cannot be updated"
                )));
            }
            sets.push(format!("{} = ?{}", column.name, i + 1));
            values.push(to_sql(table, column, value)?);
        }
        values.push(SqlValue::Text(id.to_string()));
        let sql = format!(
            "UPDATE {table} SET {} WHERE id = ?{}",
            sets.join(", "),
            values.len()
        );

        let stored = {
            let conn = self.conn()?;
            let changed = conn.execute(&sql, params_from_iter(values))?;
            if changed == 0 {
                return Err(TrackerError::NotFound(format!("{table} row {id}")));
            }
            Self::select_by_id(&conn, table, id)?
        };
        tracing::debug!(%table, %id, "row updated");
        self.changes.publish(&ChangeEvent::push(
            table,
            ChangeKind::Update,
            user_of(&stored),
            Some(id.to_string()),
        ));
        Ok(stored)
    }

    fn subscribe(&self, table: Table, on_change: ChangeCallback) -> Subscription {
        self.changes.subscribe(table, on_change)
    }
}

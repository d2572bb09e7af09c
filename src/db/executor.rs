//! Scalar query execution
//!
//! Runs one validated query and reduces its first column of its first row to
//! an `i64`.

use crate::error::{Result, TextToSqlError};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row, TypeInfo, ValueRef};
use tracing::debug;

/// Executes a query and returns its single integer result.
#[async_trait]
pub trait ScalarExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<i64>;
}

/// First-column value as read from Postgres, before integer coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Int(i64),
    Float(f64),
    Numeric(Decimal),
    Bool(bool),
    Text(String),
    /// A non-numeric value in display form (dates, timestamps, UUIDs), or a
    /// placeholder for types that are not decoded.
    Unsupported(String),
}

impl std::fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "NULL"),
            ScalarValue::Int(v) => write!(f, "{}", v),
            ScalarValue::Float(v) => write!(f, "{}", v),
            ScalarValue::Numeric(v) => write!(f, "{}", v),
            ScalarValue::Bool(v) => write!(f, "{}", v),
            ScalarValue::Text(v) => write!(f, "{}", v),
            ScalarValue::Unsupported(v) => write!(f, "{}", v),
        }
    }
}

/// Executor backed by a connection pool.
///
/// Every call checks out its own connection, runs inside a read-only
/// transaction and rolls back before returning it to the pool.
#[derive(Debug, Clone)]
pub struct PgScalarExecutor {
    pool: PgPool,
}

impl PgScalarExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScalarExecutor for PgScalarExecutor {
    async fn execute(&self, sql: &str) -> Result<i64> {
        if sql.trim().is_empty() {
            return Err(TextToSqlError::EmptyQuery);
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await?;

        let result = execute_scalar(&mut tx, sql).await;
        let rolled_back = tx.rollback().await;

        let value = result?;
        rolled_back?;
        Ok(value)
    }
}

/// Run `sql` on `conn` and coerce the first column of the first row.
pub async fn execute_scalar(conn: &mut PgConnection, sql: &str) -> Result<i64> {
    if sql.trim().is_empty() {
        return Err(TextToSqlError::EmptyQuery);
    }

    let row = sqlx::query(sql).fetch_optional(&mut *conn).await?;
    let row = row.ok_or(TextToSqlError::NoResult)?;

    let (value, type_name) = read_first_column(&row)?;
    debug!("query returned {} ({})", value, type_name);
    coerce_scalar(&value, &type_name)
}

fn read_first_column(row: &PgRow) -> Result<(ScalarValue, String)> {
    let (is_null, type_name) = {
        let raw = row.try_get_raw(0)?;
        (raw.is_null(), raw.type_info().name().to_string())
    };

    if is_null {
        return Ok((ScalarValue::Null, type_name));
    }

    let decoded = match type_name.as_str() {
        "INT2" => row.try_get::<i16, _>(0).map(|v| ScalarValue::Int(v.into())),
        "INT4" => row.try_get::<i32, _>(0).map(|v| ScalarValue::Int(v.into())),
        "INT8" => row.try_get::<i64, _>(0).map(ScalarValue::Int),
        "FLOAT4" => row.try_get::<f32, _>(0).map(|v| ScalarValue::Float(v.into())),
        "FLOAT8" => row.try_get::<f64, _>(0).map(ScalarValue::Float),
        "NUMERIC" => row.try_get::<Decimal, _>(0).map(ScalarValue::Numeric),
        "BOOL" => row.try_get::<bool, _>(0).map(ScalarValue::Bool),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => row.try_get::<String, _>(0).map(ScalarValue::Text),
        "TIMESTAMPTZ" => row
            .try_get::<DateTime<Utc>, _>(0)
            .map(|v| ScalarValue::Unsupported(v.to_rfc3339())),
        "TIMESTAMP" => row
            .try_get::<NaiveDateTime, _>(0)
            .map(|v| ScalarValue::Unsupported(v.to_string())),
        "DATE" => row
            .try_get::<NaiveDate, _>(0)
            .map(|v| ScalarValue::Unsupported(v.to_string())),
        "UUID" => row
            .try_get::<uuid::Uuid, _>(0)
            .map(|v| ScalarValue::Unsupported(v.to_string())),
        other => Ok(ScalarValue::Unsupported(format!("<{} value>", other.to_lowercase()))),
    };

    // NUMERIC 'NaN' and out-of-range NUMERIC do not decode into Decimal.
    let value = decoded.map_err(|e| TextToSqlError::NonNumericResult {
        value: format!("<undecodable: {}>", e),
        type_name: type_name.clone(),
    })?;

    Ok((value, type_name))
}

/// Convert a first-column value to `i64`.
///
/// Fractional values are truncated toward zero. Booleans map to 0/1 and text
/// must parse as an integer.
pub fn coerce_scalar(value: &ScalarValue, type_name: &str) -> Result<i64> {
    let non_numeric = || TextToSqlError::NonNumericResult {
        value: value.to_string(),
        type_name: type_name.to_string(),
    };

    match value {
        ScalarValue::Null => Err(TextToSqlError::NoResult),
        ScalarValue::Int(v) => Ok(*v),
        ScalarValue::Float(v) => {
            if v.is_finite() && *v >= i64::MIN as f64 && *v < i64::MAX as f64 {
                Ok(v.trunc() as i64)
            } else {
                Err(non_numeric())
            }
        }
        ScalarValue::Numeric(v) => v.trunc().to_i64().ok_or_else(non_numeric),
        ScalarValue::Bool(v) => Ok(i64::from(*v)),
        ScalarValue::Text(v) => v.trim().parse::<i64>().map_err(|_| non_numeric()),
        ScalarValue::Unsupported(_) => Err(non_numeric()),
    }
}

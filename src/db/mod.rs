//! PostgreSQL access
//!
//! Pool construction, scalar query execution and read-only role provisioning.

pub mod connection;
pub mod executor;
pub mod readonly_role;

pub use connection::{init_pool, DbPool};
pub use executor::{coerce_scalar, execute_scalar, PgScalarExecutor, ScalarExecutor, ScalarValue};

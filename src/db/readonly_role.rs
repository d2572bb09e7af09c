//! Read-only database role
//!
//! The login role generated SQL runs under. It may read every table and
//! sequence of one schema and nothing else.

use crate::error::{Result, TextToSqlError};
use regex::Regex;
use sqlx::PgPool;
use std::sync::OnceLock;
use tracing::info;

const DOLLAR_TAG: &str = "$provision$";

static ROLE_NAME: OnceLock<Regex> = OnceLock::new();

fn check_identifier(kind: &str, name: &str) -> Result<()> {
    let re = ROLE_NAME.get_or_init(|| {
        Regex::new(r"^[a-z_][a-z0-9_]{0,62}$").expect("identifier pattern is valid")
    });
    if !re.is_match(name) {
        return Err(TextToSqlError::Config(format!(
            "invalid {} name '{}': use lowercase letters, digits and underscores",
            kind, name
        )));
    }
    Ok(())
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Statements that create `role` if missing and give it read-only access to
/// `schema`. Safe to run repeatedly.
pub fn provision_statements(role: &str, password: &str, schema: &str) -> Result<Vec<String>> {
    check_identifier("role", role)?;
    check_identifier("schema", schema)?;
    if password.is_empty() {
        return Err(TextToSqlError::Config("read-only role password is empty".to_string()));
    }
    if password.contains(DOLLAR_TAG) {
        return Err(TextToSqlError::Config(format!(
            "read-only role password must not contain {}",
            DOLLAR_TAG
        )));
    }

    let password = quote_literal(password);
    Ok(vec![
        format!(
            "DO {tag}
BEGIN
  IF NOT EXISTS (SELECT 1 FROM pg_roles WHERE rolname = '{role}') THEN
    CREATE ROLE {role} LOGIN PASSWORD {password} NOSUPERUSER NOCREATEDB NOCREATEROLE NOINHERIT;
  ELSE
    ALTER ROLE {role} PASSWORD {password};
  END IF;
END
{tag}",
            tag = DOLLAR_TAG,
            role = role,
            password = password,
        ),
        format!(
            "DO {tag}
BEGIN
  EXECUTE format('GRANT CONNECT ON DATABASE %I TO {role}', current_database());
END
{tag}",
            tag = DOLLAR_TAG,
            role = role,
        ),
        format!("GRANT USAGE ON SCHEMA {} TO {}", schema, role),
        format!("GRANT SELECT ON ALL TABLES IN SCHEMA {} TO {}", schema, role),
        format!("GRANT SELECT ON ALL SEQUENCES IN SCHEMA {} TO {}", schema, role),
        format!(
            "REVOKE INSERT, UPDATE, DELETE, TRUNCATE ON ALL TABLES IN SCHEMA {} FROM {}",
            schema, role
        ),
        format!("REVOKE CREATE ON SCHEMA {} FROM {}", schema, role),
    ])
}

/// Statements that undo `provision_statements` and drop the role.
pub fn revoke_statements(role: &str, schema: &str) -> Result<Vec<String>> {
    check_identifier("role", role)?;
    check_identifier("schema", schema)?;

    Ok(vec![
        format!(
            "DO {tag}
BEGIN
  IF EXISTS (SELECT 1 FROM pg_roles WHERE rolname = '{role}') THEN
    EXECUTE 'REVOKE SELECT ON ALL TABLES IN SCHEMA {schema} FROM {role}';
    EXECUTE 'REVOKE SELECT ON ALL SEQUENCES IN SCHEMA {schema} FROM {role}';
    EXECUTE 'REVOKE USAGE ON SCHEMA {schema} FROM {role}';
    EXECUTE format('REVOKE CONNECT ON DATABASE %I FROM {role}', current_database());
    DROP ROLE {role};
  END IF;
END
{tag}",
            tag = DOLLAR_TAG,
            role = role,
            schema = schema,
        ),
    ])
}

/// Create or refresh the read-only role. Must run as a role allowed to
/// create roles and grant on `schema`.
pub async fn provision_readonly_role(
    pool: &PgPool,
    role: &str,
    password: &str,
    schema: &str,
) -> Result<()> {
    let statements = provision_statements(role, password, schema)?;
    run_in_transaction(pool, &statements).await?;
    info!("read-only role '{}' provisioned on schema '{}'", role, schema);
    Ok(())
}

pub async fn drop_readonly_role(pool: &PgPool, role: &str, schema: &str) -> Result<()> {
    let statements = revoke_statements(role, schema)?;
    run_in_transaction(pool, &statements).await?;
    info!("read-only role '{}' dropped", role);
    Ok(())
}

async fn run_in_transaction(pool: &PgPool, statements: &[String]) -> Result<()> {
    let mut tx = pool.begin().await?;
    for statement in statements {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    Ok(())
}

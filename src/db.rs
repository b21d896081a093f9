//! Connection helpers and the query gateway.
//!
//! Physical table and column names are configuration-supplied, so nothing
//! here goes through static entities: statements are assembled with
//! `sea_query`, identifiers ride as [`Alias`] (quoted by the backend
//! builder) and every value is a bind parameter. Rows come back as JSON
//! field maps keyed by column name.

use std::time::Duration;

use sea_orm::sea_query::{Alias, Asterisk, Condition, Expr, Func, Query, SelectStatement, SimpleExpr};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, FromQueryResult,
    Value,
};
use tracing::{debug, info};

use crate::errors::CartError;

/// One result row: column name to JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Configuration for the database connection pool.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections
    pub max_connections: u32,
    /// Minimum number of connections
    pub min_connections: u32,
    /// Connection timeout duration
    pub connect_timeout: Duration,
    /// Idle timeout duration
    pub idle_timeout: Duration,
    /// Acquire connection timeout
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

/// Establishes a connection pool with default pool settings.
pub async fn connect(database_url: &str) -> Result<DatabaseConnection, CartError> {
    let config = DbConfig {
        url: database_url.to_string(),
        ..Default::default()
    };
    connect_with(&config).await
}

/// Establishes a connection pool with custom pool settings.
pub async fn connect_with(config: &DbConfig) -> Result<DatabaseConnection, CartError> {
    debug!("configuring database connection: {:?}", config);

    let mut options = ConnectOptions::new(config.url.clone());
    options
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(true);

    info!(
        max_connections = config.max_connections,
        "connecting to database"
    );

    Ok(Database::connect(options).await?)
}

/// Thin wrapper over the relational executor: count, insert, update, delete
/// and select against configuration-supplied table names.
///
/// Methods are generic over [`ConnectionTrait`] so a sequence of calls can
/// share one transaction. The gateway is only responsible for identifier
/// quoting and bind-parameter execution; policy lives in the callers.
#[derive(Debug, Clone, Copy)]
pub struct QueryGateway {
    backend: DbBackend,
}

impl QueryGateway {
    pub fn new(backend: DbBackend) -> Self {
        Self { backend }
    }

    pub fn for_connection(conn: &DatabaseConnection) -> Self {
        Self::new(conn.get_database_backend())
    }

    /// Number of rows matching the predicate.
    pub async fn count<C: ConnectionTrait>(
        &self,
        conn: &C,
        table: &str,
        predicate: Condition,
    ) -> Result<i64, CartError> {
        let mut query = Query::select();
        query
            .expr_as(Func::count(Expr::col(Asterisk)), Alias::new("cnt"))
            .from(Alias::new(table))
            .cond_where(predicate);
        let row = conn.query_one(self.backend.build(&query)).await?;
        match row {
            Some(row) => Ok(row.try_get::<i64>("", "cnt")?),
            None => Ok(0),
        }
    }

    /// Insert one row; returns whether a row was written.
    pub async fn insert<C: ConnectionTrait>(
        &self,
        conn: &C,
        table: &str,
        fields: Vec<(String, Value)>,
    ) -> Result<bool, CartError> {
        let (columns, values): (Vec<_>, Vec<_>) =
            fields.into_iter().map(|(column, value)| (Alias::new(column), value)).unzip();
        let mut query = Query::insert();
        query
            .into_table(Alias::new(table))
            .columns(columns)
            .values_panic(values.into_iter().map(SimpleExpr::from));
        let result = conn.execute(self.backend.build(&query)).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Update matching rows; returns whether any row was affected.
    pub async fn update<C: ConnectionTrait>(
        &self,
        conn: &C,
        table: &str,
        fields: Vec<(String, Value)>,
        predicate: Condition,
    ) -> Result<bool, CartError> {
        let mut query = Query::update();
        query.table(Alias::new(table));
        for (column, value) in fields {
            query.value(Alias::new(column), value);
        }
        query.cond_where(predicate);
        let result = conn.execute(self.backend.build(&query)).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete matching rows; returns whether any row was affected.
    pub async fn delete<C: ConnectionTrait>(
        &self,
        conn: &C,
        table: &str,
        predicate: Condition,
    ) -> Result<bool, CartError> {
        let mut query = Query::delete();
        query.from_table(Alias::new(table)).cond_where(predicate);
        let result = conn.execute(self.backend.build(&query)).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Select the given columns (all columns when empty) from one table.
    pub async fn select<C: ConnectionTrait>(
        &self,
        conn: &C,
        table: &str,
        predicate: Condition,
        columns: &[&str],
    ) -> Result<Vec<Row>, CartError> {
        let mut query = Query::select();
        query.from(Alias::new(table)).cond_where(predicate);
        if columns.is_empty() {
            query.column(Asterisk);
        } else {
            for column in columns {
                query.column(Alias::new(*column));
            }
        }
        self.fetch_all(conn, &query).await
    }

    /// Execute an arbitrary select (e.g. a join) built by the caller.
    pub async fn fetch_all<C: ConnectionTrait>(
        &self,
        conn: &C,
        query: &SelectStatement,
    ) -> Result<Vec<Row>, CartError> {
        let rows = serde_json::Value::find_by_statement(self.backend.build(query))
            .all(conn)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match row {
                serde_json::Value::Object(map) => Some(map),
                _ => None,
            })
            .collect())
    }
}

/// Convert a JSON scalar into a bind value. Non-scalar values (and nulls)
/// yield `None` and are skipped by callers building predicates.
pub(crate) fn bind_value(value: &serde_json::Value) -> Option<Value> {
    match value {
        serde_json::Value::Bool(flag) => Some((*flag).into()),
        serde_json::Value::Number(number) => number
            .as_i64()
            .map(Value::from)
            .or_else(|| number.as_f64().map(Value::from)),
        serde_json::Value::String(text) => Some(text.clone().into()),
        _ => None,
    }
}

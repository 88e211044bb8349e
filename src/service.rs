//! Link storage service: the CRUD contract over a [`DbSource`].
//!
//! Statements are templated with the configured schema and run through the
//! wire client; result contexts are shaped into name-keyed rows or an
//! affected-row count before they leave this module.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::pg::{QueryContext, Value};
use crate::source::DbSource;

/// A shaped statement result: rows keyed by column name, or the number of
/// rows a write touched. Statements that report neither produce no response.
///
/// Serializes untagged, so a rows result is a plain JSON array.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DbResponse {
    Rows(Vec<HashMap<String, Value>>),
    Affected(i64),
}

/// Outcome of resolving a short id to its original URL. A lookup failure is
/// folded into `NotFound`: a redirect endpoint answers 404 either way.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkLookup {
    Found { original_url: String },
    NotFound,
    Deactivated,
}

/// Service over the `links` and `stats` tables.
pub struct LinkService {
    source: DbSource,
}

impl LinkService {
    /// The source is injected, never reached for globally; tests hand in a
    /// source pointed at a local listener.
    pub fn new(source: DbSource) -> Self {
        Self { source }
    }

    pub async fn close(&mut self) -> Result<()> {
        self.source.close().await?;
        Ok(())
    }

    /// Connectivity probe. Never fails: any error is logged and reported as
    /// an unhealthy `false` so startup checks can retry.
    pub async fn check_db(&mut self) -> bool {
        match self
            .execute("select schema_name from information_schema.schemata", &[])
            .await
        {
            Ok(_) => {
                info!("database connection ok");
                true
            }
            Err(e) => {
                error!(error = %e, "database connection failed");
                false
            }
        }
    }

    /// Insert a short-id to original-URL mapping.
    pub async fn create_link(
        &mut self,
        url_id: &str,
        original_url: &str,
    ) -> Result<Option<DbResponse>> {
        let stmt = format!(
            "INSERT INTO {}.links(url_id, original_url) values($1,$2)",
            self.source.schema()
        );
        self.execute_in_transaction(
            &stmt,
            &[
                Value::Text(url_id.to_string()),
                Value::Text(original_url.to_string()),
            ],
        )
        .await
    }

    /// Fetch the stored row for a short id, shaped but uninterpreted.
    pub async fn get_original_by_short(&mut self, url_id: &str) -> Result<Option<DbResponse>> {
        let stmt = format!(
            "SELECT url_id, original_url, active from {}.links where url_id=$1",
            self.source.schema()
        );
        self.execute(&stmt, &[Value::Text(url_id.to_string())])
            .await
    }

    /// Resolve a short id for redirection. Distinguishes a missing link from
    /// one that exists but was deactivated; errors resolve to `NotFound`.
    pub async fn resolve_link(&mut self, url_id: &str) -> LinkLookup {
        let rows = match self.get_original_by_short(url_id).await {
            Ok(Some(DbResponse::Rows(rows))) => rows,
            Ok(_) => return LinkLookup::NotFound,
            Err(e) => {
                warn!(url_id, error = %e, "link lookup failed");
                return LinkLookup::NotFound;
            }
        };
        let Some(row) = rows.into_iter().next() else {
            return LinkLookup::NotFound;
        };
        if row.get("active").and_then(Value::as_int) == Some(0) {
            return LinkLookup::Deactivated;
        }
        match row.get("original_url").and_then(Value::as_text) {
            Some(url) => LinkLookup::Found {
                original_url: url.to_string(),
            },
            None => LinkLookup::NotFound,
        }
    }

    /// Mark a link inactive. Returns the number of rows the update touched,
    /// if the server reported one.
    pub async fn deactivate_link(&mut self, url_id: &str) -> Result<Option<i64>> {
        let stmt = format!(
            "UPDATE {}.links SET active=0 where url_id=$1",
            self.source.schema()
        );
        let response = self
            .execute_in_transaction(&stmt, &[Value::Text(url_id.to_string())])
            .await?;
        Ok(match response {
            Some(DbResponse::Affected(n)) => Some(n),
            _ => None,
        })
    }

    /// Record one visit. Statistics are best-effort: a failure is logged and
    /// swallowed so it never breaks the redirect that triggered it.
    pub async fn add_statistic(&mut self, url_id: &str, info: &str) {
        let stmt = format!(
            "INSERT INTO {}.stats(url_id, info) values($1,$2)",
            self.source.schema()
        );
        if let Err(e) = self
            .execute_in_transaction(
                &stmt,
                &[Value::Text(url_id.to_string()), Value::Text(info.to_string())],
            )
            .await
        {
            warn!(url_id, error = %e, "failed to record statistic");
        }
    }

    pub async fn get_stats_count_by_id(&mut self, url_id: &str) -> Result<Option<DbResponse>> {
        let stmt = format!(
            "SELECT count(*) from {}.stats where url_id=$1",
            self.source.schema()
        );
        self.execute(&stmt, &[Value::Text(url_id.to_string())])
            .await
    }

    /// Page through recorded visits, newest-first ordering left to the table.
    pub async fn get_stats_by_url_id(
        &mut self,
        url_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Option<DbResponse>> {
        let stmt = format!(
            "SELECT info, happened from {}.stats where url_id=$1 limit $2 offset $3",
            self.source.schema()
        );
        self.execute(
            &stmt,
            &[
                Value::Text(url_id.to_string()),
                Value::Int(limit),
                Value::Int(offset),
            ],
        )
        .await
    }

    async fn execute(&mut self, stmt: &str, params: &[Value]) -> Result<Option<DbResponse>> {
        let connection = self.source.acquire().await?;
        let ctx = connection.run_query(stmt, params).await?;
        if let Some(err) = ctx.error {
            return Err(Error::Query(err));
        }
        Ok(shape_response(ctx))
    }

    /// Writes run inside an explicit transaction so a mid-statement failure
    /// leaves nothing half-applied. A failed statement is rolled back
    /// best-effort: the single shared connection must not stay inside a
    /// failed transaction block.
    async fn execute_in_transaction(
        &mut self,
        stmt: &str,
        params: &[Value],
    ) -> Result<Option<DbResponse>> {
        self.execute("START TRANSACTION", &[]).await?;
        let result = match self.execute(stmt, params).await {
            Ok(result) => result,
            Err(e) => {
                let _ = self.execute("ROLLBACK", &[]).await;
                return Err(e);
            }
        };
        self.execute("COMMIT", &[]).await?;
        Ok(result)
    }
}

/// Column metadata takes precedence: a SELECT that matched nothing is
/// `Rows(vec![])`, not an affected count and not absent.
fn shape_response(ctx: QueryContext) -> Option<DbResponse> {
    match (ctx.columns, ctx.rows) {
        (Some(columns), Some(rows)) => {
            let shaped = rows
                .into_iter()
                .map(|row| {
                    columns
                        .iter()
                        .map(|column| column.name.clone())
                        .zip(row)
                        .collect()
                })
                .collect();
            Some(DbResponse::Rows(shaped))
        }
        _ if ctx.rows_count >= 0 => Some(DbResponse::Affected(ctx.rows_count)),
        _ => None,
    }
}

//! Mutable result accumulator for one statement execution.

use bytes::Bytes;

use super::error::{PgError, PgResult, ServerError};
use super::protocol::{FieldDescription, TransactionStatus};
use super::types::{self, Value};

/// Accumulates everything the server reports for one statement: column
/// metadata, decoded rows, affected-row count and a terminal error.
///
/// `rows` stays `None` until a row description arrives; a statement that
/// returns a row description with zero data rows ends with `Some(vec![])`,
/// which is distinct from `None`. `rows_count` starts at the -1 sentinel and
/// sums across command completions: the extended path drains several phases
/// into one context, so later counts add instead of overwriting.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub stmt: String,
    pub columns: Option<Vec<FieldDescription>>,
    pub rows: Option<Vec<Vec<Value>>>,
    pub rows_count: i64,
    pub error: Option<ServerError>,
}

impl QueryContext {
    pub fn new(stmt: &str) -> Self {
        Self {
            stmt: stmt.to_string(),
            columns: None,
            rows: None,
            rows_count: -1,
            error: None,
        }
    }

    /// Record column metadata; initializes `rows` to present-but-empty on the
    /// first row description.
    pub fn record_row_description(&mut self, fields: Vec<FieldDescription>) {
        if !fields.is_empty() && self.rows.is_none() {
            self.rows = Some(Vec::new());
        }
        self.columns = Some(fields);
    }

    /// Decode one data row through the stored column descriptors.
    ///
    /// The iteration is driven by the descriptors, not the wire field count;
    /// a length of -1 became `None` at the framing layer and decodes to
    /// [`Value::Null`] without consulting any converter.
    pub fn record_data_row(&mut self, values: &[Option<Bytes>]) -> PgResult<()> {
        let columns = self
            .columns
            .as_ref()
            .ok_or_else(|| PgError::Protocol("data row before row description".into()))?;
        let mut row = Vec::with_capacity(columns.len());
        for (column, raw) in columns.iter().zip(values) {
            let value = match raw {
                None => Value::Null,
                Some(data) => {
                    let text = std::str::from_utf8(data)
                        .map_err(|e| PgError::Type(format!("invalid UTF-8 in row data: {e}")))?;
                    types::decode(column.type_oid, text)?
                }
            };
            row.push(value);
        }
        self.rows
            .as_mut()
            .ok_or_else(|| PgError::Protocol("data row before row description".into()))?
            .push(row);
        Ok(())
    }

    /// Fold a command-complete tag into the context.
    ///
    /// A completion inside a failed transaction block for anything other
    /// than a ROLLBACK means earlier statements were not durably applied;
    /// that is raised, never returned as a normal result.
    pub fn record_command_complete(
        &mut self,
        tag: &str,
        transaction_status: TransactionStatus,
    ) -> PgResult<()> {
        if transaction_status == TransactionStatus::InFailedTransaction && !self.stmt.is_empty() {
            let keyword = self
                .stmt
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .trim_end_matches(';')
                .to_ascii_uppercase();
            if keyword != "ROLLBACK" {
                return Err(PgError::TransactionIntegrity {
                    stmt: self.stmt.clone(),
                });
            }
        }

        // Trailing integer token of tags like "UPDATE 3" or "INSERT 0 1";
        // tags without one ("CREATE TABLE", "BEGIN") record nothing.
        if let Some(count) = tag
            .rsplit(' ')
            .next()
            .and_then(|token| token.parse::<i64>().ok())
        {
            if self.rows_count == -1 {
                self.rows_count = count;
            } else {
                self.rows_count += count;
            }
        }
        Ok(())
    }

    /// Record a server-reported error; the dispatch loop keeps draining to
    /// ready-for-query so the connection stays usable.
    ///
    /// The first error wins. On the extended path a Parse failure makes the
    /// remaining phases error against the now-nonexistent unnamed statement,
    /// and those follow-on errors must not mask the root cause.
    pub fn record_error(&mut self, error: ServerError) {
        self.error.get_or_insert(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pg::types::Oid;

    fn column(name: &str, oid: Oid) -> FieldDescription {
        FieldDescription {
            name: name.to_string(),
            table_oid: 0,
            column_attr_num: 0,
            type_oid: oid,
            type_size: -1,
            type_modifier: -1,
            format: 0,
        }
    }

    #[test]
    fn rows_absent_until_row_description() {
        let mut ctx = QueryContext::new("SELECT url_id FROM links");
        assert!(ctx.rows.is_none());

        ctx.record_row_description(vec![column("url_id", Oid::VARCHAR)]);
        assert_eq!(ctx.rows, Some(vec![]), "present-but-empty after metadata");
    }

    #[test]
    fn data_row_before_description_is_protocol_error() {
        let mut ctx = QueryContext::new("SELECT 1");
        let err = ctx
            .record_data_row(&[Some(Bytes::from_static(b"1"))])
            .unwrap_err();
        assert!(matches!(err, PgError::Protocol(_)));
    }

    #[test]
    fn null_field_skips_the_converter() {
        let mut ctx = QueryContext::new("SELECT active FROM links");
        ctx.record_row_description(vec![column("active", Oid::INT4)]);
        // -1 length arrived as None; an INT4 converter would reject "".
        ctx.record_data_row(&[None]).unwrap();
        assert_eq!(ctx.rows.as_ref().unwrap()[0][0], Value::Null);
    }

    #[test]
    fn rows_decode_by_column_oid() {
        let mut ctx = QueryContext::new("SELECT url_id, active FROM links");
        ctx.record_row_description(vec![
            column("url_id", Oid::VARCHAR),
            column("active", Oid::INT4),
        ]);
        ctx.record_data_row(&[
            Some(Bytes::from_static(b"ab12")),
            Some(Bytes::from_static(b"1")),
        ])
        .unwrap();
        assert_eq!(
            ctx.rows.as_ref().unwrap()[0],
            vec![Value::Text("ab12".to_string()), Value::Int(1)]
        );
    }

    #[test]
    fn command_complete_counts_accumulate() {
        let mut ctx = QueryContext::new("UPDATE links SET active=0");
        assert_eq!(ctx.rows_count, -1);

        ctx.record_command_complete("UPDATE 2", TransactionStatus::Idle)
            .unwrap();
        assert_eq!(ctx.rows_count, 2);

        ctx.record_command_complete("UPDATE 3", TransactionStatus::Idle)
            .unwrap();
        assert_eq!(ctx.rows_count, 5, "second completion sums, not overwrites");
    }

    #[test]
    fn tag_without_count_records_nothing() {
        let mut ctx = QueryContext::new("CREATE TABLE t (id INT)");
        ctx.record_command_complete("CREATE TABLE", TransactionStatus::Idle)
            .unwrap();
        assert_eq!(ctx.rows_count, -1);
    }

    #[test]
    fn failed_transaction_completion_raises() {
        let mut ctx = QueryContext::new("INSERT INTO links VALUES ($1, $2)");
        let err = ctx
            .record_command_complete("INSERT 0 1", TransactionStatus::InFailedTransaction)
            .unwrap_err();
        assert!(matches!(err, PgError::TransactionIntegrity { .. }));
    }

    #[test]
    fn first_server_error_is_kept() {
        let error = |code: &str, message: &str| ServerError {
            severity: "ERROR".to_string(),
            code: code.to_string(),
            message: message.to_string(),
            detail: None,
            hint: None,
        };
        let mut ctx = QueryContext::new("SELEC 1");
        ctx.record_error(error("42601", "syntax error at or near \"SELEC\""));
        // Follow-on phase errors against the never-parsed unnamed statement.
        ctx.record_error(error("26000", "prepared statement \"\" does not exist"));
        ctx.record_error(error("34000", "portal \"\" does not exist"));
        assert_eq!(ctx.error.as_ref().unwrap().code, "42601");
    }

    #[test]
    fn rollback_is_allowed_in_failed_transaction() {
        for stmt in ["ROLLBACK", "rollback;", "Rollback Work"] {
            let mut ctx = QueryContext::new(stmt);
            ctx.record_command_complete("ROLLBACK", TransactionStatus::InFailedTransaction)
                .unwrap();
        }
    }
}

use docstore_protocol::{Condition, Query};
use rusqlite::types::Value as SqlValue;

use crate::util::json_to_sql;

/// Converts a structured `Query` into a prepared statement and its bound
/// arguments. The operator set is intentionally small (spec.md §4.C):
/// `=, >, <, >=, <=, !=, in, not in, like`, each mapping to exactly one `?`
/// placeholder bound to the condition's raw value — `in`/`not in` are no
/// exception, which means they only behave as a true set test when the
/// caller supplies a single scalar; a multi-value `IN` list isn't part of
/// this operator set (documented as a known gap in DESIGN.md).
pub struct Translator;

impl Translator {
    pub fn translate(collection: &str, query: &Query, limit_one: bool) -> (String, Vec<SqlValue>) {
        let mut clauses = Vec::new();
        let mut args = Vec::new();

        for (field, cond) in query.iter() {
            match cond {
                Condition::Eq(v) => {
                    clauses.push(format!("{field} = ?"));
                    args.push(json_to_sql(v));
                }
                Condition::Op(op, v) => {
                    clauses.push(format!("{field} {} ?", op.as_sql()));
                    args.push(json_to_sql(v));
                }
            }
        }

        let mut sql = format!("SELECT id, json, date FROM {collection}");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        if limit_one {
            sql.push_str(" LIMIT 1");
        }
        (sql, args)
    }

    pub fn explain(sql: &str) -> String {
        format!("EXPLAIN QUERY PLAN {sql}")
    }
}

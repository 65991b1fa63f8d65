//! SQL fragments for completion predicates.
//!
//! Each predicate is turned into a sub-select of item IDs so a whole stage can be
//! classified with one aggregate statement. A predicate whose table does not
//! exist yet resolves to the empty set instead of an error.

use crate::error::{Result, StagehandError};
use crate::registry::{CompletionPredicate, Stage};
use crate::store::{OutputStatus, Store};

/// Sub-select that yields no rows.
pub const EMPTY_SET: &str = "SELECT NULL WHERE 0";

/// Resolved ID sets for one stage as of one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredicateSql {
    /// Items whose output is complete (`ok` or `empty`).
    pub complete: String,
    /// Items permanently failed for this stage.
    pub failed: String,
    /// Whether the predicate's backing table was found.
    pub present: bool,
}

impl PredicateSql {
    /// Resolve a stage's predicate against the current store schema.
    pub fn resolve(stage: &Stage, store: &Store) -> Result<Self> {
        match &stage.predicate {
            CompletionPredicate::Table(table) => {
                if !store.table_exists(table)? {
                    return Ok(Self::absent());
                }
                Ok(Self {
                    complete: format!(
                        "SELECT item_id FROM {table} WHERE status IN ('{}', '{}')",
                        OutputStatus::Ok.as_str(),
                        OutputStatus::Empty.as_str()
                    ),
                    failed: format!(
                        "SELECT item_id FROM {table} WHERE status = '{}'",
                        OutputStatus::Failed.as_str()
                    ),
                    present: true,
                })
            }
            CompletionPredicate::Query(sql) => {
                let sql = sql.trim().trim_end_matches(';').to_string();
                match store.conn().prepare(&sql) {
                    Ok(_) => Ok(Self {
                        complete: sql,
                        failed: EMPTY_SET.to_string(),
                        present: true,
                    }),
                    Err(err) if is_missing_table(&err) => Ok(Self::absent()),
                    Err(err) => Err(StagehandError::Store(format!(
                        "predicate query for stage {} is invalid: {}",
                        stage.name, err
                    ))),
                }
            }
        }
    }

    fn absent() -> Self {
        Self {
            complete: EMPTY_SET.to_string(),
            failed: EMPTY_SET.to_string(),
            present: false,
        }
    }
}

/// SQLite reports unknown tables as a generic error with this message prefix.
pub fn is_missing_table(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(_, Some(msg)) => msg.starts_with("no such table"),
        _ => false,
    }
}

/// One statement classifying every eligible item of a stage.
///
/// Rows are `(item_id, class)` where class is `c` (complete), `f` (failed) or
/// `p` (pending), ordered by item ID.
pub fn classify_sql(own: &PredicateSql, deps: &[&PredicateSql]) -> String {
    let mut sql = format!(
        "SELECT i.id, CASE WHEN i.id IN ({}) THEN 'c' WHEN i.id IN ({}) THEN 'f' ELSE 'p' END FROM items i",
        own.complete, own.failed
    );
    for (n, dep) in deps.iter().enumerate() {
        sql.push_str(if n == 0 { " WHERE " } else { " AND " });
        sql.push_str(&format!("i.id IN ({})", dep.complete));
    }
    sql.push_str(" ORDER BY i.id");
    sql
}

/// Items complete for a stage while not complete for one of its dependencies.
pub fn dependency_violation_sql(own: &PredicateSql, dep: &PredicateSql) -> String {
    format!(
        "SELECT i.id FROM items i WHERE i.id IN ({}) AND i.id NOT IN ({}) ORDER BY i.id",
        own.complete, dep.complete
    )
}

/// Output rows that reference items missing from the catalog.
pub fn orphan_rows_sql(table: &str) -> String {
    format!("SELECT item_id FROM {table} WHERE item_id NOT IN (SELECT id FROM items) ORDER BY item_id")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{FixAction, ResourceClass};

    fn stage(predicate: CompletionPredicate) -> Stage {
        Stage::new("s", ResourceClass::CpuParallel, FixAction::new("w")).with_predicate(predicate)
    }

    #[test]
    fn test_missing_table_resolves_to_empty_set() {
        let store = Store::open_in_memory().unwrap();
        let sql = PredicateSql::resolve(&stage(CompletionPredicate::Table("ocr".into())), &store).unwrap();
        assert!(!sql.present);
        assert_eq!(sql.complete, EMPTY_SET);
    }

    #[test]
    fn test_existing_table_resolves() {
        let store = Store::open_in_memory().unwrap();
        store.ensure_output_table("ocr").unwrap();
        let sql = PredicateSql::resolve(&stage(CompletionPredicate::Table("ocr".into())), &store).unwrap();
        assert!(sql.present);
        assert!(sql.complete.contains("FROM ocr"));
        assert!(sql.failed.contains("'failed'"));
    }

    #[test]
    fn test_query_against_missing_table_is_absent() {
        let store = Store::open_in_memory().unwrap();
        let sql = PredicateSql::resolve(
            &stage(CompletionPredicate::Query("SELECT item_id FROM tiers WHERE path IS NOT NULL".into())),
            &store,
        )
        .unwrap();
        assert!(!sql.present);
    }

    #[test]
    fn test_query_with_syntax_error_is_reported() {
        let store = Store::open_in_memory().unwrap();
        let result = PredicateSql::resolve(&stage(CompletionPredicate::Query("SELECT FROM WHERE".into())), &store);
        assert!(result.is_err());
    }

    #[test]
    fn test_classify_sql_joins_dependencies() {
        let own = PredicateSql {
            complete: "A".into(),
            failed: "B".into(),
            present: true,
        };
        let dep1 = PredicateSql {
            complete: "D1".into(),
            failed: EMPTY_SET.into(),
            present: true,
        };
        let dep2 = PredicateSql {
            complete: "D2".into(),
            failed: EMPTY_SET.into(),
            present: true,
        };
        let sql = classify_sql(&own, &[&dep1, &dep2]);
        assert!(sql.contains("WHERE i.id IN (D1) AND i.id IN (D2)"));
        assert!(sql.ends_with("ORDER BY i.id"));
    }
}

//! Temporary suspension of uniqueness constraints and indexes during a load.
//!
//! Dropping constraints and indexes before a bulk transfer and restoring them
//! afterwards avoids per-row maintenance cost on large loads. The plan is
//! built entirely from the declared schema, so every mutation is enumerable
//! before anything executes. Execution is fault-tolerant per mutation: a drop
//! or restore that fails (typically because the object never existed or was
//! already gone) is logged and skipped, never fatal.

use tracing::{debug, warn};

use crate::error::Result;
use crate::identifier::quote_ident;
use crate::protocol::BulkChannel;
use crate::schema::TableSchema;

/// One reversible schema change: the statement that suspends the object and
/// the statement that restores it.
#[derive(Debug, Clone)]
pub struct SchemaMutation {
    /// Human-readable label for log lines.
    pub description: String,
    /// Statement that removes the object.
    pub drop_sql: String,
    /// Statement that recreates the object.
    pub restore_sql: String,
}

/// The full set of mutations a load would apply, split by kind so constraint
/// and index suspension can be toggled independently.
#[derive(Debug, Clone, Default)]
pub struct SuspensionPlan {
    pub constraints: Vec<SchemaMutation>,
    pub indexes: Vec<SchemaMutation>,
}

impl SuspensionPlan {
    /// Build the plan for a table from its declared schema.
    pub fn for_table(schema: &TableSchema) -> Result<Self> {
        let table = quote_ident(&schema.table)?;
        let mut constraints = Vec::new();
        let mut indexes = Vec::new();

        for constraint in &schema.unique_constraints {
            constraints.push(unique_mutation(
                &table,
                &constraint.name,
                &constraint.columns,
            )?);
        }

        for columns in &schema.unique_together {
            let name = format!("{}_{}_uniq", schema.table, columns.join("_"));
            constraints.push(unique_mutation(&table, &name, columns)?);
        }

        for column in &schema.columns {
            if column.unique {
                let name = format!("{}_{}_key", schema.table, column.name);
                constraints.push(unique_mutation(
                    &table,
                    &name,
                    std::slice::from_ref(&column.name),
                )?);
            }
            if column.indexed {
                let name = format!("{}_{}_idx", schema.table, column.name);
                indexes.push(index_mutation(
                    &table,
                    &name,
                    std::slice::from_ref(&column.name),
                    false,
                )?);
            }
        }

        for index in &schema.indexes {
            indexes.push(index_mutation(
                &table,
                &index.name,
                &index.columns,
                index.is_unique,
            )?);
        }

        Ok(Self {
            constraints,
            indexes,
        })
    }

    /// Whether the plan has nothing to do.
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty() && self.indexes.is_empty()
    }
}

fn column_list(columns: &[String]) -> Result<String> {
    Ok(columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Result<Vec<_>>>()?
        .join(", "))
}

fn unique_mutation(table: &str, name: &str, columns: &[String]) -> Result<SchemaMutation> {
    let quoted_name = quote_ident(name)?;
    Ok(SchemaMutation {
        description: format!("unique constraint {}", name),
        drop_sql: format!("ALTER TABLE {} DROP CONSTRAINT {}", table, quoted_name),
        restore_sql: format!(
            "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})",
            table,
            quoted_name,
            column_list(columns)?
        ),
    })
}

fn index_mutation(
    table: &str,
    name: &str,
    columns: &[String],
    is_unique: bool,
) -> Result<SchemaMutation> {
    let quoted_name = quote_ident(name)?;
    let unique = if is_unique { "UNIQUE " } else { "" };
    Ok(SchemaMutation {
        description: format!("index {}", name),
        drop_sql: format!("DROP INDEX IF EXISTS {}", quoted_name),
        restore_sql: format!(
            "CREATE {}INDEX {} ON {} ({})",
            unique,
            quoted_name,
            table,
            column_list(columns)?
        ),
    })
}

/// Executes a [`SuspensionPlan`], one mutation at a time.
pub struct SuspensionManager {
    plan: SuspensionPlan,
}

impl SuspensionManager {
    pub fn new(plan: SuspensionPlan) -> Self {
        Self { plan }
    }

    pub async fn drop_constraints(&self, channel: &dyn BulkChannel) -> Result<()> {
        for mutation in &self.plan.constraints {
            apply(channel, &mutation.description, &mutation.drop_sql, "drop").await;
        }
        Ok(())
    }

    pub async fn drop_indexes(&self, channel: &dyn BulkChannel) -> Result<()> {
        for mutation in &self.plan.indexes {
            apply(channel, &mutation.description, &mutation.drop_sql, "drop").await;
        }
        Ok(())
    }

    pub async fn restore_constraints(&self, channel: &dyn BulkChannel) -> Result<()> {
        for mutation in &self.plan.constraints {
            apply(
                channel,
                &mutation.description,
                &mutation.restore_sql,
                "restore",
            )
            .await;
        }
        Ok(())
    }

    pub async fn restore_indexes(&self, channel: &dyn BulkChannel) -> Result<()> {
        for mutation in &self.plan.indexes {
            apply(
                channel,
                &mutation.description,
                &mutation.restore_sql,
                "restore",
            )
            .await;
        }
        Ok(())
    }
}

async fn apply(channel: &dyn BulkChannel, description: &str, sql: &str, verb: &str) {
    debug!("Attempting to {} {}", verb, description);
    if let Err(e) = channel.execute(sql).await {
        warn!("Could not {} {}: {}", verb, description, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::mock::MockChannel;
    use crate::schema::{ColumnMeta, IndexMeta, TableSchema, UniqueConstraint};

    fn schema() -> TableSchema {
        let mut name = ColumnMeta::new("name", "text");
        name.unique = true;
        let mut number = ColumnMeta::new("number", "integer");
        number.indexed = true;
        let mut schema = TableSchema::new(
            "people",
            vec![ColumnMeta::new("id", "serial"), name, number],
        );
        schema.unique_constraints.push(UniqueConstraint {
            name: "people_name_number_key".to_string(),
            columns: vec!["name".to_string(), "number".to_string()],
        });
        schema
            .unique_together
            .push(vec!["name".to_string(), "number".to_string()]);
        schema.indexes.push(IndexMeta {
            name: "people_number_sorted_idx".to_string(),
            columns: vec!["number".to_string()],
            is_unique: true,
        });
        schema
    }

    #[test]
    fn test_plan_enumerates_declared_objects() {
        let plan = SuspensionPlan::for_table(&schema()).unwrap();
        // Named constraint + unique_together + per-column unique.
        assert_eq!(plan.constraints.len(), 3);
        // Declared index + per-column indexed.
        assert_eq!(plan.indexes.len(), 2);
    }

    #[test]
    fn test_unique_together_derived_name() {
        let plan = SuspensionPlan::for_table(&schema()).unwrap();
        let derived = plan
            .constraints
            .iter()
            .find(|m| m.description.contains("people_name_number_uniq"))
            .unwrap();
        assert_eq!(
            derived.drop_sql,
            "ALTER TABLE \"people\" DROP CONSTRAINT \"people_name_number_uniq\""
        );
        assert_eq!(
            derived.restore_sql,
            "ALTER TABLE \"people\" ADD CONSTRAINT \"people_name_number_uniq\" \
             UNIQUE (\"name\", \"number\")"
        );
    }

    #[test]
    fn test_index_mutation_statements() {
        let plan = SuspensionPlan::for_table(&schema()).unwrap();
        let idx = plan
            .indexes
            .iter()
            .find(|m| m.description.contains("people_number_sorted_idx"))
            .unwrap();
        assert_eq!(idx.drop_sql, "DROP INDEX IF EXISTS \"people_number_sorted_idx\"");
        assert_eq!(
            idx.restore_sql,
            "CREATE UNIQUE INDEX \"people_number_sorted_idx\" ON \"people\" (\"number\")"
        );
    }

    #[test]
    fn test_empty_plan() {
        let schema = TableSchema::new("bare", vec![ColumnMeta::new("a", "text")]);
        let plan = SuspensionPlan::for_table(&schema).unwrap();
        assert!(plan.is_empty());
    }

    #[tokio::test]
    async fn test_drop_and_restore_run_every_mutation() {
        let channel = MockChannel::new();
        let manager = SuspensionManager::new(SuspensionPlan::for_table(&schema()).unwrap());
        manager.drop_constraints(&channel).await.unwrap();
        manager.drop_indexes(&channel).await.unwrap();
        manager.restore_constraints(&channel).await.unwrap();
        manager.restore_indexes(&channel).await.unwrap();
        // 3 constraints + 2 indexes, dropped then restored.
        assert_eq!(channel.statements().len(), 10);
    }

    #[tokio::test]
    async fn test_failed_mutation_is_skipped() {
        let mut channel = MockChannel::new();
        channel.fail_matching = Some("DROP CONSTRAINT".to_string());
        let manager = SuspensionManager::new(SuspensionPlan::for_table(&schema()).unwrap());
        // Failures are logged and skipped, not returned.
        manager.drop_constraints(&channel).await.unwrap();
        manager.drop_indexes(&channel).await.unwrap();
        assert_eq!(channel.statements().len(), 5);
    }
}

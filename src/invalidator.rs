use crate::data::model::TableSchema;
use crate::error::Result;
use crate::state::{Scope, ScopedKey, ScopedStore};

fn table_name_key() -> ScopedKey {
    Scope::Global.key("feature_table_name")
}

fn table_schema_key() -> ScopedKey {
    Scope::Global.key("feature_table_schema")
}

/// Result of comparing the active table against the one seen last rerun.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaCheck {
    FirstSeen,
    Unchanged,
    /// A different table was selected; filter state was dropped.
    TableChanged { previous: String },
    /// Same table, different columns or types; filter state was dropped.
    SchemaChanged,
}

impl SchemaCheck {
    pub fn invalidated(&self) -> bool {
        matches!(self, SchemaCheck::TableChanged { .. } | SchemaCheck::SchemaChanged)
    }

    /// Message for the host to show, if any.
    pub fn notice(&self) -> Option<String> {
        match self {
            SchemaCheck::TableChanged { previous } => Some(format!(
                "Feature table changed from '{previous}', filters were reset"
            )),
            SchemaCheck::SchemaChanged => {
                Some("Feature table columns changed, filters were reset".to_string())
            }
            _ => None,
        }
    }
}

/// Drop the `filters` scope whenever the active table identity or its schema
/// differs from the last recorded one. Compares schemas only, never data.
pub fn check_table(store: &mut ScopedStore, table_name: &str, schema: &TableSchema) -> Result<SchemaCheck> {
    let previous_name: Option<String> = store.get(&table_name_key(), None);
    let previous_schema: Option<TableSchema> = store.get(&table_schema_key(), None);

    let check = match (previous_name, previous_schema) {
        (None, _) => SchemaCheck::FirstSeen,
        (Some(prev), _) if prev != table_name => SchemaCheck::TableChanged { previous: prev },
        (Some(_), Some(prev)) if &prev == schema => SchemaCheck::Unchanged,
        (Some(_), _) => SchemaCheck::SchemaChanged,
    };

    if check.invalidated() {
        let removed = store.clear_scope(Scope::Filters);
        log::warn!("Feature table '{table_name}' changed ({check:?}); cleared {removed} filter key(s)");
    }
    if check != SchemaCheck::Unchanged {
        store.set(&table_name_key(), &table_name)?;
        store.set(&table_schema_key(), schema)?;
    }
    Ok(check)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::ColumnSchema;

    fn schema(cols: &[(&str, &str)]) -> TableSchema {
        TableSchema {
            columns: cols
                .iter()
                .map(|(n, t)| ColumnSchema {
                    name: n.to_string(),
                    data_type: t.to_string(),
                    nullable: true,
                })
                .collect(),
        }
    }

    fn seeded() -> ScopedStore {
        let mut store = ScopedStore::new();
        store.set(&Scope::Setup.key("urls"), &vec!["/data/plate1"]).unwrap();
        store.set(&Scope::Filters.key("pipeline"), &"stale").unwrap();
        store
    }

    #[test]
    fn first_table_is_only_recorded() {
        let mut store = seeded();
        let s = schema(&[("area", "Float64")]);
        assert_eq!(check_table(&mut store, "cells", &s).unwrap(), SchemaCheck::FirstSeen);
        assert!(store.contains(&Scope::Filters.key("pipeline")));
        assert_eq!(check_table(&mut store, "cells", &s).unwrap(), SchemaCheck::Unchanged);
        assert!(store.contains(&Scope::Filters.key("pipeline")));
    }

    #[test]
    fn switching_tables_clears_filters_only() {
        let mut store = seeded();
        let s = schema(&[("area", "Float64")]);
        check_table(&mut store, "cells", &s).unwrap();

        let check = check_table(&mut store, "nuclei", &s).unwrap();
        assert_eq!(
            check,
            SchemaCheck::TableChanged {
                previous: "cells".into()
            }
        );
        assert!(check.notice().is_some());
        assert_eq!(store.scope_len(Scope::Filters), 0);
        assert!(store.contains(&Scope::Setup.key("urls")));
    }

    #[test]
    fn schema_change_on_same_table_clears_filters() {
        let mut store = seeded();
        check_table(&mut store, "cells", &schema(&[("area", "Float64")])).unwrap();
        let changed = schema(&[("area", "Float64"), ("perimeter", "Float64")]);
        assert_eq!(
            check_table(&mut store, "cells", &changed).unwrap(),
            SchemaCheck::SchemaChanged
        );
        assert!(!store.contains(&Scope::Filters.key("pipeline")));
        assert_eq!(check_table(&mut store, "cells", &changed).unwrap(), SchemaCheck::Unchanged);
    }
}

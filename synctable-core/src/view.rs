//! Named table views: a title plus a canonical query.

use crate::error::{SchemaError, SyncResult};
use crate::query::{QueryDescriptor, QueryInput};
use crate::schema::SchemaProvider;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct TableView {
    pub name: String,
    pub title: String,
    pub query: QueryDescriptor,
}

/// Registry of views, populated explicitly at startup.
#[derive(Debug, Clone, Default)]
pub struct ViewRegistry {
    views: BTreeMap<String, TableView>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize `query` and register it under `name`.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        title: impl Into<String>,
        query: impl Into<QueryInput>,
        schemas: &dyn SchemaProvider,
    ) -> SyncResult<&TableView> {
        let name = name.into();
        if self.views.contains_key(&name) {
            return Err(SchemaError::DuplicateView { name }.into());
        }
        let query = QueryDescriptor::normalize(query, schemas)?;
        let view = TableView {
            name: name.clone(),
            title: title.into(),
            query,
        };
        Ok(self.views.entry(name).or_insert(view))
    }

    pub fn get(&self, name: &str) -> Option<&TableView> {
        self.views.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TableView> {
        self.views.values()
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::schema::{FieldType, SchemaRegistry, TableSchema};
    use serde_json::json;

    fn schemas() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        registry
            .register(
                TableSchema::builder("crm_accounts")
                    .field("account_id", FieldType::Uuid)
                    .field("first_name", FieldType::Text)
                    .field("last_name", FieldType::Text)
                    .field("email_address", FieldType::Text)
                    .primary_key(["account_id"])
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_register_and_lookup() {
        let schemas = schemas();
        let mut views = ViewRegistry::new();
        views
            .register(
                "accounts",
                "Accounts",
                json!({"crm_accounts": [{"account_id": null, "first_name": null}]}),
                &schemas,
            )
            .unwrap();

        let view = views.get("accounts").unwrap();
        assert_eq!(view.title, "Accounts");
        assert_eq!(view.query.table(), "crm_accounts");
        assert_eq!(view.query.fetch_fields().len(), 2);
    }

    #[test]
    fn test_duplicate_view_rejected() {
        let schemas = schemas();
        let mut views = ViewRegistry::new();
        views
            .register("accounts", "Accounts", "crm_accounts", &schemas)
            .unwrap();
        let err = views
            .register("accounts", "Again", "crm_accounts", &schemas)
            .unwrap_err();
        assert!(matches!(err, SyncError::Schema(SchemaError::DuplicateView { .. })));
        assert_eq!(views.len(), 1);
    }

    #[test]
    fn test_invalid_query_rejected() {
        let schemas = schemas();
        let mut views = ViewRegistry::new();
        let err = views
            .register("bad", "Bad", "crm_nothing", &schemas)
            .unwrap_err();
        assert!(matches!(err, SyncError::Query(_)));
        assert!(views.is_empty());
    }
}

use crate::error::{Result, TenancyError};
use crate::registry::TenantRegistry;
use crate::schema::Schema;
use serde::{Deserialize, Serialize};

/// Which schemas an operation should touch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "schemas", rename_all = "snake_case")]
pub enum Selector {
    /// Every known schema.
    All,
    /// Public, static tenants and the clone reference.
    Static,
    /// Tenants loaded from the tenant table.
    Dynamic,
    /// The shared schema only.
    Shared,
    /// Explicit names, processed in the given order.
    Named(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSelection {
    pub selector: Selector,
    #[serde(default)]
    pub excluded: Vec<String>,
}

impl SchemaSelection {
    pub fn new(selector: Selector) -> Self {
        Self {
            selector,
            excluded: Vec::new(),
        }
    }

    pub fn named<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Selector::Named(names.into_iter().map(Into::into).collect()))
    }

    pub fn excluding<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded.extend(names.into_iter().map(Into::into));
        self
    }

    /// Resolve against `registry`. Any unknown name fails the whole
    /// resolution, so nothing runs on a partially valid selection.
    pub fn resolve(&self, registry: &TenantRegistry) -> Result<MigrationTargetSet> {
        let mut missing: Vec<String> = Vec::new();
        let mut note_missing = |name: &str| {
            if !missing.iter().any(|m| m == name) {
                missing.push(name.to_string());
            }
        };

        let selected: Vec<Schema> = match &self.selector {
            Selector::All => registry.all(),
            Selector::Static => std::iter::once(registry.public())
                .chain(registry.static_schemas().iter().cloned())
                .chain(registry.clone_reference().cloned())
                .collect(),
            Selector::Dynamic => registry.dynamic_schemas().to_vec(),
            Selector::Shared => vec![registry.public()],
            Selector::Named(names) => names
                .iter()
                .map(|name| name.trim())
                .filter_map(|name| {
                    let found = registry.lookup(name);
                    if found.is_none() {
                        note_missing(name);
                    }
                    found
                })
                .collect(),
        };

        for name in &self.excluded {
            if registry.lookup(name.trim()).is_none() {
                note_missing(name.trim());
            }
        }

        if !missing.is_empty() {
            return Err(TenancyError::resolution(missing));
        }

        let targets = MigrationTargetSet::new(
            selected
                .into_iter()
                .filter(|schema| !self.excluded.iter().any(|x| x.trim() == schema.schema_name()))
                .collect(),
        );

        if targets.is_empty() {
            return Err(TenancyError::Resolution {
                message: "selection matched no schemas".to_string(),
                missing: Vec::new(),
            });
        }

        Ok(targets)
    }
}

/// Ordered, duplicate-free list of schemas to operate on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MigrationTargetSet {
    schemas: Vec<Schema>,
}

impl MigrationTargetSet {
    /// Keeps the first occurrence of each schema name.
    pub fn new(schemas: Vec<Schema>) -> Self {
        let mut unique: Vec<Schema> = Vec::with_capacity(schemas.len());
        for schema in schemas {
            if !unique.contains(&schema) {
                unique.push(schema);
            }
        }
        Self { schemas: unique }
    }

    pub fn single(schema: Schema) -> Self {
        Self {
            schemas: vec![schema],
        }
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Schema> {
        self.schemas.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.schemas.iter().map(Schema::schema_name).collect()
    }
}

impl IntoIterator for MigrationTargetSet {
    type Item = Schema;
    type IntoIter = std::vec::IntoIter<Schema>;

    fn into_iter(self) -> Self::IntoIter {
        self.schemas.into_iter()
    }
}

impl<'a> IntoIterator for &'a MigrationTargetSet {
    type Item = &'a Schema;
    type IntoIter = std::slice::Iter<'a, Schema>;

    fn into_iter(self) -> Self::IntoIter {
        self.schemas.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TenantsConfig;

    fn registry() -> TenantRegistry {
        let config = TenantsConfig::from_json(
            r#"{
                "public": {},
                "default": { "clone_reference": "sample" },
                "tenants": { "www": { "domains": ["localhost"] }, "blog": {} }
            }"#,
        )
        .unwrap();
        TenantRegistry::from_config(config)
            .unwrap()
            .with_dynamic(
                vec![
                    Schema::dynamic("tenant2", None, None).unwrap(),
                    Schema::dynamic("tenant1", None, None).unwrap(),
                ],
                vec![],
            )
            .unwrap()
    }

    fn resolve(selection: SchemaSelection) -> Vec<String> {
        selection
            .resolve(&registry())
            .unwrap()
            .names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_all() {
        assert_eq!(
            resolve(SchemaSelection::new(Selector::All)),
            vec!["public", "blog", "www", "sample", "tenant1", "tenant2"]
        );
    }

    #[test]
    fn test_static_dynamic_shared() {
        assert_eq!(
            resolve(SchemaSelection::new(Selector::Static)),
            vec!["public", "blog", "www", "sample"]
        );
        assert_eq!(
            resolve(SchemaSelection::new(Selector::Dynamic)),
            vec!["tenant1", "tenant2"]
        );
        assert_eq!(resolve(SchemaSelection::new(Selector::Shared)), vec!["public"]);
    }

    #[test]
    fn test_named_keeps_order_and_drops_duplicates() {
        assert_eq!(
            resolve(SchemaSelection::named(["tenant2", "www", "tenant2", "public"])),
            vec!["tenant2", "www", "public"]
        );
    }

    #[test]
    fn test_excluded() {
        assert_eq!(
            resolve(SchemaSelection::new(Selector::All).excluding(["public", "sample"])),
            vec!["blog", "www", "tenant1", "tenant2"]
        );
    }

    #[test]
    fn test_unknown_name_fails() {
        let err = SchemaSelection::named(["www", "ghost", "ghost"])
            .resolve(&registry())
            .unwrap_err();
        match err {
            TenancyError::Resolution { missing, .. } => assert_eq!(missing, vec!["ghost"]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_exclusion_fails() {
        let err = SchemaSelection::new(Selector::All)
            .excluding(["phantom"])
            .resolve(&registry())
            .unwrap_err();
        assert!(matches!(err, TenancyError::Resolution { .. }));
    }

    #[test]
    fn test_empty_selection_fails() {
        assert!(SchemaSelection::new(Selector::Shared)
            .excluding(["public"])
            .resolve(&registry())
            .is_err());
        assert!(SchemaSelection::named(Vec::<String>::new())
            .resolve(&registry())
            .is_err());
    }

    #[test]
    fn test_selection_json() {
        let selection: SchemaSelection = serde_json::from_str(
            r#"{ "selector": { "kind": "named", "schemas": ["www"] }, "excluded": [] }"#,
        )
        .unwrap();
        assert_eq!(selection, SchemaSelection::named(["www"]));

        let all: SchemaSelection =
            serde_json::from_str(r#"{ "selector": { "kind": "all" } }"#).unwrap();
        assert_eq!(all.selector, Selector::All);
    }
}

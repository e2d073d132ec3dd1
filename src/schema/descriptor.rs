use crate::error::{Result, TenancyError};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

/// Name of the shared schema every database starts with.
pub const PUBLIC_SCHEMA: &str = "public";

/// PostgreSQL identifier limit (NAMEDATALEN - 1).
const MAX_SCHEMA_NAME_LEN: usize = 63;

/// Identifies one tenant namespace.
///
/// Identity is the schema name alone: two descriptors built separately for
/// the same name denote the same tenant, whatever their routing details.
#[derive(Debug, Clone, Serialize)]
pub struct Schema {
    schema_name: String,
    domain_url: Option<String>,
    folder: Option<String>,
    is_dynamic: bool,
}

impl Schema {
    /// Build a statically declared tenant descriptor.
    pub fn create(
        schema_name: &str,
        domain_url: Option<&str>,
        folder: Option<&str>,
    ) -> Result<Self> {
        let schema_name = schema_name.trim();
        if schema_name.is_empty() {
            return Err(TenancyError::InvalidSchemaName {
                name: schema_name.to_string(),
                reason: "schema name must not be empty".to_string(),
            });
        }

        Ok(Self {
            schema_name: schema_name.to_string(),
            domain_url: normalize(domain_url),
            folder: normalize(folder),
            is_dynamic: false,
        })
    }

    /// Build a descriptor for a tenant provisioned at runtime (tenant table row).
    pub fn dynamic(
        schema_name: &str,
        domain_url: Option<&str>,
        folder: Option<&str>,
    ) -> Result<Self> {
        let mut schema = Self::create(schema_name, domain_url, folder)?;
        schema.is_dynamic = true;
        Ok(schema)
    }

    /// The shared schema.
    pub fn public() -> Self {
        Self {
            schema_name: PUBLIC_SCHEMA.to_string(),
            domain_url: None,
            folder: None,
            is_dynamic: false,
        }
    }

    /// Same tenant, routed through a specific domain/folder.
    pub fn with_routing(&self, domain_url: Option<&str>, folder: Option<&str>) -> Self {
        Self {
            schema_name: self.schema_name.clone(),
            domain_url: normalize(domain_url),
            folder: normalize(folder),
            is_dynamic: self.is_dynamic,
        }
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    pub fn domain_url(&self) -> Option<&str> {
        self.domain_url.as_deref()
    }

    pub fn folder(&self) -> Option<&str> {
        self.folder.as_deref()
    }

    pub fn is_dynamic(&self) -> bool {
        self.is_dynamic
    }

    pub fn is_public(&self) -> bool {
        self.schema_name == PUBLIC_SCHEMA
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.schema_name == other.schema_name
    }
}

impl Eq for Schema {}

impl Hash for Schema {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.schema_name.hash(state);
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.schema_name)
    }
}

fn normalize(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn schema_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[_a-zA-Z][_a-zA-Z0-9]*$").expect("schema name pattern is valid")
    })
}

/// Whether `name` can be used as a tenant schema name.
pub fn is_valid_schema_name(name: &str) -> bool {
    check_schema_name(name).is_ok()
}

/// Validate `name` against PostgreSQL identifier rules.
pub fn check_schema_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(TenancyError::InvalidSchemaName {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };

    if name.is_empty() || name.len() > MAX_SCHEMA_NAME_LEN {
        return invalid("must be between 1 and 63 characters");
    }
    if name.to_ascii_lowercase().starts_with("pg_") {
        return invalid("the 'pg_' prefix is reserved");
    }
    if !schema_name_pattern().is_match(name) {
        return invalid("must start with a letter or underscore and contain only letters, digits and underscores");
    }

    Ok(())
}

/// Quote a validated schema name for use in DDL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

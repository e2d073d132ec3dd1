use serde::{Deserialize, Serialize};
use std::fmt;

/// A row of the domain table: routes `domain[/folder]` to a dynamic tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRecord {
    pub tenant: String,
    pub domain: String,
    /// Empty when the tenant owns the whole domain.
    #[serde(default)]
    pub folder: String,
    #[serde(default = "default_true")]
    pub is_primary: bool,
    #[serde(default)]
    pub redirect_to_primary: bool,
}

fn default_true() -> bool {
    true
}

impl DomainRecord {
    pub fn new(tenant: &str, domain: &str, folder: &str) -> Self {
        Self {
            tenant: tenant.to_string(),
            domain: domain.to_string(),
            folder: folder.to_string(),
            is_primary: true,
            redirect_to_primary: false,
        }
    }

    /// Scheme-relative URL for `path` on this domain/folder.
    pub fn absolute_url(&self, path: &str) -> String {
        let folder = if self.folder.is_empty() {
            String::new()
        } else {
            format!("/{}", self.folder)
        };
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        format!("//{}{}{}", self.domain, folder, path)
    }
}

impl fmt::Display for DomainRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.folder.is_empty() {
            write!(f, "{}", self.domain)
        } else {
            write!(f, "{}/{}", self.domain, self.folder)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_url() {
        let plain = DomainRecord::new("tenant1", "tenant1.localhost", "");
        assert_eq!(plain.absolute_url("/some/path"), "//tenant1.localhost/some/path");
        assert_eq!(plain.absolute_url("some/path"), "//tenant1.localhost/some/path");

        let folder = DomainRecord::new("tenant1", "everyone.localhost", "tenant1");
        assert_eq!(
            folder.absolute_url("/some/path"),
            "//everyone.localhost/tenant1/some/path"
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(DomainRecord::new("t", "a.localhost", "").to_string(), "a.localhost");
        assert_eq!(DomainRecord::new("t", "a.localhost", "t1").to_string(), "a.localhost/t1");
    }
}

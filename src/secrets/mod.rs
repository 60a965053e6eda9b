//! Secret bundle resolution.
//!
//! The connectivity manager holds no credentials of its own: each tunnel
//! build asks a [`SecretSource`] for named bundles (database credentials,
//! bastion credentials) and the values live only in memory for the lifetime
//! of that tunnel generation.

mod env;
mod http;
mod statics;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;

pub use env::EnvSource;
pub use http::HttpSource;
pub use statics::StaticSource;

use crate::error::SecretError;

/// An immutable named map of secret fields.
#[derive(Clone)]
pub struct SecretBundle {
    name: String,
    values: HashMap<String, String>,
}

impl SecretBundle {
    pub fn new(name: impl Into<String>, values: HashMap<String, String>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.values.get(field).map(String::as_str)
    }

    /// Fetch a field, failing loudly when it is absent.
    pub fn require(&self, field: &str) -> Result<&str, SecretError> {
        self.get(field).ok_or_else(|| SecretError::MissingField {
            bundle: self.name.clone(),
            field: field.to_string(),
        })
    }

    /// Fetch a field and parse it as a port number.
    pub fn require_port(&self, field: &str) -> Result<u16, SecretError> {
        let raw = self.require(field)?;
        raw.parse().map_err(|_| SecretError::Malformed {
            bundle: self.name.clone(),
            message: format!("field '{field}' is not a valid port: '{raw}'"),
        })
    }
}

// Values never appear in logs or panic payloads.
impl fmt::Debug for SecretBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields: Vec<&str> = self.values.keys().map(String::as_str).collect();
        fields.sort_unstable();
        f.debug_struct("SecretBundle")
            .field("name", &self.name)
            .field("fields", &fields)
            .finish()
    }
}

/// Capability to resolve named secret bundles.
#[async_trait]
pub trait SecretSource: Send + Sync {
    async fn get_bundle(&self, name: &str) -> Result<SecretBundle, SecretError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle() -> SecretBundle {
        let mut values = HashMap::new();
        values.insert("host".to_string(), "db.internal".to_string());
        values.insert("port".to_string(), "3306".to_string());
        values.insert("password".to_string(), "hunter2".to_string());
        SecretBundle::new("database", values)
    }

    #[test]
    fn require_returns_present_fields() {
        assert_eq!(bundle().require("host").unwrap(), "db.internal");
    }

    #[test]
    fn require_names_the_missing_field() {
        let err = bundle().require("username").unwrap_err();
        match err {
            SecretError::MissingField { bundle, field } => {
                assert_eq!(bundle, "database");
                assert_eq!(field, "username");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn require_port_parses() {
        assert_eq!(bundle().require_port("port").unwrap(), 3306);
        assert!(matches!(
            bundle().require_port("host"),
            Err(SecretError::Malformed { .. })
        ));
    }

    #[test]
    fn debug_output_redacts_values() {
        let rendered = format!("{:?}", bundle());
        assert!(rendered.contains("password"));
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("db.internal"));
    }
}

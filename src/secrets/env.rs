//! Environment-variable secret backend.

use std::collections::HashMap;

use async_trait::async_trait;

use super::{SecretBundle, SecretSource};
use crate::error::SecretError;

/// Assembles bundles from `{PREFIX}_{BUNDLE}_{FIELD}` environment variables.
///
/// `EnvSource::new("BASTIONDB")` resolves the `database` bundle from
/// `BASTIONDB_DATABASE_HOST`, `BASTIONDB_DATABASE_PORT`, and so on; field
/// names are lowercased.
pub struct EnvSource {
    prefix: String,
}

impl EnvSource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl SecretSource for EnvSource {
    async fn get_bundle(&self, name: &str) -> Result<SecretBundle, SecretError> {
        let var_prefix = format!("{}_{}_", self.prefix, name.to_uppercase());

        let mut values = HashMap::new();
        for (key, value) in std::env::vars() {
            if let Some(field) = key.strip_prefix(&var_prefix) {
                values.insert(field.to_lowercase(), value);
            }
        }

        if values.is_empty() {
            return Err(SecretError::BundleNotFound(name.to_string()));
        }

        Ok(SecretBundle::new(name, values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_prefixed_vars_into_a_bundle() {
        // set_var is unsafe in edition 2024; tests use a prefix unique to
        // this test to avoid cross-test interference.
        unsafe {
            std::env::set_var("ENVSRC_T1_DATABASE_HOST", "db.internal");
            std::env::set_var("ENVSRC_T1_DATABASE_PORT", "3306");
        }

        let source = EnvSource::new("ENVSRC_T1");
        let bundle = smol::block_on(source.get_bundle("database")).unwrap();
        assert_eq!(bundle.get("host"), Some("db.internal"));
        assert_eq!(bundle.require_port("port").unwrap(), 3306);

        unsafe {
            std::env::remove_var("ENVSRC_T1_DATABASE_HOST");
            std::env::remove_var("ENVSRC_T1_DATABASE_PORT");
        }
    }

    #[test]
    fn unknown_bundle_is_not_found() {
        let source = EnvSource::new("ENVSRC_T2");
        let err = smol::block_on(source.get_bundle("bastion")).unwrap_err();
        assert!(matches!(err, SecretError::BundleNotFound(name) if name == "bastion"));
    }
}

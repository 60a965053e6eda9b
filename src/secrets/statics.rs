//! In-memory secret source for tests and local wiring.

use std::collections::HashMap;

use async_trait::async_trait;

use super::{SecretBundle, SecretSource};
use crate::error::SecretError;

/// Fixed bundles handed out as-is. Not for production use.
#[derive(Default)]
pub struct StaticSource {
    bundles: HashMap<String, HashMap<String, String>>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bundle<I, K, V>(mut self, name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let fields = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.bundles.insert(name.into(), fields);
        self
    }
}

#[async_trait]
impl SecretSource for StaticSource {
    async fn get_bundle(&self, name: &str) -> Result<SecretBundle, SecretError> {
        self.bundles
            .get(name)
            .map(|values| SecretBundle::new(name, values.clone()))
            .ok_or_else(|| SecretError::BundleNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_registered_bundles() {
        let source = StaticSource::new()
            .with_bundle("database", [("host", "db.internal"), ("port", "3306")]);

        let bundle = smol::block_on(source.get_bundle("database")).unwrap();
        assert_eq!(bundle.get("host"), Some("db.internal"));

        assert!(matches!(
            smol::block_on(source.get_bundle("bastion")),
            Err(SecretError::BundleNotFound(_))
        ));
    }
}

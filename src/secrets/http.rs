//! HTTP key/value secret store backend.
//!
//! Speaks the simplest possible protocol: `GET {base_url}/{bundle}` returns
//! a flat JSON object of string fields. The blocking `smolhttp` client runs
//! on the blocking-task pool via `smol::unblock`.

use std::collections::HashMap;

use async_trait::async_trait;

use super::{SecretBundle, SecretSource};
use crate::error::SecretError;

pub struct HttpSource {
    base_url: String,
}

impl HttpSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SecretSource for HttpSource {
    async fn get_bundle(&self, name: &str) -> Result<SecretBundle, SecretError> {
        let url = format!("{}/{}", self.base_url, name);
        let bundle_name = name.to_string();

        smol::unblock(move || {
            let response = smolhttp::Client::new(&url)
                .map_err(|e| SecretError::Store(format!("bad secret store url: {e}")))?
                .get()
                .headers(vec![(
                    "Accept".to_string(),
                    "application/json".to_string(),
                )])
                .send()
                .map_err(|e| SecretError::Store(e.to_string()))?;

            parse_bundle(&bundle_name, &response.text())
        })
        .await
    }
}

fn parse_bundle(name: &str, body: &str) -> Result<SecretBundle, SecretError> {
    if body.trim().is_empty() {
        return Err(SecretError::BundleNotFound(name.to_string()));
    }

    let values: HashMap<String, String> =
        serde_json::from_str(body).map_err(|e| SecretError::Malformed {
            bundle: name.to_string(),
            message: e.to_string(),
        })?;

    if values.is_empty() {
        return Err(SecretError::BundleNotFound(name.to_string()));
    }

    Ok(SecretBundle::new(name, values))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flat_json_object() {
        let bundle = parse_bundle(
            "database",
            r#"{"host": "db.internal", "port": "3306", "username": "svc"}"#,
        )
        .unwrap();
        assert_eq!(bundle.get("host"), Some("db.internal"));
        assert_eq!(bundle.get("username"), Some("svc"));
    }

    #[test]
    fn empty_body_means_not_found() {
        assert!(matches!(
            parse_bundle("database", ""),
            Err(SecretError::BundleNotFound(_))
        ));
        assert!(matches!(
            parse_bundle("database", "{}"),
            Err(SecretError::BundleNotFound(_))
        ));
    }

    #[test]
    fn non_json_body_is_malformed() {
        assert!(matches!(
            parse_bundle("database", "<html>502</html>"),
            Err(SecretError::Malformed { .. })
        ));
    }

    #[test]
    fn trailing_slash_is_normalized() {
        let source = HttpSource::new("http://secrets.internal:8200/v1/");
        assert_eq!(source.base_url, "http://secrets.internal:8200/v1");
    }
}

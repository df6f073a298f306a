//! AWS Secrets Manager integration.

use aws_sdk_secretsmanager::Client as SecretsClient;
use std::collections::HashMap;
use std::sync::OnceLock;
use tokio::sync::RwLock;

use crate::{Error, Result};

/// Cached secrets with lazy initialization.
static SECRETS_CACHE: OnceLock<RwLock<HashMap<String, String>>> = OnceLock::new();

fn get_cache() -> &'static RwLock<HashMap<String, String>> {
    SECRETS_CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Get a secret value from Secrets Manager with caching.
pub async fn get_secret(client: &SecretsClient, secret_arn: &str) -> Result<String> {
    {
        let cache = get_cache().read().await;
        if let Some(value) = cache.get(secret_arn) {
            return Ok(value.clone());
        }
    }

    let response = client
        .get_secret_value()
        .secret_id(secret_arn)
        .send()
        .await
        .map_err(|e| Error::Aws(format!("Failed to get secret: {}", e)))?;

    let secret_string = response
        .secret_string()
        .ok_or_else(|| Error::Aws("Secret has no string value".to_string()))?
        .to_string();

    {
        let mut cache = get_cache().write().await;
        cache.insert(secret_arn.to_string(), secret_string.clone());
    }

    Ok(secret_string)
}

/// Pull the token out of a secret string.
///
/// Accepts either the raw token or a JSON object with a `token` field.
pub fn token_from_secret(secret: &str) -> Result<String> {
    let secret = secret.trim();
    let token = match serde_json::from_str::<serde_json::Value>(secret) {
        Ok(serde_json::Value::Object(fields)) => fields
            .get("token")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| Error::Config("Secret JSON has no token field".to_string()))?,
        _ => secret.to_string(),
    };

    if token.is_empty() {
        return Err(Error::Config("Warehouse token secret is empty".to_string()));
    }
    Ok(token)
}

/// Get the warehouse token stored in Secrets Manager.
pub async fn get_warehouse_token(client: &SecretsClient, secret_arn: &str) -> Result<String> {
    let secret = get_secret(client, secret_arn).await?;
    token_from_secret(&secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_from_json_secret() {
        let token = token_from_secret(r#"{"token":"dapi123","host":"adb.example.net"}"#).unwrap();
        assert_eq!(token, "dapi123");
    }

    #[test]
    fn test_token_from_raw_secret() {
        assert_eq!(token_from_secret("  dapi456\n").unwrap(), "dapi456");
    }

    #[test]
    fn test_token_secret_errors() {
        assert!(token_from_secret(r#"{"password":"x"}"#).is_err());
        assert!(token_from_secret("   ").is_err());
    }
}

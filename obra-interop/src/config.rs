//! Per-tenant configuration resolution for obra-interop
//!
//! Regulator credentials resolve with Database → ENV → TOML priority, at
//! trigger time. Nothing here runs at startup, so a tenant without credentials
//! only fails the request that needs them.

use obra_common::config::{RegulatorConfig, TomlConfig};
use obra_common::db::get_setting;
use obra_common::{Error, Result};
use sqlx::{Pool, Sqlite};
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::RegulatorCredentials;
use crate::services::BatchPolicy;

/// Environment fallback for the Regulator username
pub const ENV_REGULATOR_USERNAME: &str = "OBRA_REGULATOR_USERNAME";

/// Environment fallback for the Regulator token
pub const ENV_REGULATOR_TOKEN: &str = "OBRA_REGULATOR_TOKEN";

/// Settings key holding a tenant's Regulator token
pub fn token_setting_key(tenant_id: &str) -> String {
    format!("regulator_token:{}", tenant_id)
}

/// Settings key holding a tenant's Regulator username
pub fn username_setting_key(tenant_id: &str) -> String {
    format!("regulator_username:{}", tenant_id)
}

/// Resolve credentials for one tenant
pub async fn resolve_credentials(
    db: &Pool<Sqlite>,
    toml_config: &TomlConfig,
    tenant_id: &str,
) -> Result<RegulatorCredentials> {
    let token = resolve_tier(
        "token",
        get_setting::<String>(db, &token_setting_key(tenant_id)).await?,
        std::env::var(ENV_REGULATOR_TOKEN).ok(),
        toml_config.regulator.token.clone(),
    );
    let username = resolve_tier(
        "username",
        get_setting::<String>(db, &username_setting_key(tenant_id)).await?,
        std::env::var(ENV_REGULATOR_USERNAME).ok(),
        toml_config.regulator.username.clone(),
    );

    match (username, token) {
        (Some(username), Some(token)) => Ok(RegulatorCredentials { username, token }),
        (None, _) => Err(missing_credential(
            "username",
            &username_setting_key(tenant_id),
            ENV_REGULATOR_USERNAME,
            tenant_id,
        )),
        (_, None) => Err(missing_credential(
            "token",
            &token_setting_key(tenant_id),
            ENV_REGULATOR_TOKEN,
            tenant_id,
        )),
    }
}

fn missing_credential(name: &str, setting_key: &str, env_var: &str, tenant_id: &str) -> Error {
    Error::Config(format!(
        "Regulator {} not configured for tenant '{}'. Configure using one of:\n\
         1. Settings: {}\n\
         2. Environment: {}\n\
         3. TOML config: [regulator] {} = \"...\"",
        name, tenant_id, setting_key, env_var, name
    ))
}

fn resolve_tier(
    name: &str,
    database: Option<String>,
    environment: Option<String>,
    toml: Option<String>,
) -> Option<String> {
    let tiers = [
        ("database", database.filter(|v| is_valid_value(v))),
        ("environment", environment.filter(|v| is_valid_value(v))),
        ("TOML", toml.filter(|v| is_valid_value(v))),
    ];

    let sources: Vec<&str> = tiers
        .iter()
        .filter(|(_, value)| value.is_some())
        .map(|(source, _)| *source)
        .collect();
    if sources.len() > 1 {
        warn!(
            "Regulator {} found in multiple sources: {}. Using {} (highest priority).",
            name,
            sources.join(", "),
            sources[0]
        );
    }

    tiers.into_iter().find_map(|(source, value)| {
        value.map(|value| {
            debug!("Regulator {} loaded from {}", name, source);
            value.trim().to_string()
        })
    })
}

/// Non-empty, non-whitespace
pub fn is_valid_value(value: &str) -> bool {
    !value.trim().is_empty()
}

/// Batch policy from configuration, with an optional per-request strictness override
pub fn batch_policy(config: &RegulatorConfig, require_valid: Option<bool>) -> BatchPolicy {
    BatchPolicy {
        require_valid_before_submit: require_valid.unwrap_or(config.require_valid_before_submit),
        submit_timeout: Duration::from_millis(config.timeout_ms),
        max_attempts: config.max_attempts.max(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_valid_tier_wins() {
        let value = resolve_tier(
            "token",
            Some("  ".to_string()),
            Some("from-env".to_string()),
            Some("from-toml".to_string()),
        );
        assert_eq!(value.as_deref(), Some("from-env"));
    }

    #[test]
    fn test_no_tier_is_none() {
        assert!(resolve_tier("token", None, None, Some(String::new())).is_none());
    }

    #[test]
    fn test_policy_override() {
        let config = RegulatorConfig {
            require_valid_before_submit: true,
            max_attempts: 0,
            timeout_ms: 1500,
            ..Default::default()
        };

        let policy = batch_policy(&config, None);
        assert!(policy.require_valid_before_submit);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.submit_timeout, Duration::from_millis(1500));

        assert!(!batch_policy(&config, Some(false)).require_valid_before_submit);
    }
}

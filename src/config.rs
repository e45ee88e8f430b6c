use std::str::FromStr;
use std::time::Duration;

use crate::authz::PermissionInheritance;
use crate::errors::AppError;

/// Runtime settings, read from the process environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub busy_timeout: Duration,
    pub conflict_retries: u32,
    pub permission_inheritance: PermissionInheritance,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(10),
            busy_timeout: Duration::from_millis(5000),
            conflict_retries: 3,
            permission_inheritance: PermissionInheritance::default(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            max_connections: env_parse("RBAC_MAX_CONNECTIONS", defaults.max_connections)?,
            acquire_timeout: Duration::from_secs(env_parse(
                "RBAC_ACQUIRE_TIMEOUT_SECS",
                defaults.acquire_timeout.as_secs(),
            )?),
            busy_timeout: Duration::from_millis(env_parse(
                "RBAC_BUSY_TIMEOUT_MS",
                defaults.busy_timeout.as_millis() as u64,
            )?),
            conflict_retries: env_parse("RBAC_CONFLICT_RETRIES", defaults.conflict_retries)?,
            permission_inheritance: env_parse(
                "RBAC_PERMISSION_INHERITANCE",
                defaults.permission_inheritance,
            )?,
        })
    }

    pub fn database_url(&self) -> Result<&str, AppError> {
        self.database_url
            .as_deref()
            .ok_or_else(|| AppError::configuration("DATABASE_URL not set"))
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::configuration(format!("{key} has an invalid value: '{raw}'"))),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parse_falls_back_to_default_when_unset() {
        let value: u32 = env_parse("RBAC_TEST_SURELY_UNSET_VARIABLE", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn env_parse_rejects_garbage() {
        std::env::set_var("RBAC_TEST_GARBAGE_RETRIES", "many");
        let result: Result<u32, _> = env_parse("RBAC_TEST_GARBAGE_RETRIES", 3);
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }
}

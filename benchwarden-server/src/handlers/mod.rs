pub mod scans;
pub mod schedules;
pub mod system;

use benchwarden_core::types::ResourceKey;

use crate::errors::{AppError, AppResult};

fn default_scope() -> String {
    "default".to_string()
}

/// Identities end up in spawned names and metric labels; keep them tame.
fn resource_key(scope: String, name: String) -> AppResult<ResourceKey> {
    for (field, value) in [("scope", &scope), ("name", &name)] {
        if value.is_empty() {
            return Err(AppError::bad_request(format!("{field} must not be empty")));
        }
        if value.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(AppError::bad_request(format!(
                "{field} '{value}' must not contain whitespace or '/'"
            )));
        }
    }
    Ok(ResourceKey::new(scope, name))
}

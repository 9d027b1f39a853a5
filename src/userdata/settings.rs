use std::str::FromStr;

use serde_json::{Map, Value};

use super::{UserDataError, UserId, UserStore};

/// Which settings document to read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsScope {
    Player,
    Notes,
}

impl SettingsScope {
    pub fn as_str(self) -> &'static str {
        match self {
            SettingsScope::Player => "player",
            SettingsScope::Notes => "notes",
        }
    }
}

impl FromStr for SettingsScope {
    type Err = UserDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "player" => Ok(SettingsScope::Player),
            "notes" => Ok(SettingsScope::Notes),
            other => Err(UserDataError::Invalid(format!(
                "unknown settings scope '{}'. Must be player or notes",
                other
            ))),
        }
    }
}

impl UserStore {
    /// Shallow-merge `patch` into the stored settings object and return the result.
    pub async fn save_settings(
        &self,
        user: &UserId,
        scope: SettingsScope,
        patch: &Value,
    ) -> Result<Value, UserDataError> {
        let Value::Object(patch) = patch else {
            return Err(UserDataError::Invalid(
                "settings must be a JSON object".to_string(),
            ));
        };

        // Deferred transactions fail the read-to-write upgrade under contention.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        let existing: Option<String> =
            sqlx::query_scalar("SELECT settings_json FROM settings WHERE user_id = ? AND scope = ?")
                .bind(user.as_str())
                .bind(scope.as_str())
                .fetch_optional(&mut *tx)
                .await?;

        let mut merged = match existing {
            Some(raw) => match serde_json::from_str::<Value>(&raw)? {
                Value::Object(map) => map,
                _ => Map::new(),
            },
            None => Map::new(),
        };
        for (key, value) in patch {
            merged.insert(key.clone(), value.clone());
        }
        let merged = Value::Object(merged);

        sqlx::query(
            "INSERT INTO settings (user_id, scope, settings_json, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(user_id, scope) DO UPDATE SET settings_json = excluded.settings_json, updated_at = excluded.updated_at",
        )
        .bind(user.as_str())
        .bind(scope.as_str())
        .bind(merged.to_string())
        .bind(self.now())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(merged)
    }

    /// `None` when nothing has been saved for this scope.
    pub async fn get_settings(&self, user: &UserId, scope: SettingsScope) -> Result<Option<Value>, UserDataError> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT settings_json FROM settings WHERE user_id = ? AND scope = ?")
                .bind(user.as_str())
                .bind(scope.as_str())
                .fetch_optional(&self.pool)
                .await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

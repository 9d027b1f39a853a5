use serde::Serialize;
use sqlx::Row;

use super::{require, UserDataError, UserId, UserStore};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Favorite {
    pub id: String,
    pub mastery: i64,
    pub created_at: i64,
}

impl UserStore {
    /// Add or replace a favorite. Re-adding resets `created_at` and `mastery`.
    pub async fn add_favorite(
        &self,
        user: &UserId,
        dialog_id: &str,
        mastery: i64,
    ) -> Result<Favorite, UserDataError> {
        let dialog_id = require(dialog_id, "dialog id")?;
        let created_at = self.now();
        sqlx::query(
            "INSERT INTO favorites (user_id, dialog_id, mastery, created_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(user_id, dialog_id) DO UPDATE SET mastery = excluded.mastery, created_at = excluded.created_at",
        )
        .bind(user.as_str())
        .bind(&dialog_id)
        .bind(mastery)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(Favorite {
            id: dialog_id,
            mastery,
            created_at,
        })
    }

    /// Returns whether a favorite was removed.
    pub async fn remove_favorite(&self, user: &UserId, dialog_id: &str) -> Result<bool, UserDataError> {
        let result = sqlx::query("DELETE FROM favorites WHERE user_id = ? AND dialog_id = ?")
            .bind(user.as_str())
            .bind(dialog_id.trim())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn is_favorite(&self, user: &UserId, dialog_id: &str) -> Result<bool, UserDataError> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM favorites WHERE user_id = ? AND dialog_id = ?")
                .bind(user.as_str())
                .bind(dialog_id.trim())
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    /// Favorites in the order they were added.
    pub async fn list_favorites(&self, user: &UserId) -> Result<Vec<Favorite>, UserDataError> {
        let rows = sqlx::query(
            "SELECT dialog_id, mastery, created_at FROM favorites WHERE user_id = ? ORDER BY created_at ASC, dialog_id ASC",
        )
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| Favorite {
                id: row.get("dialog_id"),
                mastery: row.get("mastery"),
                created_at: row.get("created_at"),
            })
            .collect())
    }
}

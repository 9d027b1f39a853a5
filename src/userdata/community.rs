//! Feedback and feature polls. Neither requires a signed-in user.

use std::str::FromStr;

use serde::Serialize;
use sqlx::Row;
use uuid::Uuid;

use super::{UserDataError, UserId, UserStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOption {
    NeedMp3,
    NoMp3,
}

impl PollOption {
    pub fn as_str(self) -> &'static str {
        match self {
            PollOption::NeedMp3 => "need_mp3",
            PollOption::NoMp3 => "no_mp3",
        }
    }
}

impl FromStr for PollOption {
    type Err = UserDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "need_mp3" => Ok(PollOption::NeedMp3),
            "no_mp3" => Ok(PollOption::NoMp3),
            other => Err(UserDataError::Invalid(format!(
                "unknown poll option '{}'. Must be need_mp3 or no_mp3",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollResults {
    pub need_mp3: i64,
    pub no_mp3: i64,
}

impl UserStore {
    /// Store a feedback message. `user` is `None` for anonymous feedback.
    pub async fn add_feedback(
        &self,
        user: Option<&UserId>,
        email: Option<&str>,
        user_agent: Option<&str>,
        text: &str,
    ) -> Result<String, UserDataError> {
        if text.trim().is_empty() {
            return Err(UserDataError::Invalid("feedback text must not be blank".to_string()));
        }
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO feedback (id, user_id, email, user_agent, text, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(user.map(UserId::as_str))
        .bind(email)
        .bind(user_agent)
        .bind(text)
        .bind(self.now())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    /// Count one vote. The poll row starts at zero for both options.
    pub async fn record_vote(&self, poll_id: &str, option: PollOption) -> Result<PollResults, UserDataError> {
        let poll_id = super::require(poll_id, "poll id")?;
        let (need, no) = match option {
            PollOption::NeedMp3 => (1, 0),
            PollOption::NoMp3 => (0, 1),
        };
        sqlx::query(
            "INSERT INTO polls (poll_id, need_mp3, no_mp3, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(poll_id) DO UPDATE SET
                need_mp3 = need_mp3 + excluded.need_mp3,
                no_mp3 = no_mp3 + excluded.no_mp3,
                updated_at = excluded.updated_at",
        )
        .bind(&poll_id)
        .bind(need)
        .bind(no)
        .bind(self.now())
        .execute(&self.pool)
        .await?;

        self.poll_results(&poll_id).await
    }

    /// Zero counts for a poll nobody has voted in.
    pub async fn poll_results(&self, poll_id: &str) -> Result<PollResults, UserDataError> {
        let row = sqlx::query("SELECT need_mp3, no_mp3 FROM polls WHERE poll_id = ?")
            .bind(poll_id.trim())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row
            .map(|row| PollResults {
                need_mp3: row.get("need_mp3"),
                no_mp3: row.get("no_mp3"),
            })
            .unwrap_or_default())
    }

    pub async fn feedback_count(&self) -> Result<i64, UserDataError> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM feedback")
            .fetch_one(&self.pool)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::userdata::testing::{store, user};

    #[tokio::test]
    async fn anonymous_feedback_is_accepted() {
        let h = store().await;
        h.store
            .add_feedback(None, None, Some("curl/8"), "great app")
            .await
            .unwrap();
        h.store
            .add_feedback(Some(&user("u1")), Some("a@b.c"), None, "audio is quiet")
            .await
            .unwrap();
        assert_eq!(h.store.feedback_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn blank_feedback_is_rejected() {
        let h = store().await;
        assert!(h.store.add_feedback(None, None, None, "  ").await.is_err());
    }

    #[tokio::test]
    async fn first_vote_initializes_both_counters() {
        let h = store().await;
        assert_eq!(
            h.store.poll_results("mp3_features").await.unwrap(),
            PollResults::default()
        );
        let after = h
            .store
            .record_vote("mp3_features", PollOption::NoMp3)
            .await
            .unwrap();
        assert_eq!(after, PollResults { need_mp3: 0, no_mp3: 1 });

        h.store.record_vote("mp3_features", PollOption::NeedMp3).await.unwrap();
        let after = h
            .store
            .record_vote("mp3_features", PollOption::NeedMp3)
            .await
            .unwrap();
        assert_eq!(after, PollResults { need_mp3: 2, no_mp3: 1 });
    }

    #[test]
    fn option_parsing() {
        assert_eq!("need_mp3".parse::<PollOption>().unwrap(), PollOption::NeedMp3);
        assert!("maybe".parse::<PollOption>().is_err());
    }
}

use anyhow::Result;
use sqlx::SqlitePool;

const TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS favorites (
        user_id TEXT NOT NULL,
        dialog_id TEXT NOT NULL,
        mastery INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (user_id, dialog_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS notes (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        dialog_id TEXT NOT NULL,
        text TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS dialog_content (
        user_id TEXT NOT NULL,
        dialog_id TEXT NOT NULL,
        original_text TEXT NOT NULL DEFAULT '',
        translation_text TEXT NOT NULL DEFAULT '',
        qid TEXT,
        title TEXT NOT NULL DEFAULT '',
        kind TEXT NOT NULL DEFAULT '',
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (user_id, dialog_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS progress (
        user_id TEXT NOT NULL,
        track TEXT NOT NULL,
        qid TEXT NOT NULL,
        dialog_id TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (user_id, track, qid, dialog_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS practice_logs (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        question_id TEXT NOT NULL,
        question_title TEXT NOT NULL DEFAULT '',
        question_number TEXT NOT NULL DEFAULT '',
        question_type TEXT NOT NULL DEFAULT '',
        score REAL,
        timestamp INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS settings (
        user_id TEXT NOT NULL,
        scope TEXT NOT NULL,
        settings_json TEXT NOT NULL DEFAULT '{}',
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (user_id, scope)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS feedback (
        id TEXT PRIMARY KEY,
        user_id TEXT,
        email TEXT,
        user_agent TEXT,
        text TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS polls (
        poll_id TEXT PRIMARY KEY,
        need_mp3 INTEGER NOT NULL DEFAULT 0,
        no_mp3 INTEGER NOT NULL DEFAULT 0,
        updated_at INTEGER NOT NULL
    )
    "#,
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_notes_dialog ON notes(user_id, dialog_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_practice_logs_time ON practice_logs(user_id, timestamp)",
];

/// Create the user-state schema. Safe to run repeatedly.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    for ddl in TABLES.iter().chain(INDEXES) {
        sqlx::query(ddl).execute(pool).await?;
    }
    Ok(())
}

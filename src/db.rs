use std::str::FromStr;

use anyhow::Result;
use chrono::Local;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::auth::{hash_password, verify_password};
use crate::config::AppConfig;
use crate::models::ChatEntry;

async fn connect(dsn: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(dsn)?.create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

impl UserStore {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;
        Self::open(&config.users_dsn()).await
    }

    pub async fn open(dsn: &str) -> Result<Self> {
        let store = Self {
            pool: connect(dsn).await?,
        };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                username TEXT PRIMARY KEY,
                password_hash TEXT NOT NULL,
                salt TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Returns `false` when the username is already taken.
    pub async fn register(&self, username: &str, password: &str) -> Result<bool> {
        if username.trim().is_empty() {
            anyhow::bail!("username must not be empty");
        }

        let (password_hash, salt) = hash_password(password);
        let result = sqlx::query(
            "INSERT INTO users (username, password_hash, salt) VALUES (?, ?, ?) \
             ON CONFLICT(username) DO NOTHING",
        )
        .bind(username)
        .bind(&password_hash)
        .bind(&salt)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn authenticate(&self, username: &str, password: &str) -> Result<bool> {
        let row = sqlx::query("SELECT password_hash, salt FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.is_some_and(|r| {
            verify_password(
                password,
                &r.get::<String, _>("salt"),
                &r.get::<String, _>("password_hash"),
            )
        }))
    }
}

#[derive(Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
}

impl HistoryStore {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;
        Self::open(&config.history_dsn()).await
    }

    pub async fn open(dsn: &str) -> Result<Self> {
        let store = Self {
            pool: connect(dsn).await?,
        };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                question TEXT NOT NULL,
                answer TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_chat_messages_user
                ON chat_messages (username, id);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Closes the pool; later queries fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// History shares one table keyed by username, so this only re-asserts the schema.
    pub async fn ensure_table(&self, username: &str) -> Result<()> {
        tracing::debug!("ensuring chat history storage for {}", username);
        self.migrate().await
    }

    pub async fn append(&self, username: &str, question: &str, answer: &str) -> Result<()> {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        sqlx::query(
            "INSERT INTO chat_messages (username, timestamp, question, answer) VALUES (?, ?, ?, ?)",
        )
        .bind(username)
        .bind(timestamp)
        .bind(question)
        .bind(answer)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Latest `limit` entries for the user, oldest first.
    pub async fn list_recent(&self, username: &str, limit: u32) -> Result<Vec<ChatEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT timestamp, question, answer
            FROM chat_messages
            WHERE username = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(username)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut out: Vec<ChatEntry> = rows
            .into_iter()
            .map(|r| ChatEntry {
                timestamp: r.get("timestamp"),
                question: r.get("question"),
                answer: r.get("answer"),
            })
            .collect();
        out.reverse();
        Ok(out)
    }
}

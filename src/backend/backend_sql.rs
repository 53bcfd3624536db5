use std::path::{Path, PathBuf};

use sqlx::{migrate::MigrateDatabase, query_as, Pool, Sqlite, SqlitePool};

use log::{error, info};

use crate::backend::InsertError;
use crate::user::User;

type Result<T> = std::result::Result<T, ()>;

pub struct Backend(pub Pool<Sqlite>);

fn into_sql(path: &Path) -> PathBuf {
    path.join("playroom.sql")
}

pub async fn init(url: &str) -> Result<()> {
    if Sqlite::database_exists(url).await.unwrap_or(false) {
        return Ok(());
    }

    Sqlite::create_database(url)
        .await
        .map(|()| info!("created {url}"))
        .map_err(|e| {
            error!("error creating database {url}: {e}");
        })
}

impl Backend {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        let db_pathbuf = into_sql(data_dir);
        let db_path = db_pathbuf.to_str().ok_or_else(|| {
            error!("non utf-8 data directory: {data_dir:?}");
        })?;
        let url = format!("sqlite://{db_path}");

        init(&url).await?;
        info!("Using {url}");

        let pool = SqlitePool::connect(&url).await.map_err(|e| {
            error!("db connection: {e}");
        })?;

        Self::migrated(pool).await
    }

    pub async fn migrated(pool: Pool<Sqlite>) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                error!("migration: {e}");
            })?;

        Ok(Self(pool))
    }

    pub async fn close(&self) {
        self.0.close().await
    }
}

impl Backend {
    pub async fn users_named(&self, username: &str) -> Result<Vec<User>> {
        query_as::<_, User>(
            "
            SELECT id, username, hash, email
            FROM users
            WHERE username = ?
            ",
        )
        .bind(username)
        .fetch_all(&self.0)
        .await
        .map_err(|e| {
            error!("couldn't query for user {username}: {e:?}");
        })
    }

    /// Inserts a user, failing with `Taken` if the username already exists.
    /// Returns the new user's id.
    pub async fn create_user(
        &self,
        username: &str,
        hash: &str,
        email: &str,
    ) -> std::result::Result<i64, InsertError> {
        let inserted: Option<(i64,)> = query_as(
            "
            INSERT INTO users
            (username, hash, email)
            VALUES
            (?, ?, ?)
            ON CONFLICT(username)
            DO NOTHING
            RETURNING id
            ",
        )
        .bind(username)
        .bind(hash)
        .bind(email)
        .fetch_optional(&self.0)
        .await
        .map_err(|e| {
            error!("error inserting user {username}: {e:?}");
            InsertError::Internal
        })?;

        inserted.map(|(id,)| id).ok_or(InsertError::Taken)
    }
}

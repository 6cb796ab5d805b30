use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

/// Pool handle shared by every storage submodule. Cloning is cheap (it
/// clones the underlying `SqlitePool`, itself an `Arc`).
#[derive(Clone)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    /// Open (or create) the database at `database_url` and run bootstrap:
    /// schema creation, then default asset profiles / dynamic params seeding
    /// if those tables are empty.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init_schema().await?;
        db.seed_defaults().await?;

        Ok(db)
    }

    async fn init_schema(&self) -> Result<()> {
        let schema = include_str!("../schema.sql");

        for statement in schema.split(';') {
            let stmt = statement.trim();
            if !stmt.is_empty() {
                sqlx::query(stmt).execute(&self.pool).await?;
            }
        }

        Ok(())
    }

    /// Seed default asset profiles and dynamic parameters on first open.
    /// Idempotent: `INSERT OR IGNORE` leaves already-seeded rows untouched.
    async fn seed_defaults(&self) -> Result<()> {
        crate::assets::seed_default_profiles(&self.pool).await?;
        crate::state::seed_default_dynamic_params(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_creates_schema_and_seeds() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM asset_profiles")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert!(row.0 > 0);
    }
}

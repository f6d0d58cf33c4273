use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    ensure_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Creates the tables the API and the places pipeline read and write.
/// Idempotent.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            username TEXT NOT NULL UNIQUE,
            hashed_password TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    recreate_restaurant_details(pool, false).await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_restaurant_details_zip ON restaurant_details(zip_code)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Creates `restaurant_details`, dropping any previous contents first when
/// `replace` is set. The places pipeline reloads the whole table each run.
pub async fn recreate_restaurant_details(pool: &SqlitePool, replace: bool) -> Result<()> {
    if replace {
        sqlx::query("DROP TABLE IF EXISTS restaurant_details")
            .execute(pool)
            .await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS restaurant_details (
            place_id TEXT NOT NULL,
            name TEXT,
            address TEXT,
            zip_code TEXT,
            latitude REAL,
            longitude REAL,
            rating REAL,
            user_ratings_total INTEGER,
            business_status TEXT,
            types TEXT NOT NULL DEFAULT '[]',
            insert_date TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    if replace {
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_restaurant_details_zip ON restaurant_details(zip_code)",
        )
        .execute(pool)
        .await?;
    }

    Ok(())
}

//! Test database utilities backed by throwaway SQLite files

use anyhow::Result;
use report_sync::database_sqlx::DatabaseManagerSqlx;
use report_sync::models::{Company, Ticker};
use std::sync::Arc;
use tempfile::TempDir;

/// A fresh database that is deleted when dropped
pub struct TestDatabase {
    pub manager: Arc<DatabaseManagerSqlx>,
    _dir: TempDir,
}

impl TestDatabase {
    pub async fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("reports_test.db");
        let manager = DatabaseManagerSqlx::new(&path.to_string_lossy()).await?;
        Ok(Self {
            manager: Arc::new(manager),
            _dir: dir,
        })
    }

    /// A fresh database with `tickers` in the company universe
    pub async fn with_companies(tickers: &[&str]) -> Result<Self> {
        let db = Self::new().await?;
        for ticker in tickers {
            db.manager
                .upsert_company(&Company {
                    ticker: Ticker::new(*ticker),
                    name: format!("Company {}", ticker),
                })
                .await?;
        }
        Ok(db)
    }
}

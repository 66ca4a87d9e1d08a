use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow}, Row, SqlitePool};
use tracing::{debug, info};

use crate::database::{CreateOutcome, ReportStore};
use crate::models::{Company, FiscalPeriod, ReportFields, ReportKind, ReportRecord, Ticker, VersionLedger, VersionTag};

/// SQLX-based store for companies, reports and the version ledger
#[derive(Clone)]
pub struct DatabaseManagerSqlx {
    pool: SqlitePool,
}

impl DatabaseManagerSqlx {
    /// Open (creating if needed) the SQLite database at `database_path`
    pub async fn new(database_path: &str) -> Result<Self> {
        let path = database_path.strip_prefix("sqlite:").unwrap_or(database_path);
        info!("💾 Opening report database at {}", path);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(SqliteConnectOptions::new().filename(path).create_if_missing(true))
            .await
            .with_context(|| format!("failed to open database {}", path))?;

        // Enable WAL mode so workers can write while the reconciler reads
        sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous = NORMAL").execute(&pool).await?;

        let manager = Self { pool };
        manager.create_schema().await?;
        Ok(manager)
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS companies (
                ticker TEXT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#
        ).execute(&self.pool).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticker TEXT NOT NULL,
                report_kind TEXT NOT NULL,
                fiscal_year INTEGER NOT NULL,
                fiscal_quarter INTEGER NOT NULL,
                version TEXT NOT NULL,
                fields TEXT NOT NULL,
                created_at DATETIME NOT NULL,
                UNIQUE(ticker, report_kind, fiscal_year, fiscal_quarter, version)
            )
            "#
        ).execute(&self.pool).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS report_versions (
                ticker TEXT NOT NULL,
                report_kind TEXT NOT NULL,
                fiscal_year INTEGER NOT NULL,
                fiscal_quarter INTEGER NOT NULL,
                version TEXT NOT NULL,
                updated_at DATETIME NOT NULL,
                PRIMARY KEY (ticker, report_kind, fiscal_year, fiscal_quarter)
            )
            "#
        ).execute(&self.pool).await?;

        debug!("report schema ready");
        Ok(())
    }

    /// Insert or rename a company in the universe
    pub async fn upsert_company(&self, company: &Company) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO companies (ticker, name)
            VALUES (?, ?)
            ON CONFLICT(ticker) DO UPDATE SET name = excluded.name
            "#
        )
        .bind(company.ticker.as_str())
        .bind(&company.name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_companies(&self) -> Result<Vec<Company>> {
        let rows = sqlx::query("SELECT ticker, name FROM companies ORDER BY ticker")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| Company {
                ticker: Ticker::new(row.get::<String, _>("ticker")),
                name: row.get("name"),
            })
            .collect())
    }

    /// Most recently stored version of a report, if any
    pub async fn get_report(
        &self,
        ticker: &Ticker,
        kind: ReportKind,
        period: FiscalPeriod,
    ) -> Result<Option<ReportRecord>> {
        let row = sqlx::query(
            r#"
            SELECT version, fields FROM reports
            WHERE ticker = ? AND report_kind = ? AND fiscal_year = ? AND fiscal_quarter = ?
            ORDER BY id DESC
            LIMIT 1
            "#
        )
        .bind(ticker.as_str())
        .bind(kind.as_str())
        .bind(period.year())
        .bind(i64::from(period.quarter()))
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let fields: ReportFields = serde_json::from_str(&row.get::<String, _>("fields"))
            .with_context(|| format!("corrupt fields for {} {} {}", ticker, kind, period))?;

        Ok(Some(ReportRecord {
            ticker: ticker.clone(),
            fiscal_period: period,
            report_kind: kind,
            version: row.get("version"),
            fields,
        }))
    }

    /// Delete every stored version of a report and clear its ledger slot so the
    /// next sweep fetches it again. Returns the number of reports removed.
    pub async fn delete_report(&self, ticker: &Ticker, kind: ReportKind, period: FiscalPeriod) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query(
            "DELETE FROM reports WHERE ticker = ? AND report_kind = ? AND fiscal_year = ? AND fiscal_quarter = ?",
        )
        .bind(ticker.as_str())
        .bind(kind.as_str())
        .bind(period.year())
        .bind(i64::from(period.quarter()))
        .execute(&mut tx)
        .await?
        .rows_affected();

        sqlx::query(
            "DELETE FROM report_versions WHERE ticker = ? AND report_kind = ? AND fiscal_year = ? AND fiscal_quarter = ?",
        )
        .bind(ticker.as_str())
        .bind(kind.as_str())
        .bind(period.year())
        .bind(i64::from(period.quarter()))
        .execute(&mut tx)
        .await?;

        tx.commit().await?;
        Ok(deleted)
    }
}

fn ledger_row(row: &SqliteRow) -> Result<(FiscalPeriod, VersionTag)> {
    let year: i64 = row.try_get("fiscal_year")?;
    let quarter: i64 = row.try_get("fiscal_quarter")?;
    let version: String = row.try_get("version")?;

    let year = i32::try_from(year).map_err(|_| anyhow!("fiscal year {} out of range", year))?;
    let quarter = u8::try_from(quarter).map_err(|_| anyhow!("fiscal quarter {} out of range", quarter))?;
    let period = FiscalPeriod::new(year, quarter)?;

    Ok((period, VersionTag::from(version.as_str())))
}

#[async_trait]
impl ReportStore for DatabaseManagerSqlx {
    async fn list_companies(&self) -> Result<Vec<Ticker>> {
        let rows = sqlx::query("SELECT ticker FROM companies ORDER BY ticker")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| Ticker::new(row.get::<String, _>("ticker")))
            .collect())
    }

    async fn get_version_table(&self, ticker: &Ticker, kind: ReportKind) -> Result<VersionLedger> {
        let rows = sqlx::query(
            r#"
            SELECT fiscal_year, fiscal_quarter, version FROM report_versions
            WHERE ticker = ? AND report_kind = ?
            "#
        )
        .bind(ticker.as_str())
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(ledger_row).collect()
    }

    async fn create_report(&self, record: &ReportRecord) -> Result<CreateOutcome> {
        let fields = serde_json::to_string(&record.fields)?;

        let result = sqlx::query(
            r#"
            INSERT INTO reports (ticker, report_kind, fiscal_year, fiscal_quarter, version, fields, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(ticker, report_kind, fiscal_year, fiscal_quarter, version) DO NOTHING
            "#
        )
        .bind(record.ticker.as_str())
        .bind(record.report_kind.as_str())
        .bind(record.fiscal_period.year())
        .bind(i64::from(record.fiscal_period.quarter()))
        .bind(&record.version)
        .bind(fields)
        .bind(Utc::now().naive_utc())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(CreateOutcome::Conflict)
        } else {
            Ok(CreateOutcome::Created)
        }
    }

    async fn upsert_version(
        &self,
        ticker: &Ticker,
        kind: ReportKind,
        period: FiscalPeriod,
        tag: VersionTag,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO report_versions (ticker, report_kind, fiscal_year, fiscal_quarter, version, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(ticker, report_kind, fiscal_year, fiscal_quarter) DO UPDATE SET
                version = excluded.version,
                updated_at = excluded.updated_at
            "#
        )
        .bind(ticker.as_str())
        .bind(kind.as_str())
        .bind(period.year())
        .bind(i64::from(period.quarter()))
        .bind(tag.as_str())
        .bind(Utc::now().naive_utc())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

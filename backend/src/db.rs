use anyhow::Result;
use chrono::{DateTime, Utc};
use shared::{Category, CategoryTotal, Expense};
use sqlx::{migrate::MigrateDatabase, sqlite::SqliteRow, Row, Sqlite, SqlitePool};
use std::sync::Arc;

/// DbConnection owns the SQLite pool and every query the services run.
#[derive(Clone)]
pub struct DbConnection {
    pool: Arc<SqlitePool>,
}

/// Predicate shared by the expense page fetch and its matching count query.
/// `range` is a half-open `[start, end)` window over `date`.
#[derive(Debug, Clone, Default)]
pub struct ExpenseFilter {
    pub category_id: Option<String>,
    pub range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl ExpenseFilter {
    fn where_clause(&self) -> String {
        let mut clause = String::from("is_deleted = 0");
        if self.category_id.is_some() {
            clause.push_str(" AND category_id = ?");
        }
        if self.range.is_some() {
            clause.push_str(" AND date >= ? AND date < ?");
        }
        clause
    }

    fn bind<'q>(
        &'q self,
        mut query: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    ) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
        if let Some(category_id) = &self.category_id {
            query = query.bind(category_id);
        }
        if let Some((start, end)) = &self.range {
            query = query.bind(start).bind(end);
        }
        query
    }
}

impl DbConnection {
    /// Create a new database connection, creating the database and schema
    /// if they don't exist yet.
    pub async fn new(url: &str) -> Result<Self> {
        if !Sqlite::database_exists(url).await.unwrap_or(false) {
            Sqlite::create_database(url).await?
        }

        let pool = SqlitePool::connect(url).await?;
        Self::setup_schema(&pool).await?;

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Initialize a test database with a unique in-memory name
    #[cfg(test)]
    pub async fn init_test() -> Result<Self> {
        let test_id = uuid::Uuid::new_v4().to_string();
        let db_url = format!("file:memdb_{}?mode=memory&cache=shared", test_id);

        Self::new(&db_url).await
    }

    /// Set up the required database schema
    async fn setup_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS categories (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                slug TEXT NOT NULL,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_categories_slug ON categories (slug)")
            .execute(pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS expenses (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                amount REAL NOT NULL,
                category_id TEXT NOT NULL,
                date TEXT NOT NULL,
                note TEXT,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_expenses_date ON expenses (date)")
            .execute(pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_expenses_category_id ON expenses (category_id)",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Persist a category record
    pub async fn insert_category(&self, category: &Category) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO categories (id, name, slug, is_deleted, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&category.id)
        .bind(&category.name)
        .bind(&category.slug)
        .bind(category.is_deleted)
        .bind(category.created_at)
        .bind(category.updated_at)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    /// Look up a non-deleted category holding the given slug
    pub async fn find_active_category_by_slug(
        &self,
        slug: &str,
    ) -> Result<Option<Category>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT id, name, slug, is_deleted, created_at, updated_at
             FROM categories WHERE slug = ? AND is_deleted = 0",
        )
        .bind(slug)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(row.map(|r| category_from_row(&r)))
    }

    /// All non-deleted categories, ordered by name ascending
    pub async fn list_active_categories(&self) -> Result<Vec<Category>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT id, name, slug, is_deleted, created_at, updated_at
             FROM categories WHERE is_deleted = 0 ORDER BY name ASC",
        )
        .fetch_all(&*self.pool)
        .await?;

        Ok(rows.iter().map(category_from_row).collect())
    }

    /// Fetch a category by id regardless of its deletion flag;
    /// the service decides whether a soft-deleted row counts as found.
    pub async fn find_category_by_id(&self, id: &str) -> Result<Option<Category>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT id, name, slug, is_deleted, created_at, updated_at
             FROM categories WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(row.map(|r| category_from_row(&r)))
    }

    /// Persist an expense record
    pub async fn insert_expense(&self, expense: &Expense) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO expenses (id, title, amount, category_id, date, note, is_deleted, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&expense.id)
        .bind(&expense.title)
        .bind(expense.amount)
        .bind(&expense.category_id)
        .bind(expense.date)
        .bind(&expense.note)
        .bind(expense.is_deleted)
        .bind(expense.created_at)
        .bind(expense.updated_at)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    /// One page of expenses matching the filter, newest first
    pub async fn list_expenses(
        &self,
        filter: &ExpenseFilter,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<Expense>, sqlx::Error> {
        let sql = format!(
            "SELECT id, title, amount, category_id, date, note, is_deleted, created_at, updated_at
             FROM expenses WHERE {} ORDER BY date DESC LIMIT ? OFFSET ?",
            filter.where_clause()
        );

        let query = filter.bind(sqlx::query(&sql));
        let rows = query
            .bind(limit as i64)
            .bind(offset.min(i64::MAX as u64) as i64)
            .fetch_all(&*self.pool)
            .await?;

        Ok(rows.iter().map(expense_from_row).collect())
    }

    /// Count of expenses matching the filter
    pub async fn count_expenses(&self, filter: &ExpenseFilter) -> Result<u64, sqlx::Error> {
        let sql = format!(
            "SELECT COUNT(*) AS total FROM expenses WHERE {}",
            filter.where_clause()
        );

        let row = filter.bind(sqlx::query(&sql)).fetch_one(&*self.pool).await?;
        let total: i64 = row.get("total");
        Ok(total as u64)
    }

    /// Sum of amounts over non-deleted expenses with `date` in `[start, end)`
    pub async fn sum_expenses(
        &self,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
    ) -> Result<f64, sqlx::Error> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(amount), 0.0) AS total
             FROM expenses WHERE is_deleted = 0 AND date >= ? AND date < ?",
        )
        .bind(start)
        .bind(end)
        .fetch_one(&*self.pool)
        .await?;

        Ok(row.get("total"))
    }

    /// Per-category amount totals over `[start, end)`, joined with the
    /// category name where an active category still exists, ordered by
    /// summed amount descending.
    pub async fn category_totals(
        &self,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
    ) -> Result<Vec<CategoryTotal>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT e.category_id AS category_id,
                   c.name AS category_name,
                   SUM(e.amount) AS total
            FROM expenses e
            LEFT JOIN categories c ON c.id = e.category_id AND c.is_deleted = 0
            WHERE e.is_deleted = 0 AND e.date >= ? AND e.date < ?
            GROUP BY e.category_id
            ORDER BY total DESC
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&*self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| CategoryTotal {
                category_id: row.get("category_id"),
                category_name: row.get("category_name"),
                total: row.get("total"),
            })
            .collect())
    }
}

fn category_from_row(row: &SqliteRow) -> Category {
    Category {
        id: row.get("id"),
        name: row.get("name"),
        slug: row.get("slug"),
        is_deleted: row.get("is_deleted"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn expense_from_row(row: &SqliteRow) -> Expense {
    Expense {
        id: row.get("id"),
        title: row.get("title"),
        amount: row.get("amount"),
        category_id: row.get("category_id"),
        date: row.get("date"),
        note: row.get("note"),
        is_deleted: row.get("is_deleted"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

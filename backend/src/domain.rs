use crate::db::{DbConnection, ExpenseFilter};
use crate::errors::AppError;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use shared::{
    Category, CreateCategoryRequest, CreateExpenseRequest, Expense, ExpenseListRequest,
    MonthlySummary, PageMeta,
};
use tracing::info;

const DEFAULT_PAGE_SIZE: u32 = 10;

/// Derive a slug from a category name: lowercase, alphanumeric runs
/// joined with single hyphens, everything else stripped.
pub fn slugify(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Parse a `YYYY-MM` string into the UTC month window `[start, end)`.
pub fn month_range(month: &str) -> Result<(DateTime<Utc>, DateTime<Utc>), AppError> {
    let invalid = || AppError::validation("month must be YYYY-MM");

    let (year_part, month_part) = month.split_once('-').ok_or_else(invalid)?;
    let year: i32 = year_part.parse().map_err(|_| invalid())?;
    let m: u32 = month_part.parse().map_err(|_| invalid())?;
    if year < 1 || !(1..=12).contains(&m) {
        return Err(invalid());
    }

    let start = Utc
        .with_ymd_and_hms(year, m, 1, 0, 0, 0)
        .single()
        .ok_or_else(invalid)?;
    let (next_year, next_month) = if m == 12 { (year + 1, 1) } else { (year, m + 1) };
    let end = Utc
        .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
        .single()
        .ok_or_else(invalid)?;

    Ok((start, end))
}

/// Parse the `date` field of an expense: full RFC 3339 or a bare
/// `YYYY-MM-DD`, both normalized to a UTC instant.
fn parse_expense_date(date: &str) -> Result<DateTime<Utc>, AppError> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(date) {
        return Ok(instant.with_timezone(&Utc));
    }
    if let Ok(day) = NaiveDate::parse_from_str(date, "%Y-%m-%d") {
        return Ok(Utc.from_utc_datetime(&day.and_time(chrono::NaiveTime::MIN)));
    }
    Err(AppError::validation("date must be an ISO-8601 date string"))
}

#[derive(Clone)]
pub struct CategoryService {
    db: DbConnection,
}

impl CategoryService {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }

    /// Create a category, deriving the slug from the name when the
    /// caller doesn't supply one. The slug must not be held by another
    /// active category.
    pub async fn create(&self, request: CreateCategoryRequest) -> Result<Category, AppError> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::validation("name must not be empty"));
        }

        let slug = match request.slug.as_deref().map(str::trim) {
            Some(supplied) if !supplied.is_empty() => supplied.to_lowercase(),
            _ => slugify(&name),
        };

        if self.db.find_active_category_by_slug(&slug).await?.is_some() {
            return Err(AppError::conflict("Category already exists"));
        }

        let now = Utc::now();
        let category = Category {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            slug,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        self.db.insert_category(&category).await?;

        info!("created category {} ({})", category.slug, category.id);
        Ok(category)
    }

    /// All non-deleted categories, ordered by name ascending
    pub async fn find_all(&self) -> Result<Vec<Category>, AppError> {
        Ok(self.db.list_active_categories().await?)
    }

    /// Look up a category by id; soft-deleted rows count as missing.
    pub async fn find_by_id(&self, id: &str) -> Result<Category, AppError> {
        match self.db.find_category_by_id(id).await? {
            Some(category) if !category.is_deleted => Ok(category),
            _ => Err(AppError::not_found("Category not found")),
        }
    }
}

#[derive(Clone)]
pub struct ExpenseService {
    db: DbConnection,
}

impl ExpenseService {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }

    /// Record an expense. The category reference is stored as given;
    /// its existence is deliberately not checked.
    pub async fn create(&self, request: CreateExpenseRequest) -> Result<Expense, AppError> {
        let title = request.title.trim().to_string();
        if title.is_empty() {
            return Err(AppError::validation("title must not be empty"));
        }
        if !request.amount.is_finite() {
            return Err(AppError::validation("amount must be a number"));
        }
        if request.category_id.trim().is_empty() {
            return Err(AppError::validation("categoryId must not be empty"));
        }
        let date = parse_expense_date(&request.date)?;

        let now = Utc::now();
        let expense = Expense {
            id: uuid::Uuid::new_v4().to_string(),
            title,
            amount: request.amount,
            category_id: request.category_id,
            date,
            note: request.note,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        self.db.insert_expense(&expense).await?;

        info!("created expense {} ({})", expense.title, expense.id);
        Ok(expense)
    }

    /// List expenses with optional category and month filters, newest
    /// first, paginated. The page fetch and the matching count run
    /// concurrently; they are not snapshot-isolated against writes.
    pub async fn find_filtered(
        &self,
        request: ExpenseListRequest,
    ) -> Result<(Vec<Expense>, PageMeta), AppError> {
        let mut filter = ExpenseFilter {
            category_id: request.category_id,
            range: None,
        };
        if let Some(month) = request.month.as_deref() {
            filter.range = Some(month_range(month)?);
        }

        let page = request.page.unwrap_or(1).max(1);
        let page_size = request.page_size.unwrap_or(DEFAULT_PAGE_SIZE).max(1);
        // widened so a huge page number can't overflow the skip
        let offset = u64::from(page - 1).saturating_mul(u64::from(page_size));

        let (data, total) = tokio::try_join!(
            self.db.list_expenses(&filter, page_size, offset),
            self.db.count_expenses(&filter),
        )?;

        let total_pages = (total + page_size as u64 - 1) / page_size as u64;
        let meta = PageMeta {
            page,
            page_size,
            total,
            total_pages,
        };

        info!(
            "listed {} expenses (page {} of {}, total {})",
            data.len(),
            meta.page,
            meta.total_pages,
            meta.total
        );
        Ok((data, meta))
    }
}

#[derive(Clone)]
pub struct ReportService {
    db: DbConnection,
}

impl ReportService {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }

    /// Monthly aggregate: total spend plus a per-category breakdown
    /// sorted by summed amount descending. Categories that vanished or
    /// were soft-deleted appear with no name.
    pub async fn monthly_summary(&self, month: Option<String>) -> Result<MonthlySummary, AppError> {
        let month = month.ok_or_else(|| AppError::validation("month is required as YYYY-MM"))?;
        let (start, end) = month_range(&month)?;

        let total = self.db.sum_expenses(&start, &end).await?;
        let by_category = self.db.category_totals(&start, &end).await?;

        Ok(MonthlySummary {
            month,
            total,
            by_category,
        })
    }
}

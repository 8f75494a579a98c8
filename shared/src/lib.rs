use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A spending category. Slugs are unique among non-deleted categories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    /// Normalized unique identifier derived from `name` when not supplied
    pub slug: String,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single recorded expense.
///
/// `category_id` is a weak reference: it is not checked against the
/// categories collection when the expense is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: String,
    pub title: String,
    pub amount: f64,
    pub category_id: String,
    /// When the expense happened, stored as a UTC instant
    pub date: DateTime<Utc>,
    pub note: Option<String>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateCategoryRequest {
    pub name: String,
    /// Supplied slug wins over the one derived from `name`
    pub slug: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateExpenseRequest {
    pub title: String,
    pub amount: f64,
    pub category_id: String,
    /// ISO-8601 date string, parsed into a UTC instant by the service
    pub date: String,
    pub note: Option<String>,
}

/// Filters and pagination for the expense listing endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseListRequest {
    pub category_id: Option<String>,
    /// Calendar month in `YYYY-MM` form
    pub month: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

/// Pagination metadata returned alongside a page of expenses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
    pub total_pages: u64,
}

/// Per-category slice of a monthly summary.
///
/// `category_name` is `None` when the referenced category no longer
/// exists or was soft-deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryTotal {
    pub category_id: String,
    pub category_name: Option<String>,
    pub total: f64,
}

/// Monthly aggregate report: total spend and per-category breakdown,
/// breakdown sorted by summed amount descending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlySummary {
    pub month: String,
    pub total: f64,
    pub by_category: Vec<CategoryTotal>,
}

/// Uniform response envelope used by every endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<PageMeta>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
            meta: None,
        }
    }

    pub fn ok_with_message(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: Some(data),
            meta: None,
        }
    }

    pub fn page(data: T, meta: PageMeta) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
            meta: Some(meta),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
            meta: None,
        }
    }
}

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use shared::{ApiResponse, CreateCategoryRequest, CreateExpenseRequest, ExpenseListRequest};
use tracing::info;

use crate::domain::{CategoryService, ExpenseService, ReportService};
use crate::errors::AppError;

/// Application state shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub categories: CategoryService,
    pub expenses: ExpenseService,
    pub reports: ReportService,
}

impl AppState {
    pub fn new(
        categories: CategoryService,
        expenses: ExpenseService,
        reports: ReportService,
    ) -> Self {
        Self {
            categories,
            expenses,
            reports,
        }
    }
}

/// Build the application router
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/categories", post(create_category).get(list_categories))
        .route("/expenses/create-expense", post(create_expense))
        .route("/expenses/get-all-expenses", get(list_expenses))
        .route("/reports/summary", get(monthly_summary))
        .with_state(state)
}

/// Query parameters for the expense listing endpoint. Page numbers
/// arrive as strings and are checked here, before the service runs.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseListQuery {
    pub category_id: Option<String>,
    pub month: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

impl ExpenseListQuery {
    fn into_request(self) -> Result<ExpenseListRequest, AppError> {
        let page = parse_numeric("page", self.page)?;
        let page_size = parse_numeric("pageSize", self.page_size)?;
        Ok(ExpenseListRequest {
            category_id: self.category_id,
            month: self.month,
            page,
            page_size,
        })
    }
}

// Accepts any integer string; zero and negatives clamp to 1.
fn parse_numeric(field: &str, value: Option<String>) -> Result<Option<u32>, AppError> {
    match value {
        None => Ok(None),
        Some(raw) => {
            let parsed: i64 = raw
                .trim()
                .parse()
                .map_err(|_| AppError::validation(format!("{} must be numeric", field)))?;
            Ok(Some(parsed.clamp(1, u32::MAX as i64) as u32))
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct SummaryQuery {
    pub month: Option<String>,
}

/// Axum handler for POST /categories
pub async fn create_category(
    State(state): State<AppState>,
    Json(request): Json<CreateCategoryRequest>,
) -> Result<impl IntoResponse, AppError> {
    info!("POST /categories - name: {}", request.name);

    let category = state.categories.create(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok_with_message("Category created", category)),
    ))
}

/// Axum handler for GET /categories
pub async fn list_categories(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    info!("GET /categories");

    let categories = state.categories.find_all().await?;
    Ok((StatusCode::OK, Json(ApiResponse::ok(categories))))
}

/// Axum handler for POST /expenses/create-expense
pub async fn create_expense(
    State(state): State<AppState>,
    Json(request): Json<CreateExpenseRequest>,
) -> Result<impl IntoResponse, AppError> {
    info!("POST /expenses/create-expense - title: {}", request.title);

    let expense = state.expenses.create(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok_with_message("Expense created", expense)),
    ))
}

/// Axum handler for GET /expenses/get-all-expenses
pub async fn list_expenses(
    State(state): State<AppState>,
    Query(query): Query<ExpenseListQuery>,
) -> Result<impl IntoResponse, AppError> {
    info!("GET /expenses/get-all-expenses - query: {:?}", query);

    let request = query.into_request()?;
    let (data, meta) = state.expenses.find_filtered(request).await?;
    Ok((StatusCode::OK, Json(ApiResponse::page(data, meta))))
}

/// Axum handler for GET /reports/summary
pub async fn monthly_summary(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> Result<impl IntoResponse, AppError> {
    info!("GET /reports/summary - month: {:?}", query.month);

    let summary = state.reports.monthly_summary(query.month).await?;
    Ok((StatusCode::OK, Json(ApiResponse::ok(summary))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbConnection;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn test_router() -> Router {
        let db = DbConnection::init_test()
            .await
            .expect("Failed to create test database");
        let state = AppState::new(
            CategoryService::new(db.clone()),
            ExpenseService::new(db.clone()),
            ReportService::new(db),
        );
        app_router(state)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_create_category_returns_envelope() {
        let app = test_router().await;

        let response = app
            .oneshot(post_json("/categories", json!({"name": "Dining Out"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "Category created");
        assert_eq!(body["data"]["slug"], "dining-out");
    }

    #[tokio::test]
    async fn test_duplicate_category_conflicts() {
        let app = test_router().await;

        let first = app
            .clone()
            .oneshot(post_json("/categories", json!({"name": "Groceries"})))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);

        let second = app
            .oneshot(post_json("/categories", json!({"name": "Groceries"})))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);

        let body = body_json(second).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Category already exists");
    }

    #[tokio::test]
    async fn test_list_categories_sorted() {
        let app = test_router().await;

        for name in ["Travel", "Groceries"] {
            let response = app
                .clone()
                .oneshot(post_json("/categories", json!({ "name": name })))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let response = app.oneshot(get("/categories")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let names: Vec<&str> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["Groceries", "Travel"]);
    }

    #[tokio::test]
    async fn test_create_and_list_expenses_with_meta() {
        let app = test_router().await;

        for day in 1..=12 {
            let response = app
                .clone()
                .oneshot(post_json(
                    "/expenses/create-expense",
                    json!({
                        "title": format!("expense-{:02}", day),
                        "amount": 2.5,
                        "categoryId": "cat-1",
                        "date": format!("2025-10-{:02}", day),
                    }),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let response = app
            .oneshot(get("/expenses/get-all-expenses?page=2&pageSize=5"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["meta"]["page"], 2);
        assert_eq!(body["meta"]["pageSize"], 5);
        assert_eq!(body["meta"]["total"], 12);
        assert_eq!(body["meta"]["totalPages"], 3);
        assert_eq!(body["data"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_list_expenses_rejects_bad_month() {
        let app = test_router().await;

        let response = app
            .oneshot(get("/expenses/get-all-expenses?month=2025-13"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "month must be YYYY-MM");
    }

    #[tokio::test]
    async fn test_list_expenses_rejects_non_numeric_page() {
        let app = test_router().await;

        let response = app
            .oneshot(get("/expenses/get-all-expenses?page=two"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["message"], "page must be numeric");
    }

    #[tokio::test]
    async fn test_list_expenses_clamps_negative_page_params() {
        let app = test_router().await;

        let response = app
            .oneshot(get("/expenses/get-all-expenses?page=-1&pageSize=-5"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["meta"]["page"], 1);
        assert_eq!(body["meta"]["pageSize"], 1);
    }

    #[tokio::test]
    async fn test_list_expenses_survives_huge_page_number() {
        let app = test_router().await;

        let response = app
            .oneshot(get("/expenses/get-all-expenses?page=500000000&pageSize=10"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"].as_array().unwrap().len(), 0);
        assert_eq!(body["meta"]["page"], 500000000);
    }

    #[tokio::test]
    async fn test_summary_requires_month() {
        let app = test_router().await;

        let response = app.oneshot(get("/reports/summary")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["message"], "month is required as YYYY-MM");
    }

    #[tokio::test]
    async fn test_summary_flow() {
        let app = test_router().await;

        let created = app
            .clone()
            .oneshot(post_json("/categories", json!({"name": "Groceries"})))
            .await
            .unwrap();
        let category = body_json(created).await;
        let category_id = category["data"]["id"].as_str().unwrap().to_string();

        for amount in [10.0, 20.0] {
            let response = app
                .clone()
                .oneshot(post_json(
                    "/expenses/create-expense",
                    json!({
                        "title": "food",
                        "amount": amount,
                        "categoryId": category_id,
                        "date": "2025-10-05",
                    }),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let response = app
            .oneshot(get("/reports/summary?month=2025-10"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["month"], "2025-10");
        assert_eq!(body["data"]["total"], 30.0);

        let by_category = body["data"]["byCategory"].as_array().unwrap();
        assert_eq!(by_category.len(), 1);
        assert_eq!(by_category[0]["categoryName"], "Groceries");
        assert_eq!(by_category[0]["total"], 30.0);
    }

    #[tokio::test]
    async fn test_summary_empty_month() {
        let app = test_router().await;

        let response = app
            .oneshot(get("/reports/summary?month=2030-01"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["data"]["total"], 0.0);
        assert_eq!(body["data"]["byCategory"].as_array().unwrap().len(), 0);
    }
}

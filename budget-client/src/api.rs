//! REST transport for the BudgetBuddy backend.
//!
//! [`RestClient`] answers cache reads (as a [`QueryFetcher`]) and performs
//! the write requests behind every mutation (as a [`BudgetApi`]). Response
//! shapes are normalized here so cached payloads look the same whatever
//! variant the server sent.

use async_trait::async_trait;
use budget_cache::QueryFetcher;
use budget_core::{
    CacheKey, FetchError, GoalId, Payload, Resource, Transaction, TransactionId, TransactionPage,
};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, COOKIE};
use reqwest::multipart::{Form, Part};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use crate::config::{AuthConfig, ClientConfig};
use crate::error::ClientError;
use crate::keys;
use crate::mutations::{
    AccountUpdate, CsvFile, EmailUpdate, GoalInput, PasswordChange, TransactionInput,
};

/// Image shown for goals without an uploaded picture.
pub const DEFAULT_IMAGE: &str = "/assets/default.png";

/// Write operations of the backend, one per mutation kind.
///
/// Implementations return the decoded response body, or `Null` when the
/// server sent none.
#[async_trait]
pub trait BudgetApi: QueryFetcher {
    async fn update_account(&self, update: &AccountUpdate) -> Result<Payload, FetchError>;
    async fn add_transaction(&self, input: &TransactionInput) -> Result<Payload, FetchError>;
    async fn update_transaction(
        &self,
        id: TransactionId,
        input: &TransactionInput,
    ) -> Result<Payload, FetchError>;
    async fn delete_transaction(&self, id: TransactionId) -> Result<Payload, FetchError>;
    async fn delete_transactions(&self, ids: &[TransactionId]) -> Result<Payload, FetchError>;
    async fn upload_transactions(&self, file: &CsvFile) -> Result<Payload, FetchError>;
    async fn save_goal(&self, goal: &GoalInput) -> Result<Payload, FetchError>;
    async fn delete_goal(&self, id: GoalId) -> Result<Payload, FetchError>;
    async fn contribute_to_goal(&self, id: GoalId, amount: Decimal) -> Result<Payload, FetchError>;
    async fn update_email(&self, update: &EmailUpdate) -> Result<Payload, FetchError>;
    async fn change_password(&self, change: &PasswordChange) -> Result<Payload, FetchError>;
    async fn delete_account(&self) -> Result<Payload, FetchError>;
}

#[derive(Clone)]
pub struct RestClient {
    client: reqwest::Client,
    origin: String,
    auth_header: HeaderMap,
}

impl RestClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        let auth_header = build_auth_headers(&config.auth)?;
        Ok(Self {
            client,
            origin: config.api_base_url.trim_end_matches('/').to_string(),
            auth_header,
        })
    }

    /// Server origin without the `/api` suffix.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.origin, path)
    }

    async fn get_json(
        &self,
        path: &str,
        query: &[(&'static str, String)],
    ) -> Result<Payload, FetchError> {
        let request = self.client.get(self.url(path)).query(query);
        self.send(request, path).await
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        path: &str,
    ) -> Result<Payload, FetchError> {
        tracing::debug!(path, "Sending request");
        let response = request
            .headers(self.auth_header.clone())
            .send()
            .await
            .map_err(transport_error)?;
        self.parse_response(response, path).await
    }

    async fn parse_response(
        &self,
        response: reqwest::Response,
        path: &str,
    ) -> Result<Payload, FetchError> {
        let status = response.status();
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.contains("json"));
        let text = response.text().await.map_err(transport_error)?;

        if status.is_success() {
            decode_body(&text, is_json)
        } else {
            let err = FetchError::from_status(status.as_u16(), path, error_message(&text));
            tracing::warn!(path, status = status.as_u16(), error = %err, "Request rejected");
            Err(err)
        }
    }

    fn normalize(&self, resource: Resource, payload: Payload) -> Result<Payload, FetchError> {
        match resource {
            Resource::Transactions => normalize_page(payload),
            Resource::GoalStats => extract_goal_stats(payload),
            Resource::Goal => Ok(normalize_goal(payload, &self.origin)),
            _ => Ok(payload),
        }
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl QueryFetcher for RestClient {
    async fn fetch(&self, key: &CacheKey) -> Result<Payload, FetchError> {
        let request = read_request(key)?;
        let payload = self.get_json(&request.path, &request.query).await?;
        self.normalize(key.resource(), payload)
    }
}

#[async_trait]
impl BudgetApi for RestClient {
    async fn update_account(&self, update: &AccountUpdate) -> Result<Payload, FetchError> {
        let request = self.client.post(self.url("/account/update")).json(update);
        self.send(request, "/account/update").await
    }

    async fn add_transaction(&self, input: &TransactionInput) -> Result<Payload, FetchError> {
        let request = self.client.post(self.url("/transactions")).json(input);
        self.send(request, "/transactions").await
    }

    async fn update_transaction(
        &self,
        id: TransactionId,
        input: &TransactionInput,
    ) -> Result<Payload, FetchError> {
        let path = format!("/transactions/{}", id);
        let request = self.client.put(self.url(&path)).json(input);
        self.send(request, &path).await
    }

    async fn delete_transaction(&self, id: TransactionId) -> Result<Payload, FetchError> {
        let path = format!("/transactions/{}", id);
        let request = self.client.delete(self.url(&path));
        self.send(request, &path).await
    }

    async fn delete_transactions(&self, ids: &[TransactionId]) -> Result<Payload, FetchError> {
        let path = "/transactions/delete-selected";
        let request = self.client.delete(self.url(path)).json(ids);
        self.send(request, path).await
    }

    async fn upload_transactions(&self, file: &CsvFile) -> Result<Payload, FetchError> {
        let path = "/transactions/upload";
        let part = Part::bytes(file.contents.clone()).file_name(file.file_name.clone());
        let form = Form::new().part("files", part);
        let request = self.client.post(self.url(path)).multipart(form);
        self.send(request, path).await
    }

    async fn save_goal(&self, goal: &GoalInput) -> Result<Payload, FetchError> {
        let body = goal.body();
        let (path, request) = match goal.id {
            Some(id) => {
                let path = format!("/saving-goals/{}/update", id);
                let request = self.client.put(self.url(&path));
                (path, request)
            }
            None => {
                let path = "/saving-goals".to_string();
                let request = self.client.post(self.url(&path));
                (path, request)
            }
        };
        self.send(request.json(&body), &path).await
    }

    async fn delete_goal(&self, id: GoalId) -> Result<Payload, FetchError> {
        let path = format!("/saving-goals/{}/delete", id);
        let request = self.client.delete(self.url(&path));
        self.send(request, &path).await
    }

    async fn contribute_to_goal(&self, id: GoalId, amount: Decimal) -> Result<Payload, FetchError> {
        let path = format!("/saving-goals/{}/contribute", id);
        let body = serde_json::json!({ "contribution": amount });
        let request = self.client.put(self.url(&path)).json(&body);
        self.send(request, &path).await
    }

    async fn update_email(&self, update: &EmailUpdate) -> Result<Payload, FetchError> {
        let path = "/settings/update-email";
        let request = self.client.put(self.url(path)).json(update);
        self.send(request, path).await
    }

    async fn change_password(&self, change: &PasswordChange) -> Result<Payload, FetchError> {
        let path = "/settings/change-password";
        let request = self.client.put(self.url(path)).json(change);
        self.send(request, path).await
    }

    async fn delete_account(&self) -> Result<Payload, FetchError> {
        let path = "/settings/delete-account";
        let request = self.client.delete(self.url(path));
        self.send(request, path).await
    }
}

// ============================================================================
// READ DISPATCH
// ============================================================================

/// Path and query string of the GET answering one cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub path: String,
    pub query: Vec<(&'static str, String)>,
}

impl ReadRequest {
    fn get(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
        }
    }
}

pub fn read_request(key: &CacheKey) -> Result<ReadRequest, FetchError> {
    let request = match key.resource() {
        Resource::AccountBalance => {
            let (name, account_type) = keys::balance_params(key)?;
            ReadRequest {
                path: "/account/balance".to_string(),
                query: vec![
                    ("name", name),
                    ("accountType", account_type.as_api_str().to_string()),
                ],
            }
        }
        Resource::TotalBalance => ReadRequest::get("/dashboard/total-balance"),
        Resource::AccountsSummary => ReadRequest::get("/dashboard/accounts-summary"),
        Resource::NetWorth => ReadRequest::get("/dashboard/networth"),
        Resource::SpendingInsights => ReadRequest::get("/dashboard/spending-insights"),
        Resource::DashboardSavingGoals => ReadRequest::get("/dashboard/saving-goals"),
        Resource::IncomeExpenseSummary => ReadRequest::get("/dashboard/income-expense-summary"),
        Resource::IncomeTrend => ReadRequest::get("/dashboard/income-trend"),
        Resource::ExpenseAnalysis => ReadRequest::get("/dashboard/expense-analysis"),
        Resource::RecentTransactions => ReadRequest::get("/dashboard/recent-transactions"),
        Resource::Transactions => {
            let page = keys::page_request(key)?;
            ReadRequest {
                path: "/transactions/paginated".to_string(),
                query: vec![
                    ("page", page.page.to_string()),
                    ("size", page.size.to_string()),
                    ("sort", page.sort),
                ],
            }
        }
        Resource::GoalStats => ReadRequest::get("/saving-goals/stats"),
        Resource::PendingGoals => ReadRequest::get("/saving-goals/pending"),
        Resource::CompletedGoals => ReadRequest::get("/saving-goals/completed"),
        Resource::Goal => ReadRequest::get(format!("/saving-goals/{}", keys::goal_id(key)?)),
        Resource::CurrentEmail => ReadRequest::get("/settings/current-email"),
    };
    Ok(request)
}

// ============================================================================
// RESPONSE NORMALIZATION
// ============================================================================

#[derive(Deserialize)]
struct HalPage {
    #[serde(rename = "_embedded", default)]
    embedded: Option<HalEmbedded>,
    page: HalPageInfo,
}

#[derive(Deserialize)]
struct HalEmbedded {
    #[serde(rename = "transactionList", default)]
    transaction_list: Vec<Transaction>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HalPageInfo {
    total_pages: u32,
    total_elements: u64,
}

fn invalid_response(reason: impl Into<String>) -> FetchError {
    FetchError::InvalidResponse {
        reason: reason.into(),
    }
}

/// Accept both the plain `{content, totalPages, totalElements}` page and the
/// HAL form, and return the plain form.
pub fn normalize_page(payload: Payload) -> Result<Payload, FetchError> {
    let page = if payload.get("content").is_some() {
        serde_json::from_value::<TransactionPage>(payload)
            .map_err(|e| invalid_response(e.to_string()))?
    } else if payload.get("page").is_some() {
        let hal: HalPage =
            serde_json::from_value(payload).map_err(|e| invalid_response(e.to_string()))?;
        TransactionPage {
            // An empty result set has no `_embedded` at all.
            content: hal.embedded.map(|e| e.transaction_list).unwrap_or_default(),
            total_pages: hal.page.total_pages,
            total_elements: hal.page.total_elements,
        }
    } else {
        return Err(invalid_response("transaction page has neither content nor page"));
    };
    serde_json::to_value(page).map_err(|e| invalid_response(e.to_string()))
}

pub fn extract_goal_stats(payload: Payload) -> Result<Payload, FetchError> {
    match payload {
        Value::Object(mut fields) => fields
            .remove("goalStats")
            .ok_or_else(|| invalid_response("goal stats response has no goalStats")),
        list @ Value::Array(_) => Ok(list),
        other => Err(invalid_response(format!("unexpected goal stats: {}", other))),
    }
}

/// Turn the goal's `imageRef` into a URL the UI can load directly.
pub fn normalize_goal(mut payload: Payload, origin: &str) -> Payload {
    if let Value::Object(fields) = &mut payload {
        let image = match fields.get("imageRef").and_then(Value::as_str).map(str::trim) {
            Some(r) if r.starts_with("http") => r.to_string(),
            Some(r) if !r.is_empty() => format!("{}/{}", origin, r.trim_start_matches('/')),
            _ => DEFAULT_IMAGE.to_string(),
        };
        fields.insert("imageRef".to_string(), Value::String(image));
    }
    payload
}

/// Decode a success body. Some endpoints answer with plain text.
pub fn decode_body(text: &str, is_json: bool) -> Result<Payload, FetchError> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    match serde_json::from_str(text) {
        Ok(value) => Ok(value),
        Err(err) if is_json => Err(invalid_response(err.to_string())),
        Err(_) => Ok(Value::String(text.to_string())),
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// The server's `message` field when present, else the raw body.
pub fn error_message(text: &str) -> String {
    serde_json::from_str::<ErrorBody>(text)
        .ok()
        .and_then(|body| body.message)
        .unwrap_or_else(|| text.trim().to_string())
}

fn transport_error(err: reqwest::Error) -> FetchError {
    if err.is_decode() {
        invalid_response(err.to_string())
    } else {
        FetchError::Network {
            reason: err.to_string(),
        }
    }
}

fn build_auth_headers(auth: &AuthConfig) -> Result<HeaderMap, ClientError> {
    let mut headers = HeaderMap::new();
    if let Some(token) = auth.bearer_token.as_deref().filter(|t| !t.trim().is_empty()) {
        let value = format!("Bearer {}", token);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&value).map_err(|e| ClientError::Credentials(e.to_string()))?,
        );
    }
    if let Some(cookie) = auth.session_cookie.as_deref().filter(|c| !c.trim().is_empty()) {
        headers.insert(
            COOKIE,
            HeaderValue::from_str(cookie).map_err(|e| ClientError::Credentials(e.to_string()))?,
        );
    }
    Ok(headers)
}

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    pub page: i64,
    pub per_page: i64,
    pub total_items: i64,
    pub total_pages: i64,
    pub items: Vec<Value>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BatchResult {
    Ok { data: Value },
    Error { message: String },
    /// Position-preserving placeholder for an op that came after the one
    /// that failed the batch; it never ran, since the whole batch rolls
    /// back, but it still needs an entry so the response array lines up
    /// index-for-index with the request array.
    Skipped,
}

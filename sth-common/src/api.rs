//! Typed request/response pairs for the server's HTTP surface.
//!
//! The server's API is a collaborator contract: nothing here is
//! implemented by the harness, only asserted against. Each endpoint gets a
//! plain struct pair and a wrapper on [`NodeClient`] that forwards and
//! surfaces failures without adding logic.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::{FetchOptions, NodeClient};
use crate::errors::HarnessResult;

// ── Collections ──────────────────────────────────────────────────────────

/// One field of a collection schema. Field order is significant: the
/// server reports fields back in creation order and tests assert on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub facet: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub optional: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            facet: false,
            optional: false,
        }
    }

    #[must_use]
    pub fn faceted(mut self) -> Self {
        self.facet = true;
        self
    }
}

/// Request body for collection creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    pub fields: Vec<FieldSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_sorting_field: Option<String>,
}

/// Collection state as reported by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionResponse {
    pub name: String,
    pub fields: Vec<FieldSchema>,
    pub num_documents: u64,
    #[serde(default)]
    pub created_at: Option<u64>,
}

// ── Search ───────────────────────────────────────────────────────────────

/// Query parameters for a collection search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchQuery {
    pub q: String,
    pub query_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_page: Option<u32>,
}

impl SearchQuery {
    pub fn new(q: impl Into<String>, query_by: impl Into<String>) -> Self {
        Self {
            q: q.into(),
            query_by: query_by.into(),
            filter_by: None,
            sort_by: None,
            per_page: None,
        }
    }

    fn to_query_string(&self) -> String {
        let mut pairs = vec![
            format!("q={}", url_encode(&self.q)),
            format!("query_by={}", url_encode(&self.query_by)),
        ];
        if let Some(filter) = &self.filter_by {
            pairs.push(format!("filter_by={}", url_encode(filter)));
        }
        if let Some(sort) = &self.sort_by {
            pairs.push(format!("sort_by={}", url_encode(sort)));
        }
        if let Some(per_page) = self.per_page {
            pairs.push(format!("per_page={per_page}"));
        }
        pairs.join("&")
    }
}

/// Minimal percent-encoding for query values; the exercised queries only
/// need spaces, separators, and ASCII punctuation handled.
fn url_encode(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'*' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

/// Search hits as asserted by tests.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    pub found: u64,
    #[serde(default)]
    pub hits: Vec<Value>,
    #[serde(default)]
    pub page: u64,
}

/// One entry of a multi-search request.
#[derive(Debug, Clone, Serialize)]
pub struct MultiSearchEntry {
    pub collection: String,
    #[serde(flatten)]
    pub query: SearchQuery,
}

// ── Conversation models ──────────────────────────────────────────────────

/// Request body for conversation-model creation (remote embedding tests).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationModelSchema {
    pub id: String,
    pub model_name: String,
    pub api_key: String,
    pub history_collection: String,
    pub system_prompt: String,
    pub max_bytes: u64,
}

// ── Admin operations ─────────────────────────────────────────────────────

/// Result of administrative operations (`snapshot`, `vote`, cache clear).
#[derive(Debug, Clone, Deserialize)]
pub struct OperationResponse {
    pub success: bool,
}

/// Body of the health endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
}

// ── Endpoint wrappers ────────────────────────────────────────────────────

impl NodeClient {
    pub async fn health(&self) -> HarnessResult<HealthResponse> {
        self.fetch_typed("/health", &FetchOptions::get()).await
    }

    pub async fn create_collection(
        &self,
        schema: &CollectionSchema,
    ) -> HarnessResult<CollectionResponse> {
        let body = serde_json::to_value(schema).expect("collection schema serializes");
        self.fetch_typed("/collections", &FetchOptions::post(body))
            .await
    }

    pub async fn get_collection(&self, name: &str) -> HarnessResult<CollectionResponse> {
        self.fetch_typed(&format!("/collections/{name}"), &FetchOptions::get())
            .await
    }

    pub async fn delete_collection(&self, name: &str) -> HarnessResult<Value> {
        self.fetch(&format!("/collections/{name}"), &FetchOptions::delete())
            .await
    }

    /// Index a single document.
    pub async fn index_document(&self, collection: &str, document: &Value) -> HarnessResult<Value> {
        self.fetch(
            &format!("/collections/{collection}/documents"),
            &FetchOptions::post(document.clone()),
        )
        .await
    }

    /// Import documents as JSONL, `batch_size` lines per request.
    pub async fn import_documents(
        &self,
        collection: &str,
        documents: &[Value],
        batch_size: u32,
    ) -> HarnessResult<()> {
        for chunk in documents.chunks(batch_size.max(1) as usize) {
            let body = chunk
                .iter()
                .map(|doc| serde_json::to_string(doc).expect("document serializes"))
                .collect::<Vec<_>>()
                .join("\n");
            self.fetch_raw_body(
                &format!("/collections/{collection}/documents/import?action=create"),
                body,
            )
            .await?;
        }
        Ok(())
    }

    pub async fn get_document(&self, collection: &str, id: &str) -> HarnessResult<Value> {
        self.fetch(
            &format!("/collections/{collection}/documents/{id}"),
            &FetchOptions::get(),
        )
        .await
    }

    pub async fn search(
        &self,
        collection: &str,
        query: &SearchQuery,
    ) -> HarnessResult<SearchResponse> {
        self.fetch_typed(
            &format!(
                "/collections/{collection}/documents/search?{}",
                query.to_query_string()
            ),
            &FetchOptions::get(),
        )
        .await
    }

    pub async fn multi_search(&self, searches: &[MultiSearchEntry]) -> HarnessResult<Value> {
        let body = serde_json::json!({ "searches": searches });
        self.fetch("/multi_search", &FetchOptions::post(body)).await
    }

    pub async fn upsert_analytics_rule(&self, name: &str, rule: &Value) -> HarnessResult<Value> {
        self.fetch(
            &format!("/analytics/rules/{name}"),
            &FetchOptions {
                method: reqwest::Method::PUT,
                body: Some(rule.clone()),
                headers: Vec::new(),
            },
        )
        .await
    }

    pub async fn post_analytics_event(&self, event: &Value) -> HarnessResult<Value> {
        self.fetch("/analytics/events", &FetchOptions::post(event.clone()))
            .await
    }

    pub async fn upsert_synonym_set(
        &self,
        collection: &str,
        name: &str,
        synonyms: &Value,
    ) -> HarnessResult<Value> {
        self.fetch(
            &format!("/collections/{collection}/synonyms/{name}"),
            &FetchOptions {
                method: reqwest::Method::PUT,
                body: Some(synonyms.clone()),
                headers: Vec::new(),
            },
        )
        .await
    }

    pub async fn upsert_override(
        &self,
        collection: &str,
        name: &str,
        override_rule: &Value,
    ) -> HarnessResult<Value> {
        self.fetch(
            &format!("/collections/{collection}/overrides/{name}"),
            &FetchOptions {
                method: reqwest::Method::PUT,
                body: Some(override_rule.clone()),
                headers: Vec::new(),
            },
        )
        .await
    }

    pub async fn create_conversation_model(
        &self,
        model: &ConversationModelSchema,
    ) -> HarnessResult<Value> {
        let body = serde_json::to_value(model).expect("conversation model serializes");
        self.fetch("/conversations/models", &FetchOptions::post(body))
            .await
    }

    /// Trigger a snapshot into `destination`, awaiting server completion.
    pub async fn snapshot(&self, destination: &str) -> HarnessResult<OperationResponse> {
        self.fetch_typed(
            &format!(
                "/operations/snapshot?snapshot_path={}",
                url_encode(destination)
            ),
            &FetchOptions::post(Value::Null),
        )
        .await
    }

    /// Trigger a leadership vote (cluster administration).
    pub async fn vote(&self) -> HarnessResult<OperationResponse> {
        self.fetch_typed("/operations/vote", &FetchOptions::post(Value::Null))
            .await
    }

    pub async fn clear_cache(&self) -> HarnessResult<OperationResponse> {
        self.fetch_typed("/operations/cache/clear", &FetchOptions::post(Value::Null))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_schema_serializes_minimal() {
        let field = FieldSchema::new("company_name", "string");
        let json = serde_json::to_value(&field).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "company_name", "type": "string"})
        );
    }

    #[test]
    fn test_field_schema_facet_survives_round_trip() {
        let field = FieldSchema::new("country", "string").faceted();
        let json = serde_json::to_string(&field).unwrap();
        let back: FieldSchema = serde_json::from_str(&json).unwrap();
        assert!(back.facet);
        assert_eq!(back, field);
    }

    #[test]
    fn test_collection_schema_preserves_field_order() {
        let schema = CollectionSchema {
            name: "companies".into(),
            fields: vec![
                FieldSchema::new("company_name", "string"),
                FieldSchema::new("num_employees", "int32"),
                FieldSchema::new("country", "string").faceted(),
            ],
            default_sorting_field: None,
        };
        let json = serde_json::to_value(&schema).unwrap();
        let names: Vec<&str> = json["fields"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, ["company_name", "num_employees", "country"]);
    }

    #[test]
    fn test_search_query_string() {
        let query = SearchQuery {
            q: "stark industries".into(),
            query_by: "company_name".into(),
            filter_by: Some("num_employees:>100".into()),
            sort_by: None,
            per_page: Some(10),
        };
        let qs = query.to_query_string();
        assert!(qs.starts_with("q=stark%20industries&query_by=company_name"));
        assert!(qs.contains("filter_by=num_employees%3A%3E100"));
        assert!(qs.ends_with("per_page=10"));
    }

    #[test]
    fn test_url_encode_passthrough_and_escaping() {
        assert_eq!(url_encode("abc-123_~.*"), "abc-123_~.*");
        assert_eq!(url_encode("a b"), "a%20b");
        assert_eq!(url_encode("/x"), "%2Fx");
    }
}

// rest.rs — REST adapter for the managed vector index (Pinecone-style data
// plane: /vectors/upsert, /query, /describe_index_stats).
//
// Credentials come from the environment and are checked at first use, not at
// process start, so the service can boot and report health before the
// deployment is fully wired.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{json, Value};

use crate::config;
use crate::error::Error;
use crate::store::{check_dimension, clamp_limit, SearchHit, VectorIndex};

pub struct RestVectorStore {
    host: String,
    api_key: String,
    index_name: String,
    dimension: usize,
}

impl RestVectorStore {
    /// Build from deployment environment. Missing host or key is a
    /// `Configuration` error naming the variable.
    pub fn from_env() -> Result<Self, Error> {
        let host = require_env(config::store::INDEX_HOST_ENV)?;
        let api_key = require_env(config::store::API_KEY_ENV)?;
        let index_name = std::env::var(config::store::INDEX_NAME_ENV)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| config::store::DEFAULT_INDEX_NAME.to_string());
        Ok(Self::new(host, api_key, index_name))
    }

    pub fn new(host: String, api_key: String, index_name: String) -> Self {
        Self {
            host: host.trim_end_matches('/').to_string(),
            api_key,
            index_name,
            dimension: config::embedding::EMBEDDING_DIMS,
        }
    }

    fn post(&self, path: &str, body: &Value) -> Result<Value, Error> {
        let url = format!("{}/{}", self.host, path);
        let result = ureq::post(&url)
            .set("Api-Key", &self.api_key)
            .timeout(Duration::from_secs(config::store::REQUEST_TIMEOUT_SECS))
            .send_json(body);

        match result {
            Ok(resp) => resp.into_json::<Value>().map_err(|e| {
                Error::StoreUnavailable(format!("invalid response from {path}: {e}"))
            }),
            Err(ureq::Error::Status(status, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                Err(Error::StoreUnavailable(format!(
                    "index '{}' {path} returned HTTP {status}: {}",
                    self.index_name,
                    snippet(&body)
                )))
            }
            Err(e) => Err(Error::StoreUnavailable(format!(
                "index '{}' {path} request failed: {e}",
                self.index_name
            ))),
        }
    }
}

impl VectorIndex for RestVectorStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn upsert(
        &self,
        id: &str,
        vector: &[f32],
        metadata: &HashMap<String, String>,
    ) -> Result<(), Error> {
        check_dimension(self.dimension, vector.len())?;
        let body = upsert_body(id, vector, metadata);
        self.post("vectors/upsert", &body)?;
        log::info!("upserted item {} into index '{}'", id, self.index_name);
        Ok(())
    }

    fn query(
        &self,
        vector: &[f32],
        limit: usize,
        filter: Option<&Value>,
    ) -> Result<Vec<SearchHit>, Error> {
        check_dimension(self.dimension, vector.len())?;
        let top_k = clamp_limit(limit);
        let body = query_body(vector, top_k, filter);
        let response = self.post("query", &body)?;
        let hits = parse_matches(&response)?;
        log::info!(
            "query against index '{}' returned {} of up to {} results",
            self.index_name,
            hits.len(),
            top_k
        );
        Ok(hits)
    }

    fn is_reachable(&self) -> bool {
        self.post("describe_index_stats", &json!({})).is_ok()
    }
}

fn require_env(name: &str) -> Result<String, Error> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Configuration(format!("{name} is not set")))
}

fn upsert_body(id: &str, vector: &[f32], metadata: &HashMap<String, String>) -> Value {
    json!({
        "vectors": [{
            "id": id,
            "values": vector,
            "metadata": metadata,
        }]
    })
}

fn query_body(vector: &[f32], top_k: usize, filter: Option<&Value>) -> Value {
    let mut body = json!({
        "vector": vector,
        "topK": top_k,
        "includeMetadata": true,
    });
    if let Some(f) = filter {
        body["filter"] = f.clone();
    }
    body
}

fn parse_matches(response: &Value) -> Result<Vec<SearchHit>, Error> {
    let matches = response
        .get("matches")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::StoreUnavailable("query response has no matches field".into()))?;

    matches
        .iter()
        .map(|m| {
            let id = m
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::StoreUnavailable("match without id in response".into()))?;
            let score = m.get("score").and_then(Value::as_f64).unwrap_or(0.0) as f32;
            Ok(SearchHit {
                id: id.to_string(),
                score,
            })
        })
        .collect()
}

fn snippet(body: &str) -> &str {
    let max = config::store::ERROR_BODY_SNIPPET_BYTES;
    match body.char_indices().nth(max) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_body_shape() {
        let mut metadata = HashMap::new();
        metadata.insert("type".to_string(), "image".to_string());
        metadata.insert("name".to_string(), "sofa.jpg".to_string());

        let body = upsert_body("item-1", &[0.5, -0.5], &metadata);
        let vectors = body["vectors"].as_array().expect("vectors array");
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0]["id"], "item-1");
        assert_eq!(vectors[0]["values"].as_array().expect("values").len(), 2);
        assert_eq!(vectors[0]["metadata"]["type"], "image");
    }

    #[test]
    fn test_query_body_includes_filter_only_when_given() {
        let plain = query_body(&[1.0], 5, None);
        assert_eq!(plain["topK"], 5);
        assert_eq!(plain["includeMetadata"], true);
        assert!(plain.get("filter").is_none());

        let filter = json!({"type": {"$eq": "image"}});
        let filtered = query_body(&[1.0], 5, Some(&filter));
        assert_eq!(filtered["filter"], filter);
    }

    #[test]
    fn test_parse_matches_preserves_store_order() {
        let response = json!({
            "matches": [
                {"id": "b", "score": 0.91, "metadata": {"type": "text"}},
                {"id": "a", "score": 0.40},
            ]
        });
        let hits = parse_matches(&response).expect("parse");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "b");
        assert!((hits[0].score - 0.91).abs() < 1e-6);
        assert_eq!(hits[1].id, "a");
    }

    #[test]
    fn test_parse_matches_rejects_malformed_response() {
        assert!(matches!(
            parse_matches(&json!({"results": []})),
            Err(Error::StoreUnavailable(_))
        ));
        assert!(matches!(
            parse_matches(&json!({"matches": [{"score": 1.0}]})),
            Err(Error::StoreUnavailable(_))
        ));
    }

    #[test]
    fn test_snippet_truncates_long_bodies() {
        let long = "x".repeat(10_000);
        assert_eq!(
            snippet(&long).len(),
            config::store::ERROR_BODY_SNIPPET_BYTES
        );
        assert_eq!(snippet("short"), "short");
    }
}

//! Memory retrieval
//!
//! Queries the vector similarity store for prior failures similar to the
//! current prompt and folds them into a single advisory string for the
//! architect. This stage is advisory only: an unreachable or empty store
//! yields an empty string, never an error, so it can never stall a job.

use crate::config::MemoryConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// Width of the deterministic local embedding
pub const EMBEDDING_DIM: usize = 64;

/// Payload stored alongside each vector point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryPayload {
    pub prompt: String,
    pub score: i64,
    pub recommendation: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// One point in the vector store
#[derive(Debug, Clone, Serialize)]
pub struct MemoryEntry {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: MemoryPayload,
}

/// A search hit with its similarity score
#[derive(Debug, Clone, Deserialize)]
pub struct ScoredMemory {
    pub score: f32,
    pub payload: MemoryPayload,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    score: f32,
    payload: Option<MemoryPayload>,
}

/// Deterministic local embedding: hashed bag-of-words projected into a
/// fixed-width unit vector. Good enough for similarity of short prompts
/// without an embedding-model dependency.
pub fn embed(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; EMBEDDING_DIM];
    for word in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let digest = Sha256::digest(word.as_bytes());
        let bucket = (digest[0] as usize) % EMBEDDING_DIM;
        let sign = if digest[1] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

/// Client for the qdrant-style vector store REST surface
pub struct MemoryClient {
    http: reqwest::Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
    config: MemoryConfig,
}

impl MemoryClient {
    pub fn new(
        base_url: String,
        collection: String,
        api_key: Option<String>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            collection,
            api_key,
            config,
        }
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.timeout(Duration::from_secs(5));
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    /// Top-K nearest entries for a vector. Errors are surfaced to the
    /// caller; `retrieve_advisory` is the lossy wrapper.
    pub async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredMemory>, reqwest::Error> {
        let url = format!(
            "{}/collections/{}/points/search",
            self.base_url, self.collection
        );
        let response = self
            .request(self.http.post(&url))
            .json(&json!({
                "vector": vector,
                "limit": top_k,
                "with_payload": true,
            }))
            .send()
            .await?
            .error_for_status()?;

        let body: SearchResponse = response.json().await?;
        Ok(body
            .result
            .into_iter()
            .filter_map(|hit| {
                hit.payload.map(|payload| ScoredMemory {
                    score: hit.score,
                    payload,
                })
            })
            .collect())
    }

    /// Append one entry; failures are logged by callers, never fatal
    pub async fn upsert(&self, entry: MemoryEntry) -> Result<(), reqwest::Error> {
        let url = format!("{}/collections/{}/points", self.base_url, self.collection);
        self.request(self.http.put(&url))
            .json(&json!({
                "points": [{
                    "id": entry.id,
                    "vector": entry.vector,
                    "payload": entry.payload,
                }]
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Build the advisory string for a prompt: nearest prior failures above
    /// the similarity threshold, one line each, capped at the character
    /// budget. Returns an empty string when the store is unreachable or
    /// nothing relevant is found.
    pub async fn retrieve_advisory(&self, prompt: &str) -> String {
        let vector = embed(prompt);
        let hits = match self.search(&vector, self.config.top_k).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!("Memory store unreachable, continuing without advisory: {}", e);
                return String::new();
            }
        };

        let lines: Vec<String> = hits
            .iter()
            .filter(|hit| hit.score >= self.config.similarity_threshold)
            .map(|hit| format!("[{}] {}", hit.payload.recommendation, hit.payload.reason))
            .collect();

        truncate_to_budget(lines.join("\n"), self.config.char_budget)
    }
}

fn truncate_to_budget(mut advisory: String, budget: usize) -> String {
    if advisory.chars().count() > budget {
        advisory = advisory.chars().take(budget).collect();
    }
    advisory
}

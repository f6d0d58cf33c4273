//! Hosted vector search (Pinecone REST).
//!
//! The control plane lists and creates serverless indexes and reports the
//! data-plane host of each index. Upserts and queries go to that host.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::{EndpointsConfig, VectorIndexConfig};
use crate::models::{VectorMatch, VectorRecord};

const API_VERSION: &str = "2024-07";

/// Records per upsert request.
const UPSERT_BATCH: usize = 100;

/// Similarity search over stored vectors.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize>;
    async fn query(&self, vector: &[f32], top_k: usize, include_metadata: bool)
        -> Result<Vec<VectorMatch>>;
}

#[derive(Clone)]
pub struct PineconeIndex {
    client: reqwest::Client,
    api_key: String,
    host: String,
}

#[derive(Deserialize)]
struct IndexList {
    #[serde(default)]
    indexes: Vec<IndexDescription>,
}

#[derive(Deserialize)]
struct IndexDescription {
    name: String,
    #[serde(default)]
    host: Option<String>,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<VectorMatch>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

fn data_plane_url(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

impl PineconeIndex {
    /// Connects to `name`, creating the index when it does not exist and
    /// `create_if_missing` is set. A configured `host` skips the control plane.
    pub async fn ensure_index(
        endpoints: &EndpointsConfig,
        config: &VectorIndexConfig,
        api_key: String,
        name: &str,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(endpoints.timeout_secs))
            .build()?;

        if let Some(host) = &config.host {
            return Ok(Self {
                client,
                api_key,
                host: data_plane_url(host),
            });
        }

        let control = endpoints.pinecone_control.trim_end_matches('/');

        let list: IndexList = client
            .get(format!("{}/indexes", control))
            .header("Api-Key", &api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .send()
            .await
            .context("Failed to list indexes")?
            .error_for_status()?
            .json()
            .await?;

        let existing = list.indexes.into_iter().find(|i| i.name == name);

        let host = match existing.and_then(|i| i.host) {
            Some(host) => host,
            None => {
                if !config.create_if_missing {
                    bail!("Vector index '{}' does not exist", name);
                }
                tracing::info!(index = name, dimension = config.dimension, "creating vector index");
                let body = serde_json::json!({
                    "name": name,
                    "dimension": config.dimension,
                    "metric": config.metric,
                    "spec": {
                        "serverless": { "cloud": config.cloud, "region": config.region }
                    }
                });
                let resp = client
                    .post(format!("{}/indexes", control))
                    .header("Api-Key", &api_key)
                    .header("X-Pinecone-API-Version", API_VERSION)
                    .json(&body)
                    .send()
                    .await
                    .context("Failed to create index")?;
                // 409: created concurrently by another process.
                if !resp.status().is_success() && resp.status().as_u16() != 409 {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    bail!("Index creation failed {}: {}", status, text);
                }

                let described: IndexDescription = client
                    .get(format!("{}/indexes/{}", control, name))
                    .header("Api-Key", &api_key)
                    .header("X-Pinecone-API-Version", API_VERSION)
                    .send()
                    .await
                    .context("Failed to describe index")?
                    .error_for_status()?
                    .json()
                    .await?;
                described
                    .host
                    .ok_or_else(|| anyhow::anyhow!("Index '{}' has no host yet", name))?
            }
        };

        Ok(Self {
            client,
            api_key,
            host: data_plane_url(&host),
        })
    }

    async fn upsert_batch(&self, batch: &[VectorRecord]) -> Result<usize> {
        let body = serde_json::json!({ "vectors": batch });
        let resp = self
            .client
            .post(format!("{}/vectors/upsert", self.host))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(&body)
            .send()
            .await
            .context("Upsert request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("Upsert failed {}: {}", status, text);
        }
        let parsed: UpsertResponse = resp.json().await.unwrap_or(UpsertResponse {
            upserted_count: batch.len(),
        });
        Ok(parsed.upserted_count)
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize> {
        let mut upserted = 0;
        for batch in records.chunks(UPSERT_BATCH) {
            upserted += self.upsert_batch(batch).await?;
        }
        Ok(upserted)
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<VectorMatch>> {
        let body = serde_json::json!({
            "vector": vector,
            "topK": top_k,
            "includeMetadata": include_metadata,
        });
        let resp = self
            .client
            .post(format!("{}/query", self.host))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(&body)
            .send()
            .await
            .context("Query request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("Query failed {}: {}", status, text);
        }
        let parsed: QueryResponse = resp.json().await.context("Invalid query response")?;
        Ok(parsed.matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn endpoints(base: &str) -> EndpointsConfig {
        EndpointsConfig {
            pinecone_control: base.to_string(),
            timeout_secs: 5,
            ..Default::default()
        }
    }

    #[test]
    fn host_gets_https_scheme() {
        assert_eq!(data_plane_url("idx-abc.svc.pinecone.io"), "https://idx-abc.svc.pinecone.io");
        assert_eq!(data_plane_url("http://127.0.0.1:9/"), "http://127.0.0.1:9");
    }

    #[tokio::test]
    async fn creates_missing_index_then_queries() {
        let server = MockServer::start();
        let host = server.base_url();

        server.mock(|when, then| {
            when.method(GET).path("/indexes").header("api-key", "pk");
            then.status(200).json_body(serde_json::json!({ "indexes": [] }));
        });
        let create = server.mock(|when, then| {
            when.method(POST)
                .path("/indexes")
                .body_includes("\"dimension\":1536")
                .body_includes("us-east-1");
            then.status(201).json_body(serde_json::json!({}));
        });
        server.mock(|when, then| {
            when.method(GET).path("/indexes/regs");
            then.status(200)
                .json_body(serde_json::json!({ "name": "regs", "host": host }));
        });
        server.mock(|when, then| {
            when.method(POST).path("/query").body_includes("\"topK\":5");
            then.status(200).json_body(serde_json::json!({
                "matches": [
                    { "id": "parsed_pdfs/a.json", "score": 0.8, "metadata": { "content": "x" } }
                ]
            }));
        });

        let index = PineconeIndex::ensure_index(
            &endpoints(&server.base_url()),
            &VectorIndexConfig::default(),
            "pk".into(),
            "regs",
        )
        .await
        .unwrap();
        assert_eq!(create.calls(), 1);

        let matches = index.query(&[0.1, 0.2], 5, true).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].content(), Some("x"));
    }

    #[tokio::test]
    async fn upsert_sends_vectors() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/vectors/upsert")
                .body_includes("\"id\":\"parsed_pdfs/a.json\"");
            then.status(200)
                .json_body(serde_json::json!({ "upsertedCount": 1 }));
        });

        let config = VectorIndexConfig {
            host: Some(server.base_url()),
            ..Default::default()
        };
        let index = PineconeIndex::ensure_index(&endpoints("http://unused"), &config, "pk".into(), "regs")
            .await
            .unwrap();
        let n = index
            .upsert(&[VectorRecord {
                id: "parsed_pdfs/a.json".into(),
                values: vec![0.5],
                metadata: serde_json::json!({ "pdf_file": "parsed_pdfs/a.json", "content": "c" }),
            }])
            .await
            .unwrap();
        assert_eq!(n, 1);
        mock.assert();
    }

    #[tokio::test]
    async fn upsert_splits_into_batches() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/vectors/upsert");
            then.status(200).json_body(serde_json::json!({ "upsertedCount": 100 }));
        });

        let config = VectorIndexConfig {
            host: Some(server.base_url()),
            ..Default::default()
        };
        let index = PineconeIndex::ensure_index(&endpoints("http://unused"), &config, "pk".into(), "regs")
            .await
            .unwrap();
        let records: Vec<VectorRecord> = (0..250)
            .map(|i| VectorRecord {
                id: format!("parsed_pdfs/{}.json", i),
                values: vec![0.1],
                metadata: serde_json::json!({}),
            })
            .collect();

        assert_eq!(index.upsert(&records).await.unwrap(), 300);
        mock.assert_calls(3);
        assert_eq!(index.upsert(&[]).await.unwrap(), 0);
        mock.assert_calls(3);
    }
}

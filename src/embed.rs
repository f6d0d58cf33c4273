//! The `embed` pipeline step: parsed regulation JSON → vector index.
//!
//! Each document is truncated, split into word windows, and every window
//! embedded separately. The document vector is the element-wise mean of
//! the window vectors; windows that fail to embed are left out.

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::chunk::{split_words, truncate_chars};
use crate::config::EmbeddingConfig;
use crate::embedding::{mean_vector, EmbeddingProvider};
use crate::models::VectorRecord;
use crate::storage::ObjectStore;
use crate::vector_index::VectorIndex;

#[derive(Debug, Deserialize)]
struct ParsedDocument {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EmbedStats {
    pub found: usize,
    pub embedded: usize,
    pub skipped: usize,
}

/// Mean embedding of `text`, or `None` when no window could be embedded.
pub async fn embed_document(
    embedder: &dyn EmbeddingProvider,
    text: &str,
    config: &EmbeddingConfig,
) -> Option<Vec<f32>> {
    let truncated = truncate_chars(text, config.max_chars);
    let mut vectors = Vec::new();
    for chunk in split_words(truncated, config.max_tokens) {
        match embedder.embed_texts(std::slice::from_ref(&chunk)).await {
            Ok(mut batch) if !batch.is_empty() => vectors.push(batch.swap_remove(0)),
            Ok(_) => tracing::warn!("embedding response was empty"),
            Err(e) => tracing::warn!(error = %e, "chunk embedding failed"),
        }
    }
    mean_vector(&vectors)
}

async fn load_content(store: &dyn ObjectStore, key: &str) -> Result<String> {
    let bytes = store.get_object(key).await?;
    let doc: ParsedDocument =
        serde_json::from_slice(&bytes).with_context(|| format!("{} is not parsed JSON", key))?;
    Ok(doc.content)
}

pub async fn embed_parsed_documents(
    store: &dyn ObjectStore,
    embedder: &dyn EmbeddingProvider,
    index: &dyn VectorIndex,
    parsed_prefix: &str,
    config: &EmbeddingConfig,
) -> Result<EmbedStats> {
    let keys: Vec<String> = store
        .list_keys(parsed_prefix, &[])
        .await?
        .into_iter()
        .filter(|k| k.ends_with(".json"))
        .collect();

    let mut stats = EmbedStats {
        found: keys.len(),
        ..Default::default()
    };

    for key in &keys {
        let content = match load_content(store, key).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "could not read parsed document");
                stats.skipped += 1;
                continue;
            }
        };
        if content.trim().is_empty() {
            tracing::info!(key = %key, "empty document skipped");
            stats.skipped += 1;
            continue;
        }

        let Some(values) = embed_document(embedder, &content, config).await else {
            tracing::warn!(key = %key, "no embeddings generated");
            stats.skipped += 1;
            continue;
        };

        let record = VectorRecord {
            id: key.clone(),
            values,
            metadata: serde_json::json!({
                "pdf_file": key,
                "content": truncate_chars(&content, config.preview_chars),
            }),
        };
        match index.upsert(std::slice::from_ref(&record)).await {
            Ok(_) => {
                tracing::info!(key = %key, "embedding upserted");
                stats.embedded += 1;
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "upsert failed");
                stats.skipped += 1;
            }
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VectorMatch;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        objects: Mutex<HashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn list_keys(&self, prefix: &str, _: &[String]) -> Result<Vec<String>> {
            let mut keys: Vec<String> = self
                .objects
                .lock()
                .unwrap()
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect();
            keys.sort();
            Ok(keys)
        }
        async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
            self.objects
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no such key"))
        }
        async fn put_object(&self, key: &str, body: Vec<u8>, _: &str) -> Result<()> {
            self.objects.lock().unwrap().insert(key.to_string(), body);
            Ok(())
        }
    }

    /// Embeds a window as `[word count, 1.0]`; fails on windows containing "boom".
    struct CountingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for CountingEmbedder {
        fn model_name(&self) -> &str {
            "counting"
        }
        async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            texts
                .iter()
                .map(|t| {
                    if t.contains("boom") {
                        anyhow::bail!("rejected");
                    }
                    Ok(vec![t.split(' ').count() as f32, 1.0])
                })
                .collect()
        }
    }

    #[derive(Default)]
    struct RecordingIndex {
        records: Mutex<Vec<VectorRecord>>,
    }

    #[async_trait]
    impl VectorIndex for RecordingIndex {
        async fn upsert(&self, records: &[VectorRecord]) -> Result<usize> {
            self.records.lock().unwrap().extend(records.iter().cloned());
            Ok(records.len())
        }
        async fn query(&self, _: &[f32], _: usize, _: bool) -> Result<Vec<VectorMatch>> {
            Ok(vec![])
        }
    }

    fn put(store: &MemoryStore, key: &str, content: &str) {
        let body = serde_json::to_vec(&serde_json::json!({ "content": content })).unwrap();
        store
            .objects
            .lock()
            .unwrap()
            .insert(key.to_string(), body);
    }

    #[tokio::test]
    async fn averages_windows_and_skips_failures() {
        let config = EmbeddingConfig {
            max_tokens: 2,
            ..Default::default()
        };
        // windows: "a b" (2), "c boom" (fails), "d" (1)
        let v = embed_document(&CountingEmbedder, "a b c boom d", &config)
            .await
            .unwrap();
        assert_eq!(v, vec![1.5, 1.0]);
    }

    #[tokio::test]
    async fn every_window_failing_gives_none() {
        let v = embed_document(&CountingEmbedder, "boom", &EmbeddingConfig::default()).await;
        assert!(v.is_none());
    }

    #[tokio::test]
    async fn upserts_json_documents_with_preview() {
        let store = MemoryStore::default();
        let long = "word ".repeat(200);
        put(&store, "parsed_pdfs/Food_Code.json", &long);
        put(&store, "parsed_pdfs/Empty.json", "   ");
        put(&store, "parsed_pdfs/notes.txt", "ignored");
        store
            .objects
            .lock()
            .unwrap()
            .insert("parsed_pdfs/Broken.json".into(), b"{not json".to_vec());

        let index = RecordingIndex::default();
        let stats = embed_parsed_documents(
            &store,
            &CountingEmbedder,
            &index,
            "parsed_pdfs/",
            &EmbeddingConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(
            stats,
            EmbedStats {
                found: 3,
                embedded: 1,
                skipped: 2
            }
        );
        let records = index.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "parsed_pdfs/Food_Code.json");
        assert_eq!(records[0].metadata["pdf_file"], "parsed_pdfs/Food_Code.json");
        let preview = records[0].metadata["content"].as_str().unwrap();
        assert_eq!(preview.chars().count(), 500);
    }
}

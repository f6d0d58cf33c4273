//! PDF text extraction and the `extract` pipeline step.
//!
//! Every `.pdf` object under the regulations prefix is read, its text
//! extracted with `pdf-extract`, and `{"content": <text>}` written to
//! `<parsed prefix><name>.json`.

use crate::storage::ObjectStore;

/// Extraction failure for a single document. The pipeline logs it and
/// moves on.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),
    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Concatenated text of every page.
pub fn extract_pdf_text(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

/// `regulations/Food_Code.pdf` → `<target_prefix>Food_Code.json`.
pub fn json_key_for(pdf_key: &str, target_prefix: &str) -> String {
    let file_name = pdf_key.rsplit('/').next().unwrap_or(pdf_key);
    let stem = file_name.strip_suffix(".pdf").unwrap_or(file_name);
    format!("{}{}.json", target_prefix, stem)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractStats {
    pub found: usize,
    pub written: usize,
    pub failed: usize,
}

async fn extract_one(
    store: &dyn ObjectStore,
    pdf_key: &str,
    target_prefix: &str,
) -> Result<String, ExtractError> {
    let bytes = store
        .get_object(pdf_key)
        .await
        .map_err(ExtractError::Storage)?;

    // pdf-extract can panic on malformed input; keep that off the runtime.
    let text = tokio::task::spawn_blocking(move || extract_pdf_text(&bytes))
        .await
        .map_err(|e| ExtractError::Pdf(e.to_string()))??;

    let json_key = json_key_for(pdf_key, target_prefix);
    let body = serde_json::to_vec(&serde_json::json!({ "content": text }))?;
    store
        .put_object(&json_key, body, "application/json")
        .await
        .map_err(ExtractError::Storage)?;
    Ok(json_key)
}

pub async fn extract_text_from_pdfs(
    store: &dyn ObjectStore,
    source_prefix: &str,
    target_prefix: &str,
) -> anyhow::Result<ExtractStats> {
    let keys: Vec<String> = store
        .list_keys(source_prefix, &[])
        .await?
        .into_iter()
        .filter(|k| k.ends_with(".pdf"))
        .collect();

    let mut stats = ExtractStats {
        found: keys.len(),
        ..Default::default()
    };
    if keys.is_empty() {
        tracing::info!(prefix = source_prefix, "no PDFs found");
        return Ok(stats);
    }

    for key in &keys {
        tracing::info!(key = %key, "extracting");
        match extract_one(store, key, target_prefix).await {
            Ok(json_key) => {
                tracing::info!(key = %json_key, "extracted text uploaded");
                stats.written += 1;
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "extraction failed");
                stats.failed += 1;
            }
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_key_uses_file_stem() {
        assert_eq!(
            json_key_for("regulations/105_CMR_590.pdf", "parsed_pdfs/"),
            "parsed_pdfs/105_CMR_590.json"
        );
        assert_eq!(
            json_key_for("regulations/Page_print.pdf", "parsed_pdfs/"),
            "parsed_pdfs/Page_print.json"
        );
    }

    #[test]
    fn garbage_is_a_pdf_error() {
        let err = extract_pdf_text(b"not a pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }
}

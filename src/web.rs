//! Web search, page snippets and article metadata.

use anyhow::{bail, Context, Result};
use regex::Regex;
use std::collections::HashMap;
use std::time::Duration;

use crate::config::EndpointsConfig;
use crate::models::Article;

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/58.0.3029.110 Safari/537.3";

const SNIPPET_CHARS: usize = 500;

pub struct TavilyClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl TavilyClient {
    pub fn new(endpoints: &EndpointsConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(endpoints.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: endpoints.tavily.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Runs a search and returns the JSON response as text.
    pub async fn search(&self, query: &str) -> Result<String> {
        let body = serde_json::json!({ "api_key": self.api_key, "query": query });
        let resp = self
            .client
            .post(format!("{}/search", self.base_url))
            .json(&body)
            .send()
            .await
            .context("Tavily request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("Tavily API error {}: {}", status, text);
        }
        let json: serde_json::Value = resp.json().await?;
        Ok(json.to_string())
    }
}

pub fn browser_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(BROWSER_USER_AGENT)
        .timeout(timeout)
        .build()?)
}

/// First 500 characters of a page, or a message describing the failure.
pub async fn download_snippet(client: &reqwest::Client, url: &str) -> String {
    let resp = match client.get(url).send().await {
        Ok(resp) => resp,
        Err(e) => return format!("Error downloading content: {}", e),
    };
    let status = resp.status();
    if status.as_u16() != 200 {
        return format!("Failed to download content. Status code: {}", status.as_u16());
    }
    match resp.text().await {
        Ok(text) => {
            let snippet: String = text.chars().take(SNIPPET_CHARS).collect();
            format!("Downloaded content snippet: {}", snippet)
        }
        Err(e) => format!("Error downloading content: {}", e),
    }
}

/// Downloads `url` and pulls title, description and image metadata out of
/// the HTML head.
pub async fn extract_article(client: &reqwest::Client, url: &str) -> Result<Article> {
    let resp = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to download {}", url))?;
    let status = resp.status();
    if !status.is_success() {
        bail!("Download of {} failed with status {}", url, status);
    }
    let html = resp.text().await?;
    parse_article(url, &html)
}

pub fn parse_article(url: &str, html: &str) -> Result<Article> {
    let meta = meta_tags(html)?;
    let get = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| meta.get(*k))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let title_re = Regex::new(r"(?is)<title[^>]*>(.*?)</title>")?;
    let title = title_re
        .captures(html)
        .map(|c| decode_entities(c[1].trim()))
        .filter(|t| !t.is_empty())
        .or_else(|| get(&["og:title"]));

    let lang_re = Regex::new(r#"(?i)<html[^>]*\slang\s*=\s*["']([^"']+)["']"#)?;
    let meta_lang = lang_re
        .captures(html)
        .map(|c| c[1].to_string())
        .or_else(|| get(&["og:locale", "language"]));

    let meta_keywords = get(&["keywords", "news_keywords"])
        .map(|k| {
            k.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Ok(Article {
        source_url: source_url(url),
        title,
        summary: get(&["description", "og:description", "twitter:description"]),
        top_image: get(&["og:image", "twitter:image"]),
        published: get(&["article:published_time", "pubdate", "date"]),
        meta_lang,
        meta_keywords,
    })
}

/// `scheme://host` of a URL.
fn source_url(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(parsed) => match parsed.host_str() {
            Some(host) => format!("{}://{}", parsed.scheme(), host),
            None => url.to_string(),
        },
        Err(_) => url.to_string(),
    }
}

/// `name`/`property` → `content` for every `<meta>` tag, keys lowercased.
/// The first occurrence of a key wins.
fn meta_tags(html: &str) -> Result<HashMap<String, String>> {
    let tag_re = Regex::new(r"(?is)<meta\s[^>]*>")?;
    let attr_re = Regex::new(r#"(?s)([a-zA-Z_:-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)?;

    let mut out = HashMap::new();
    for tag in tag_re.find_iter(html) {
        let mut attrs: HashMap<String, String> = HashMap::new();
        for cap in attr_re.captures_iter(tag.as_str()) {
            let value = cap.get(2).or_else(|| cap.get(3)).map_or("", |m| m.as_str());
            attrs.insert(cap[1].to_ascii_lowercase(), decode_entities(value));
        }
        let key = attrs
            .get("name")
            .or_else(|| attrs.get("property"))
            .or_else(|| attrs.get("itemprop"))
            .map(|k| k.to_ascii_lowercase());
        if let (Some(key), Some(content)) = (key, attrs.get("content")) {
            out.entry(key).or_insert_with(|| content.clone());
        }
    }
    Ok(out)
}

fn decode_entities(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

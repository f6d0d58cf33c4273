//! Curated small-business news for `/get_news`.
//!
//! Four stages run in order over a [`NewsState`]:
//!
//! 1. **prompt_engineer** asks the text model for search topics.
//! 2. **news_collector** runs a Google News search per topic and keeps
//!    only live, well-formed articles.
//! 3. **supervisor** asks the text model which titles are relevant.
//! 4. **summarizer** attaches a picture, link and meta description.

use anyhow::{Context, Result};
use chrono::DateTime;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{EndpointsConfig, NewsConfig};
use crate::llm::TextModel;
use crate::models::NewsItem;
use crate::web::{browser_client, extract_article};

pub const SUMMARY_FALLBACK: &str = "Article on growing your business and creating value";

const DATE_FORMAT: &str = "%m/%d/%Y, %I:%M %p, %z UTC";

#[derive(Debug, Clone, Default)]
pub struct NewsState {
    pub user_input: String,
    pub engineered_topics: Vec<String>,
    pub news_items: Vec<NewsItem>,
    pub messages: Vec<String>,
}

impl NewsState {
    pub fn new(user_input: impl Into<String>) -> Self {
        Self {
            user_input: user_input.into(),
            ..Default::default()
        }
    }
}

fn topic_prompt(user_input: &str) -> String {
    format!(
        r#"You are a prompt engineer who specialises in creating prompts for google topic search for curated articles only for businesses in the following list,
  1. small restaurant owners
  2. food truck owners
  3. cafes
and only in locations within massachusetts. This is the user input: {user_input}
Can you generate a list of 2 topics that will be relevant to his query and intent?
The topics should follow these guidelines
positive_resources are including business growth, have valuable information, upcoming trends, truthful information, upcoming events in the locality
cost-effective directives to compound growth.
negative_resources are commercial blogs, seo blogs, ads, company product, influencer content, etc, false info

Follow this format for output: "<topic 1>" | "<topic 2>""#
    )
}

fn supervisor_prompt(titles: &str, user_input: &str) -> String {
    format!(
        r#"You are a supervisor. Based on the users input and a given list of articles, select top 20 article titles that appear most relevant and for the user.
This background of the possible consumer for these articles is a new enterprising food business owner only in the following industries
(food business, food trucks, small restaurants, cafes) interested in new ideas, growth, cost optimization, latest trends, interesting ideas, innovation, etc.

cleaned_article_list: {titles}
user_input: {user_input}

output_format: answer this prompt only in the following format "<title 1> | <title 2> | ... | <title 20>" and no other text"#
    )
}

/// Splits the topic answer on `" | "`, trimming quotes and blanks.
pub fn parse_topics(answer: &str) -> Vec<String> {
    answer
        .split(" | ")
        .map(|t| t.trim().trim_matches('"').trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Items whose lowercased title appears in the `" | "`-separated answer.
pub fn filter_by_titles(answer: &str, items: Vec<NewsItem>) -> Vec<NewsItem> {
    let lowered = answer.to_lowercase();
    let wanted: Vec<&str> = lowered
        .split(" | ")
        .map(|t| t.trim().trim_matches('"').trim())
        .collect();
    items
        .into_iter()
        .filter(|item| wanted.contains(&item.title.to_lowercase().as_str()))
        .collect()
}

/// Title present, source with a non-empty name, and a date in the
/// `MM/DD/YYYY, HH:MM AM, +0000 UTC` form.
pub fn has_valid_details(item: &NewsItem) -> bool {
    if item.title.is_empty() {
        return false;
    }
    let source_named = item
        .source
        .as_ref()
        .and_then(|s| s.get("name"))
        .and_then(|n| n.as_str())
        .is_some_and(|n| !n.is_empty());
    if !source_named {
        return false;
    }
    item.date
        .as_deref()
        .is_some_and(|d| DateTime::parse_from_str(d, DATE_FORMAT).is_ok())
}

pub struct NewsPipeline {
    llm: Arc<dyn TextModel>,
    client: reqwest::Client,
    link_client: reqwest::Client,
    article_client: reqwest::Client,
    serpapi_url: String,
    serpapi_key: String,
    config: NewsConfig,
}

impl NewsPipeline {
    pub fn new(
        llm: Arc<dyn TextModel>,
        endpoints: &EndpointsConfig,
        config: &NewsConfig,
        serpapi_key: String,
    ) -> Result<Self> {
        let timeout = Duration::from_secs(endpoints.timeout_secs);
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let link_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(config.link_timeout_secs))
            .build()?;
        Ok(Self {
            llm,
            client,
            link_client,
            article_client: browser_client(timeout)?,
            serpapi_url: endpoints.serpapi.trim_end_matches('/').to_string(),
            serpapi_key,
            config: config.clone(),
        })
    }

    /// Runs all four stages and returns the curated items.
    pub async fn get_news(&self, user_input: &str) -> Result<Vec<NewsItem>> {
        let mut state = NewsState::new(user_input);
        tracing::info!(user_input, "starting news aggregation");
        self.prompt_engineer(&mut state).await?;
        self.news_collector(&mut state).await;
        self.supervisor(&mut state).await?;
        self.summarizer(&mut state).await;
        tracing::info!(count = state.news_items.len(), "news aggregation finished");
        Ok(state.news_items)
    }

    pub async fn prompt_engineer(&self, state: &mut NewsState) -> Result<()> {
        let answer = self
            .llm
            .generate(&topic_prompt(&state.user_input))
            .await
            .context("topic generation failed")?;
        state.engineered_topics = parse_topics(&answer);
        tracing::info!(topics = ?state.engineered_topics, "engineered topics");
        state.messages.push("Prompt engineering completed.".to_string());
        Ok(())
    }

    pub async fn news_collector(&self, state: &mut NewsState) {
        let topics = if state.engineered_topics.is_empty() {
            vec![self.config.fallback_topic.clone()]
        } else {
            state.engineered_topics.clone()
        };

        let mut collected = Vec::new();
        for topic in &topics {
            match self.search_news(topic).await {
                Ok(items) => collected.extend(items),
                Err(e) => tracing::warn!(topic, error = %e, "news search failed"),
            }
        }
        state.messages.push("News collection completed.".to_string());

        if collected.len() <= 1 {
            tracing::info!(count = collected.len(), "not enough news items");
            state.news_items = Vec::new();
            return;
        }

        tracing::info!(count = collected.len(), "collected news items");
        let mut valid = Vec::new();
        for item in collected {
            if has_valid_details(&item) && self.link_is_live(&item.link).await {
                valid.push(item);
            }
        }
        tracing::info!(count = valid.len(), "validated news items");
        state.news_items = valid;
    }

    async fn search_news(&self, topic: &str) -> Result<Vec<NewsItem>> {
        let num = self.config.results_per_topic.to_string();
        let resp = self
            .client
            .get(format!("{}/search.json", self.serpapi_url))
            .query(&[
                ("engine", "google_news"),
                ("q", topic.trim_matches('"')),
                ("api_key", self.serpapi_key.as_str()),
                ("num", num.as_str()),
                ("hl", "en"),
                ("location", self.config.location.as_str()),
                ("tbs", self.config.time_window.as_str()),
            ])
            .send()
            .await?;

        let json: serde_json::Value = resp.json().await?;
        if let Some(err) = json.get("error") {
            tracing::warn!(topic, error = %err, "news search returned an error");
            return Ok(Vec::new());
        }
        let items = match json.get("news_results") {
            Some(results) => serde_json::from_value(results.clone())?,
            None => Vec::new(),
        };
        Ok(items)
    }

    async fn link_is_live(&self, link: &str) -> bool {
        if link.is_empty() {
            return false;
        }
        match self.link_client.head(link).send().await {
            Ok(resp) => resp.status().as_u16() == 200,
            Err(_) => false,
        }
    }

    pub async fn supervisor(&self, state: &mut NewsState) -> Result<()> {
        if state.news_items.is_empty() {
            state.messages.push("News aggregation complete.".to_string());
            return Ok(());
        }
        let titles: Vec<&str> = state.news_items.iter().map(|i| i.title.as_str()).collect();
        let answer = self
            .llm
            .generate(&supervisor_prompt(&titles.join(" | "), &state.user_input))
            .await
            .context("news moderation failed")?;

        let items = std::mem::take(&mut state.news_items);
        state.news_items = filter_by_titles(&answer, items);
        tracing::info!(kept = state.news_items.len(), "supervisor filtered news");
        state.messages.push("News aggregation complete.".to_string());
        Ok(())
    }

    pub async fn summarizer(&self, state: &mut NewsState) {
        for item in &mut state.news_items {
            let summary = match extract_article(&self.article_client, &item.link).await {
                Ok(article) => article.summary,
                Err(e) => {
                    tracing::debug!(link = %item.link, error = %e, "article extraction failed");
                    None
                }
            };
            item.display_picture = item.thumbnail.clone();
            item.article_link = Some(item.link.clone());
            item.article_summary = Some(summary.unwrap_or_else(|| SUMMARY_FALLBACK.to_string()));
            item.favorite_status = Some(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use httpmock::prelude::*;
    use std::sync::Mutex;

    fn item(title: &str, link: &str) -> NewsItem {
        NewsItem {
            title: title.to_string(),
            link: link.to_string(),
            source: Some(serde_json::json!({ "name": "Boston.com" })),
            date: Some("09/09/2024, 07:00 AM, +0000 UTC".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn topics_are_split_and_unquoted() {
        assert_eq!(
            parse_topics("\"MA food truck permits\" | \"Boston cafe trends\""),
            vec!["MA food truck permits", "Boston cafe trends"]
        );
        assert!(parse_topics("  ").is_empty());
    }

    #[test]
    fn supervisor_filter_is_case_insensitive_and_exact() {
        let items = vec![
            item("Boston Restaurants Rebound", "a"),
            item("Cafe openings", "b"),
            item("Cafe", "c"),
        ];
        let kept = filter_by_titles("boston restaurants rebound | CAFE OPENINGS", items);
        let titles: Vec<_> = kept.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["Boston Restaurants Rebound", "Cafe openings"]);
    }

    #[test]
    fn detail_validation() {
        assert!(has_valid_details(&item("t", "l")));

        let mut bad_date = item("t", "l");
        bad_date.date = Some("2024-09-09".into());
        assert!(!has_valid_details(&bad_date));

        let mut no_source = item("t", "l");
        no_source.source = Some(serde_json::json!({ "name": "" }));
        assert!(!has_valid_details(&no_source));

        assert!(!has_valid_details(&item("", "l")));
    }

    struct ScriptedText(Mutex<Vec<String>>);

    #[async_trait]
    impl TextModel for ScriptedText {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            let mut replies = self.0.lock().unwrap();
            if replies.is_empty() {
                anyhow::bail!("no more replies");
            }
            Ok(replies.remove(0))
        }
    }

    fn pipeline(server: &MockServer, replies: Vec<&str>) -> NewsPipeline {
        let endpoints = EndpointsConfig {
            serpapi: server.base_url(),
            timeout_secs: 5,
            ..Default::default()
        };
        let llm = Arc::new(ScriptedText(Mutex::new(
            replies.into_iter().map(String::from).collect(),
        )));
        NewsPipeline::new(llm, &endpoints, &NewsConfig::default(), "serp".into()).unwrap()
    }

    #[tokio::test]
    async fn single_result_yields_nothing() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/search.json");
            then.status(200).json_body(serde_json::json!({
                "news_results": [{ "title": "Only one", "link": "x" }]
            }));
        });
        let news = pipeline(&server, vec!["\"topic\""]);
        let items = news.get_news("anything").await.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn full_pipeline() {
        let server = MockServer::start();
        let live = server.url("/articles/live");
        let dead = server.url("/articles/dead");
        let search = server.mock(|when, then| {
            when.method(GET)
                .path("/search.json")
                .query_param("engine", "google_news")
                .query_param("q", "food trucks")
                .query_param("tbs", "qdr:w")
                .query_param("location", "Massachusetts, United States");
            then.status(200).json_body(serde_json::json!({
                "news_results": [
                    {
                        "position": 1,
                        "title": "Food trucks thrive in Worcester",
                        "link": live,
                        "thumbnail": "https://img/1.jpg",
                        "source": { "name": "Telegram" },
                        "date": "12/02/2024, 12:09 AM, +0000 UTC"
                    },
                    {
                        "title": "Dead link story",
                        "link": dead,
                        "source": { "name": "Globe" },
                        "date": "12/02/2024, 12:09 AM, +0000 UTC"
                    },
                    { "title": "No date", "link": live, "source": { "name": "X" } }
                ]
            }));
        });
        server.mock(|when, then| {
            when.method(httpmock::Method::HEAD).path("/articles/live");
            then.status(200);
        });
        server.mock(|when, then| {
            when.method(httpmock::Method::HEAD).path("/articles/dead");
            then.status(301).header("location", "/elsewhere");
        });
        server.mock(|when, then| {
            when.method(GET).path("/articles/live");
            then.status(200).body(
                r#"<html><head><meta name="description" content="Trucks are booming."></head></html>"#,
            );
        });

        let news = pipeline(
            &server,
            vec!["\"food trucks\"", "FOOD TRUCKS THRIVE IN WORCESTER | Dead link story"],
        );
        let items = news.get_news("Find the latest trends").await.unwrap();

        assert_eq!(search.calls(), 1);
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.display_picture.as_deref(), Some("https://img/1.jpg"));
        assert_eq!(item.article_link.as_deref(), Some(item.link.as_str()));
        assert_eq!(item.article_summary.as_deref(), Some("Trucks are booming."));
        assert_eq!(item.favorite_status, Some(false));
        assert_eq!(item.extra.get("position"), Some(&serde_json::json!(1)));
    }

    #[tokio::test]
    async fn empty_topics_fall_back_to_default() {
        let server = MockServer::start();
        let search = server.mock(|when, then| {
            when.method(GET)
                .path("/search.json")
                .query_param("q", NewsConfig::default().fallback_topic);
            then.status(200).json_body(serde_json::json!({ "error": "no results" }));
        });
        let news = pipeline(&server, vec![""]);
        assert!(news.get_news("x").await.unwrap().is_empty());
        assert_eq!(search.calls(), 1);
    }

    #[tokio::test]
    async fn summary_falls_back() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/gone");
            then.status(404);
        });
        let news = pipeline(&server, vec![]);
        let mut state = NewsState::new("x");
        state.news_items = vec![item("t", &server.url("/gone"))];
        news.summarizer(&mut state).await;
        assert_eq!(
            state.news_items[0].article_summary.as_deref(),
            Some(SUMMARY_FALLBACK)
        );
    }
}

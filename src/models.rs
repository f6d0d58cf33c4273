//! Core data models shared by the API and the pipelines.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A stored user credential row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub hashed_password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

/// Extra fields fetched per place from the details endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaceDetails {
    pub website: Option<String>,
    pub types: Vec<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

/// A restaurant as returned by `/restaurants` and sent back by the
/// dashboard in `/qn_agent` requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Restaurant {
    pub name: Option<String>,
    pub address: Option<String>,
    pub rating: Option<f64>,
    pub user_ratings_total: Option<i64>,
    pub price_level: Option<i64>,
    pub place_id: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub cuisine_types: Vec<String>,
    pub website: Option<String>,
}

/// One row of the statewide restaurant dataset built by the places pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceRecord {
    pub place_id: String,
    pub name: Option<String>,
    pub address: String,
    pub zip_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub rating: Option<f64>,
    pub user_ratings_total: Option<i64>,
    pub business_status: Option<String>,
    /// JSON array text, e.g. `["restaurant","food"]`.
    pub types: String,
}

/// A vector to upsert into the index. The ID is the source object key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    #[serde(default)]
    pub score: f32,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl VectorMatch {
    /// The `content` preview stored alongside the vector, if any.
    pub fn content(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
    }
}

/// A news result from the search API, augmented by the summarizer stage.
///
/// Unknown upstream fields (`position`, `thumbnail_small`, …) are carried
/// through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favorite_status: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Metadata pulled out of a fetched article page.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Article {
    pub source_url: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub top_image: Option<String>,
    pub published: Option<String>,
    pub meta_lang: Option<String>,
    pub meta_keywords: Vec<String>,
}

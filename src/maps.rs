//! Google Maps geocoding and Places client.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::config::EndpointsConfig;
use crate::models::{LatLng, PlaceDetails, Restaurant};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Geometry {
    #[serde(default)]
    pub location: Option<LatLng>,
}

/// One result of a nearby search.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NearbyPlace {
    #[serde(default)]
    pub place_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub vicinity: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub user_ratings_total: Option<i64>,
    #[serde(default)]
    pub price_level: Option<i64>,
    #[serde(default)]
    pub business_status: Option<String>,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub geometry: Option<Geometry>,
}

impl NearbyPlace {
    pub fn location(&self) -> Option<LatLng> {
        self.geometry.as_ref().and_then(|g| g.location)
    }
}

#[derive(Deserialize)]
struct NearbyResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    results: Vec<NearbyPlace>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct GeocodeResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
}

#[derive(Deserialize)]
struct DetailsResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    result: DetailsResult,
}

#[derive(Default, Deserialize)]
struct DetailsResult {
    #[serde(default)]
    website: Option<String>,
    #[serde(default)]
    types: Vec<String>,
    #[serde(default)]
    geometry: Option<Geometry>,
}

/// Place types minus `"restaurant"`, or `["N/A"]` when nothing remains.
pub fn cuisine_types(types: &[String]) -> Vec<String> {
    let cuisines: Vec<String> = types
        .iter()
        .filter(|t| t.as_str() != "restaurant")
        .cloned()
        .collect();
    if cuisines.is_empty() {
        vec!["N/A".to_string()]
    } else {
        cuisines
    }
}

#[derive(Clone)]
pub struct MapsClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl MapsClient {
    pub fn new(endpoints: &EndpointsConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(endpoints.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: endpoints.google_maps.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Coordinates of the first geocoding result, `None` when there is none.
    pub async fn geocode_zip(&self, zip: &str) -> Result<Option<LatLng>> {
        let resp = self
            .client
            .get(format!("{}/maps/api/geocode/json", self.base_url))
            .query(&[("address", zip), ("key", self.api_key.as_str())])
            .send()
            .await
            .context("Geocoding request failed")?;

        if !resp.status().is_success() {
            tracing::warn!(status = %resp.status(), zip, "geocoding returned non-200");
            return Ok(None);
        }

        let data: GeocodeResponse = resp.json().await.context("Invalid geocoding response")?;
        if data.status != "OK" {
            tracing::debug!(status = %data.status, zip, "geocoding found nothing");
            return Ok(None);
        }
        Ok(data
            .results
            .into_iter()
            .next()
            .and_then(|r| r.geometry.location))
    }

    /// Website, types and coordinates of a place. Any failure yields the
    /// empty default.
    pub async fn place_details(&self, place_id: &str) -> PlaceDetails {
        match self.fetch_details(place_id).await {
            Ok(Some(details)) => details,
            Ok(None) => PlaceDetails::default(),
            Err(e) => {
                tracing::warn!(place_id, error = %e, "place details failed");
                PlaceDetails::default()
            }
        }
    }

    async fn fetch_details(&self, place_id: &str) -> Result<Option<PlaceDetails>> {
        let resp = self
            .client
            .get(format!("{}/maps/api/place/details/json", self.base_url))
            .query(&[
                ("place_id", place_id),
                ("key", self.api_key.as_str()),
                ("fields", "website,types,geometry"),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Ok(None);
        }
        let data: DetailsResponse = resp.json().await?;
        if data.status != "OK" {
            return Ok(None);
        }

        let location = data.result.geometry.and_then(|g| g.location);
        Ok(Some(PlaceDetails {
            website: data.result.website,
            types: data.result.types,
            lat: location.map(|l| l.lat),
            lng: location.map(|l| l.lng),
        }))
    }

    /// Single-page nearby restaurant search, enriched with place details.
    /// A non-200 response or a status other than `OK` gives an empty list.
    pub async fn find_restaurants(&self, lat: f64, lng: f64, radius_m: u32) -> Result<Vec<Restaurant>> {
        let location = format!("{},{}", lat, lng);
        let radius = radius_m.to_string();
        let resp = self
            .client
            .get(format!("{}/maps/api/place/nearbysearch/json", self.base_url))
            .query(&[
                ("location", location.as_str()),
                ("radius", radius.as_str()),
                ("type", "restaurant"),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await
            .context("Nearby search request failed")?;

        if !resp.status().is_success() {
            tracing::warn!(status = %resp.status(), "nearby search returned non-200");
            return Ok(Vec::new());
        }
        let data: NearbyResponse = resp.json().await.context("Invalid nearby search response")?;
        if data.status != "OK" {
            return Ok(Vec::new());
        }

        let mut restaurants = Vec::with_capacity(data.results.len());
        for place in data.results {
            let details = match &place.place_id {
                Some(id) => self.place_details(id).await,
                None => PlaceDetails::default(),
            };
            restaurants.push(Restaurant {
                name: place.name,
                address: place.vicinity,
                rating: place.rating,
                user_ratings_total: place.user_ratings_total,
                price_level: place.price_level,
                place_id: place.place_id,
                lat: details.lat,
                lng: details.lng,
                cuisine_types: cuisine_types(&details.types),
                website: details.website,
            });
        }
        Ok(restaurants)
    }

    /// Nearby search following `next_page_token`, waiting `page_delay`
    /// before each follow-up page. Stops on a non-200 response or a status
    /// other than `OK`/`ZERO_RESULTS`.
    pub async fn nearby_search_all(
        &self,
        lat: f64,
        lng: f64,
        radius_m: u32,
        page_delay: Duration,
    ) -> Result<Vec<NearbyPlace>> {
        let url = format!("{}/maps/api/place/nearbysearch/json", self.base_url);
        let location = format!("{},{}", lat, lng);
        let radius = radius_m.to_string();

        let mut params: Vec<(&str, String)> = vec![
            ("key", self.api_key.clone()),
            ("location", location),
            ("radius", radius),
            ("type", "restaurant".to_string()),
        ];
        let mut places = Vec::new();

        loop {
            let resp = self.client.get(&url).query(&params).send().await?;
            if !resp.status().is_success() {
                tracing::warn!(status = %resp.status(), lat, lng, "nearby search error");
                break;
            }

            let data: NearbyResponse = resp.json().await?;
            if data.status != "OK" && data.status != "ZERO_RESULTS" {
                tracing::warn!(status = %data.status, lat, lng, "nearby search API error");
                break;
            }
            places.extend(data.results);

            match data.next_page_token {
                Some(token) => {
                    tokio::time::sleep(page_delay).await;
                    params = vec![("key", self.api_key.clone()), ("pagetoken", token)];
                }
                None => break,
            }
        }

        Ok(places)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn client(base: &str) -> MapsClient {
        let endpoints = EndpointsConfig {
            google_maps: base.to_string(),
            timeout_secs: 5,
            ..Default::default()
        };
        MapsClient::new(&endpoints, "gk".into()).unwrap()
    }

    #[test]
    fn cuisine_types_drop_restaurant() {
        let types = vec!["restaurant".to_string(), "bar".to_string()];
        assert_eq!(cuisine_types(&types), vec!["bar"]);
        assert_eq!(cuisine_types(&["restaurant".to_string()]), vec!["N/A"]);
        assert_eq!(cuisine_types(&[]), vec!["N/A"]);
    }

    #[tokio::test]
    async fn geocode_ok_and_zero_results() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/maps/api/geocode/json")
                .query_param("address", "02115")
                .query_param("key", "gk");
            then.status(200).json_body(serde_json::json!({
                "status": "OK",
                "results": [{ "geometry": { "location": { "lat": 42.34, "lng": -71.09 } } }]
            }));
        });
        server.mock(|when, then| {
            when.method(GET)
                .path("/maps/api/geocode/json")
                .query_param("address", "00000");
            then.status(200)
                .json_body(serde_json::json!({ "status": "ZERO_RESULTS", "results": [] }));
        });

        let maps = client(&server.base_url());
        let hit = maps.geocode_zip("02115").await.unwrap().unwrap();
        assert_eq!(hit.lat, 42.34);
        assert!(maps.geocode_zip("00000").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_restaurants_merges_details() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/maps/api/place/nearbysearch/json")
                .query_param("type", "restaurant")
                .query_param("radius", "8047");
            then.status(200).json_body(serde_json::json!({
                "status": "OK",
                "results": [
                    { "place_id": "p1", "name": "Cafe One", "vicinity": "1 Main St", "rating": 4.5 },
                    { "place_id": "p2", "name": "Diner Two", "vicinity": "2 Main St" }
                ]
            }));
        });
        server.mock(|when, then| {
            when.method(GET)
                .path("/maps/api/place/details/json")
                .query_param("place_id", "p1")
                .query_param("fields", "website,types,geometry");
            then.status(200).json_body(serde_json::json!({
                "status": "OK",
                "result": {
                    "website": "https://cafe.one",
                    "types": ["cafe", "restaurant", "food"],
                    "geometry": { "location": { "lat": 1.0, "lng": 2.0 } }
                }
            }));
        });
        server.mock(|when, then| {
            when.method(GET)
                .path("/maps/api/place/details/json")
                .query_param("place_id", "p2");
            then.status(500);
        });

        let maps = client(&server.base_url());
        let found = maps.find_restaurants(42.0, -71.0, 8047).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].cuisine_types, vec!["cafe", "food"]);
        assert_eq!(found[0].website.as_deref(), Some("https://cafe.one"));
        assert_eq!(found[0].lat, Some(1.0));
        assert_eq!(found[1].cuisine_types, vec!["N/A"]);
        assert_eq!(found[1].website, None);
    }

    #[tokio::test]
    async fn nearby_search_follows_page_token() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/maps/api/place/nearbysearch/json")
                .query_param("pagetoken", "next");
            then.status(200).json_body(serde_json::json!({
                "status": "OK",
                "results": [{ "place_id": "b" }]
            }));
        });
        server.mock(|when, then| {
            when.method(GET)
                .path("/maps/api/place/nearbysearch/json")
                .query_param("radius", "1500");
            then.status(200).json_body(serde_json::json!({
                "status": "OK",
                "results": [{ "place_id": "a" }],
                "next_page_token": "next"
            }));
        });

        let maps = client(&server.base_url());
        let places = maps
            .nearby_search_all(42.0, -71.0, 1500, Duration::ZERO)
            .await
            .unwrap();
        let ids: Vec<_> = places.iter().filter_map(|p| p.place_id.as_deref()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}

//! ZIP-code restaurant lookup with an in-memory cache.

use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RestaurantsConfig;
use crate::maps::MapsClient;
use crate::models::Restaurant;

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("Could not geocode the provided zip code.")]
    NotFound,
    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

#[derive(Clone)]
pub struct RestaurantService {
    maps: MapsClient,
    radius_m: u32,
    cache: Cache<String, Arc<Vec<Restaurant>>>,
}

impl RestaurantService {
    pub fn new(maps: MapsClient, config: &RestaurantsConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_live(Duration::from_secs(config.cache_ttl_secs))
            .build();
        Self {
            maps,
            radius_m: config.radius_meters,
            cache,
        }
    }

    pub async fn lookup(&self, zip: &str) -> Result<Arc<Vec<Restaurant>>, LookupError> {
        let zip = zip.trim();
        if let Some(hit) = self.cache.get(zip).await {
            tracing::debug!(zip, "restaurant cache hit");
            return Ok(hit);
        }

        let coords = self
            .maps
            .geocode_zip(zip)
            .await?
            .ok_or(LookupError::NotFound)?;
        let restaurants = Arc::new(
            self.maps
                .find_restaurants(coords.lat, coords.lng, self.radius_m)
                .await?,
        );
        tracing::info!(zip, count = restaurants.len(), "fetched restaurants");

        // An empty list may be an upstream failure; retry on the next call.
        if !restaurants.is_empty() {
            self.cache.insert(zip.to_string(), restaurants.clone()).await;
        }
        Ok(restaurants)
    }

    /// Text rendering of the first five restaurants for the assistant.
    pub async fn format_for_agent(&self, zip: &str) -> String {
        match self.lookup(zip).await {
            Ok(list) if list.is_empty() => "No restaurants found.".to_string(),
            Ok(list) => render_lines(&list[..list.len().min(5)]),
            Err(LookupError::NotFound) => "Invalid zip code.".to_string(),
            Err(LookupError::Upstream(e)) => {
                tracing::warn!(zip, error = %e, "restaurant lookup failed");
                "No restaurants found.".to_string()
            }
        }
    }
}

fn or_na<T: ToString>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

fn render_lines(restaurants: &[Restaurant]) -> String {
    restaurants
        .iter()
        .map(|r| {
            format!(
                "Name: {}, Address: {}, Rating: {}, Cuisine: {}, Website: {}",
                or_na(&r.name),
                or_na(&r.address),
                or_na(&r.rating),
                r.cuisine_types.join(", "),
                or_na(&r.website),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

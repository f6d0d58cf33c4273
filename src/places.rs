//! The `places` pipeline: a statewide restaurant dataset.
//!
//! Sweeps a lat/lng grid over Massachusetts with the Places nearby search,
//! dedupes results by `place_id`, writes them to a local CSV, uploads the
//! CSV to object storage and reloads the `restaurant_details` table.

use anyhow::{Context, Result};
use regex::Regex;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::PlacesConfig;
use crate::maps::{MapsClient, NearbyPlace};
use crate::migrate::recreate_restaurant_details;
use crate::models::PlaceRecord;
use crate::storage::ObjectStore;

const LOCAL_FILE_NAME: &str = "massachusetts_restaurants.csv";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PlacesStats {
    pub grid_points: usize,
    pub visited: usize,
    pub restaurants: usize,
}

fn axis(min: f64, max: f64, step: f64) -> Vec<f64> {
    let count = ((max - min) / step) as usize + 1;
    (0..count).map(|i| min + i as f64 * step).collect()
}

/// Every (lat, lng) pair of the grid, latitude-major.
pub fn grid_points(config: &PlacesConfig) -> Vec<(f64, f64)> {
    let lats = axis(config.min_lat, config.max_lat, config.grid_step);
    let lngs = axis(config.min_lng, config.max_lng, config.grid_step);
    lats.iter()
        .flat_map(|&lat| lngs.iter().map(move |&lng| (lat, lng)))
        .collect()
}

pub fn zip_regex() -> Result<Regex> {
    Ok(Regex::new(r"\b\d{5}(?:-\d{4})?\b")?)
}

pub fn extract_zip_code(re: &Regex, address: &str) -> Option<String> {
    re.find(address).map(|m| m.as_str().to_string())
}

/// Flattens a search result into a dataset row. Results without a
/// `place_id` are dropped.
pub fn to_record(place: NearbyPlace, zip_re: &Regex) -> Option<PlaceRecord> {
    let location = place.location();
    let place_id = place.place_id?;
    let address = place.vicinity.unwrap_or_default();
    let types = serde_json::to_string(&place.types).unwrap_or_else(|_| "[]".to_string());
    Some(PlaceRecord {
        zip_code: extract_zip_code(zip_re, &address),
        place_id,
        name: place.name,
        address,
        latitude: location.map(|l| l.lat),
        longitude: location.map(|l| l.lng),
        rating: place.rating,
        user_ratings_total: place.user_ratings_total,
        business_status: place.business_status,
        types,
    })
}

/// Runs the nearby search at each grid point and keeps the first sighting
/// of every place. A failing point is logged and skipped.
pub async fn collect_places(
    maps: &MapsClient,
    config: &PlacesConfig,
    points: &[(f64, f64)],
) -> Result<Vec<PlaceRecord>> {
    let zip_re = zip_regex()?;
    let mut seen = HashSet::new();
    let mut records = Vec::new();
    let page_delay = Duration::from_millis(config.page_token_delay_ms);

    for (idx, &(lat, lng)) in points.iter().enumerate() {
        tracing::info!(point = idx + 1, total = points.len(), lat, lng, "fetching grid point");
        match maps
            .nearby_search_all(lat, lng, config.radius_meters, page_delay)
            .await
        {
            Ok(places) => {
                for place in places {
                    let Some(record) = to_record(place, &zip_re) else {
                        continue;
                    };
                    if seen.insert(record.place_id.clone()) {
                        records.push(record);
                    }
                }
            }
            Err(e) => tracing::warn!(lat, lng, error = %e, "grid point failed"),
        }
        if config.point_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.point_delay_ms)).await;
        }
    }

    Ok(records)
}

pub fn write_csv(path: &Path, records: &[PlaceRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Replaces the `restaurant_details` table with `records`.
pub async fn load_restaurant_details(
    pool: &SqlitePool,
    records: &[PlaceRecord],
    insert_date: &str,
) -> Result<()> {
    recreate_restaurant_details(pool, true).await?;

    let mut tx = pool.begin().await?;
    for r in records {
        sqlx::query(
            "INSERT INTO restaurant_details (place_id, name, address, zip_code, latitude, longitude, \
             rating, user_ratings_total, business_status, types, insert_date) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&r.place_id)
        .bind(&r.name)
        .bind(&r.address)
        .bind(&r.zip_code)
        .bind(r.latitude)
        .bind(r.longitude)
        .bind(r.rating)
        .bind(r.user_ratings_total)
        .bind(&r.business_status)
        .bind(&r.types)
        .bind(insert_date)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub struct PlacesPipeline<'a> {
    pub maps: &'a MapsClient,
    pub store: &'a dyn ObjectStore,
    pub pool: &'a SqlitePool,
    pub config: &'a PlacesConfig,
    /// Object key of the uploaded CSV.
    pub places_key: &'a str,
}

impl PlacesPipeline<'_> {
    pub fn local_path(&self) -> PathBuf {
        self.config.local_dir.join(LOCAL_FILE_NAME)
    }

    /// Collect, write locally, upload, load, clean up. `limit_points` keeps
    /// only the first N grid points.
    pub async fn run(&self, limit_points: Option<usize>) -> Result<PlacesStats> {
        let mut points = grid_points(self.config);
        let grid_total = points.len();
        if let Some(limit) = limit_points {
            points.truncate(limit);
        }
        tracing::info!(grid_total, visiting = points.len(), "grid generated");

        let records = collect_places(self.maps, self.config, &points).await?;
        tracing::info!(count = records.len(), "unique restaurants fetched");

        let path = self.local_path();
        write_csv(&path, &records)?;

        // The local copy is removed whether or not publishing succeeds.
        let published = self.publish(&path, &records).await;
        if let Err(e) = std::fs::remove_file(&path) {
            tracing::warn!(path = %path.display(), error = %e, "could not delete local file");
        }
        published?;

        Ok(PlacesStats {
            grid_points: grid_total,
            visited: points.len(),
            restaurants: records.len(),
        })
    }

    /// Uploads the CSV at `path` and reloads `restaurant_details`.
    async fn publish(&self, path: &Path, records: &[PlaceRecord]) -> Result<()> {
        let body = std::fs::read(path)?;
        self.store
            .put_object(self.places_key, body, "text/csv")
            .await
            .with_context(|| format!("Failed to upload {}", self.places_key))?;

        let insert_date = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
        load_restaurant_details(self.pool, records, &insert_date).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointsConfig;
    use crate::migrate::ensure_schema;
    use async_trait::async_trait;
    use httpmock::prelude::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::Row;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStore {
        puts: Mutex<Vec<(String, Vec<u8>, String)>>,
    }

    #[async_trait]
    impl ObjectStore for RecordingStore {
        async fn list_keys(&self, _: &str, _: &[String]) -> Result<Vec<String>> {
            Ok(vec![])
        }
        async fn get_object(&self, _: &str) -> Result<Vec<u8>> {
            anyhow::bail!("not stored")
        }
        async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
            self.puts
                .lock()
                .unwrap()
                .push((key.to_string(), body, content_type.to_string()));
            Ok(())
        }
    }

    #[test]
    fn default_grid_size() {
        let config = PlacesConfig::default();
        assert_eq!(axis(config.min_lat, config.max_lat, config.grid_step).len(), 95);
        assert_eq!(axis(config.min_lng, config.max_lng, config.grid_step).len(), 180);
        assert_eq!(grid_points(&config).len(), 95 * 180);
        assert_eq!(grid_points(&config)[0], (41.0, -73.5));
    }

    #[test]
    fn zip_extraction() {
        let re = zip_regex().unwrap();
        assert_eq!(
            extract_zip_code(&re, "12 Main St, Cambridge, MA 02139").as_deref(),
            Some("02139")
        );
        assert_eq!(
            extract_zip_code(&re, "1 Elm St, Boston 02110-1234").as_deref(),
            Some("02110-1234")
        );
        assert_eq!(extract_zip_code(&re, "Route 9, Natick"), None);
        assert_eq!(extract_zip_code(&re, "Suite 123456"), None);
    }

    #[test]
    fn record_requires_place_id() {
        let re = zip_regex().unwrap();
        assert!(to_record(NearbyPlace::default(), &re).is_none());

        let place: NearbyPlace = serde_json::from_value(serde_json::json!({
            "place_id": "p1",
            "name": "Clover",
            "vicinity": "7 Holyoke St, Cambridge 02138",
            "types": ["restaurant", "food"],
            "geometry": { "location": { "lat": 42.37, "lng": -71.12 } }
        }))
        .unwrap();
        let record = to_record(place, &re).unwrap();
        assert_eq!(record.zip_code.as_deref(), Some("02138"));
        assert_eq!(record.latitude, Some(42.37));
        assert_eq!(record.types, r#"["restaurant","food"]"#);
    }

    #[tokio::test]
    async fn run_dedupes_uploads_and_loads() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/maps/api/place/nearbysearch/json");
            then.status(200).json_body(serde_json::json!({
                "status": "OK",
                "results": [
                    { "place_id": "p1", "name": "A", "vicinity": "Boston 02110",
                      "geometry": { "location": { "lat": 42.3, "lng": -71.0 } } },
                    { "place_id": "p2", "name": "B", "vicinity": "Nowhere" },
                    { "name": "no id" }
                ]
            }));
        });
        let endpoints = EndpointsConfig {
            google_maps: server.base_url(),
            ..Default::default()
        };
        let maps = MapsClient::new(&endpoints, "gk".into()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let config = PlacesConfig {
            point_delay_ms: 0,
            page_token_delay_ms: 0,
            local_dir: dir.path().join("stage"),
            ..Default::default()
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        ensure_schema(&pool).await.unwrap();
        let store = RecordingStore::default();

        let pipeline = PlacesPipeline {
            maps: &maps,
            store: &store,
            pool: &pool,
            config: &config,
            places_key: "data/massachusetts_restaurants.csv",
        };
        let stats = pipeline.run(Some(3)).await.unwrap();
        assert_eq!(stats.visited, 3);
        assert_eq!(stats.restaurants, 2);
        assert!(!pipeline.local_path().exists());

        let puts = store.puts.lock().unwrap();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].0, "data/massachusetts_restaurants.csv");
        assert_eq!(puts[0].2, "text/csv");
        let csv_text = String::from_utf8(puts[0].1.clone()).unwrap();
        assert!(csv_text.starts_with("place_id,name,address,zip_code,"));

        let rows = sqlx::query("SELECT place_id, zip_code FROM restaurant_details ORDER BY place_id")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get::<Option<String>, _>("zip_code").as_deref(), Some("02110"));
        assert_eq!(rows[1].get::<Option<String>, _>("zip_code"), None);
    }

    struct UnavailableStore;

    #[async_trait]
    impl ObjectStore for UnavailableStore {
        async fn list_keys(&self, _: &str, _: &[String]) -> Result<Vec<String>> {
            Ok(vec![])
        }
        async fn get_object(&self, _: &str) -> Result<Vec<u8>> {
            anyhow::bail!("offline")
        }
        async fn put_object(&self, _: &str, _: Vec<u8>, _: &str) -> Result<()> {
            anyhow::bail!("bucket unavailable")
        }
    }

    #[tokio::test]
    async fn failed_upload_removes_local_file() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/maps/api/place/nearbysearch/json");
            then.status(200).json_body(serde_json::json!({
                "status": "OK",
                "results": [{ "place_id": "p1", "name": "A", "vicinity": "Boston 02110" }]
            }));
        });
        let endpoints = EndpointsConfig {
            google_maps: server.base_url(),
            ..Default::default()
        };
        let maps = MapsClient::new(&endpoints, "gk".into()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let config = PlacesConfig {
            point_delay_ms: 0,
            page_token_delay_ms: 0,
            local_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = UnavailableStore;

        let pipeline = PlacesPipeline {
            maps: &maps,
            store: &store,
            pool: &pool,
            config: &config,
            places_key: "data/massachusetts_restaurants.csv",
        };
        let err = pipeline.run(Some(1)).await.unwrap_err();
        assert!(err.to_string().contains("Failed to upload"));
        assert!(!pipeline.local_path().exists());
    }
}

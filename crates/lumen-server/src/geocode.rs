//! Reverse geocoding against the OpenStreetMap Nominatim API.

use async_trait::async_trait;
use tracing::debug;

use lumen_common::types::Coordinates;
use lumen_common::CoreError;
use lumen_core::Geocoder;

const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/reverse";

pub struct NominatimGeocoder {
    http: reqwest::Client,
}

impl NominatimGeocoder {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .user_agent("lumen-server")
                .connect_timeout(std::time::Duration::from_secs(5))
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("failed to build HTTP client"),
        }
    }
}

impl Default for NominatimGeocoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn reverse(&self, coords: Coordinates) -> lumen_common::Result<String> {
        debug!(lat = coords.lat, lng = coords.lng, "Reverse geocoding");

        let response = self
            .http
            .get(NOMINATIM_URL)
            .query(&[
                ("lat", coords.lat.to_string()),
                ("lon", coords.lng.to_string()),
                ("format", "jsonv2".to_string()),
            ])
            .send()
            .await
            .map_err(|e| CoreError::Geocoder(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::Geocoder(format!("HTTP {status}")));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CoreError::Geocoder(e.to_string()))?;

        json["display_name"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| CoreError::Geocoder("no display_name in response".into()))
    }
}

//! Region lookup: coordinates to a coarse place name.

use crate::error::{Error, Resolved, Result, Service};
use crate::model::UNKNOWN_REGION;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(Error::InvalidInput(format!(
                "coordinates out of range: {}, {}",
                latitude, longitude
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }
}

pub trait ReverseGeocoder: Send + Sync {
    /// Place name at `at`, or `None` if the lookup found nothing usable
    fn reverse(&self, at: Coordinates) -> Result<Option<String>>;
}

/// Nominatim-compatible reverse geocoder
pub struct NominatimGeocoder {
    base_url: String,
    user_agent: String,
    agent: ureq::Agent,
}

impl NominatimGeocoder {
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            user_agent: user_agent.to_string(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl ReverseGeocoder for NominatimGeocoder {
    fn reverse(&self, at: Coordinates) -> Result<Option<String>> {
        let url = format!("{}/reverse", self.base_url);
        let resp = self
            .agent
            .get(&url)
            .set("User-Agent", &self.user_agent)
            .query("format", "json")
            .query("lat", &at.latitude.to_string())
            .query("lon", &at.longitude.to_string())
            .call()
            .map_err(|e| Error::from_http(Service::Geocoder, e))?;
        let body: Value = resp
            .into_json()
            .map_err(|e| Error::decode(Service::Geocoder, e))?;
        Ok(place_name(&body))
    }
}

/// City, else town, from a Nominatim reply
pub fn place_name(body: &Value) -> Option<String> {
    let address = body.get("address")?;
    ["city", "town"]
        .iter()
        .filter_map(|key| address.get(key).and_then(Value::as_str))
        .map(str::trim)
        .find(|name| !name.is_empty())
        .map(str::to_string)
}

/// Best-effort region: the geocoded place, else `stored` (a region already on
/// the user's profile), else [`UNKNOWN_REGION`]. Never fails.
pub fn resolve_region(
    geocoder: &dyn ReverseGeocoder,
    position: Option<Coordinates>,
    stored: Option<&str>,
) -> Resolved<String> {
    let cause = match position {
        None => "no position available".to_string(),
        Some(at) => match geocoder.reverse(at) {
            Ok(Some(place)) => {
                debug!(region = %place, "region resolved");
                return Resolved::Fresh(place);
            }
            Ok(None) => "no place name at position".to_string(),
            Err(e) => {
                warn!(error = %e, "reverse geocoding failed");
                e.to_string()
            }
        },
    };

    let fallback = stored
        .map(str::trim)
        .filter(|r| !r.is_empty() && *r != UNKNOWN_REGION)
        .unwrap_or(UNKNOWN_REGION);
    Resolved::fallback(fallback.to_string(), cause)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixed(Result<Option<String>>);

    impl ReverseGeocoder for Fixed {
        fn reverse(&self, _at: Coordinates) -> Result<Option<String>> {
            match &self.0 {
                Ok(v) => Ok(v.clone()),
                Err(_) => Err(Error::Unavailable {
                    service: Service::Geocoder,
                    message: "connection refused".to_string(),
                }),
            }
        }
    }

    fn taipei() -> Option<Coordinates> {
        Some(Coordinates::new(25.03, 121.56).unwrap())
    }

    #[test]
    fn test_place_name_prefers_city() {
        let body = json!({"address": {"city": "Taipei", "town": "Xinyi"}});
        assert_eq!(place_name(&body).as_deref(), Some("Taipei"));
        let body = json!({"address": {"town": "Jiufen"}});
        assert_eq!(place_name(&body).as_deref(), Some("Jiufen"));
        let body = json!({"address": {"village": "Smalltown"}});
        assert_eq!(place_name(&body), None);
        assert_eq!(place_name(&json!({"error": "Unable to geocode"})), None);
    }

    #[test]
    fn test_resolve_region_fresh() {
        let geo = Fixed(Ok(Some("Taipei".to_string())));
        assert_eq!(
            resolve_region(&geo, taipei(), None),
            Resolved::Fresh("Taipei".to_string())
        );
    }

    #[test]
    fn test_resolve_region_falls_back_to_unknown() {
        let failing = Fixed(Err(Error::Internal(String::new())));
        let r = resolve_region(&failing, taipei(), None);
        assert!(r.is_fallback());
        assert_eq!(r.value(), UNKNOWN_REGION);

        let miss = Fixed(Ok(None));
        assert_eq!(resolve_region(&miss, taipei(), None).value(), UNKNOWN_REGION);

        let unused = Fixed(Ok(Some("Taipei".to_string())));
        let r = resolve_region(&unused, None, None);
        assert_eq!(r.value(), UNKNOWN_REGION);
    }

    #[test]
    fn test_resolve_region_keeps_stored_region() {
        let failing = Fixed(Err(Error::Internal(String::new())));
        let r = resolve_region(&failing, taipei(), Some("Tainan"));
        assert!(r.is_fallback());
        assert_eq!(r.value(), "Tainan");

        let r = resolve_region(&failing, taipei(), Some(UNKNOWN_REGION));
        assert_eq!(r.value(), UNKNOWN_REGION);
    }

    #[test]
    fn test_coordinates_range() {
        assert!(Coordinates::new(91.0, 0.0).is_err());
        assert!(Coordinates::new(0.0, -181.0).is_err());
        assert!(Coordinates::new(-33.86, 151.2).is_ok());
    }
}

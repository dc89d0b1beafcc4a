//! Coordinate cache, lazy geocoding, and local-time rendering.
//!
//! Coordinates arrive two ways: pushed by the device while a session is
//! attached, and pulled on demand when a query needs them. Reverse geocoding
//! is deferred until a query actually wants an address. Everything tolerates
//! a missing hardware session by serving the last cache.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use tokio::time::Instant;
use tracing::{debug, warn};

use lumen_common::types::Coordinates;

use crate::hardware::{with_deadline, SharedHardware};
use crate::wake::WakeWordMatcher;

/// How long a fetched coordinate stays fresh.
pub const LOCATION_TTL: Duration = Duration::from_secs(5 * 60);

/// Reverse-geocoding seam; the HTTP implementation lives with the server
/// wiring.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn reverse(&self, coords: Coordinates) -> lumen_common::Result<String>;
}

/// What a query gets to know about the user's position.
#[derive(Debug, Clone)]
pub struct LocationSnapshot {
    pub coords: Coordinates,
    pub address: Option<String>,
}

struct CachedFix {
    coords: Coordinates,
    address: Option<String>,
    fetched_at: Instant,
}

#[derive(Default)]
struct Inner {
    fix: Option<CachedFix>,
    timezone: Option<Tz>,
}

pub struct LocationManager {
    matcher: Arc<WakeWordMatcher>,
    geocoder: Option<Arc<dyn Geocoder>>,
    ttl: Duration,
    inner: Mutex<Inner>,
}

impl LocationManager {
    pub fn new(matcher: Arc<WakeWordMatcher>, geocoder: Option<Arc<dyn Geocoder>>) -> Self {
        Self {
            matcher,
            geocoder,
            ttl: LOCATION_TTL,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn query_needs_location(&self, query: &str) -> bool {
        self.matcher.query_needs_location(query)
    }

    pub fn query_needs_geocoding(&self, query: &str) -> bool {
        self.matcher.query_needs_geocoding(query)
    }

    /// Device pushed a fresh coordinate. The cached address is dropped; it
    /// described the old position.
    pub fn update_coordinates(&self, coords: Coordinates) {
        let mut inner = self.inner.lock().expect("location lock");
        inner.fix = Some(CachedFix {
            coords,
            address: None,
            fetched_at: Instant::now(),
        });
    }

    /// Timezone setting pushed by the device, as an IANA zone name.
    pub fn set_timezone(&self, name: &str) {
        match name.parse::<Tz>() {
            Ok(tz) => {
                self.inner.lock().expect("location lock").timezone = Some(tz);
            }
            Err(_) => warn!(timezone = %name, "Unparseable timezone, keeping previous"),
        }
    }

    pub fn timezone_name(&self) -> Option<String> {
        self.inner
            .lock()
            .expect("location lock")
            .timezone
            .map(|tz| tz.name().to_string())
    }

    /// Local wall-clock rendering for the agent prompt; UTC when no timezone
    /// has been reported.
    pub fn local_time(&self) -> String {
        let timezone = self.inner.lock().expect("location lock").timezone;
        let format = "%A %H:%M";
        match timezone {
            Some(tz) => Utc::now().with_timezone(&tz).format(format).to_string(),
            None => Utc::now().format(format).to_string(),
        }
    }

    pub fn cached(&self) -> Option<LocationSnapshot> {
        let inner = self.inner.lock().expect("location lock");
        inner.fix.as_ref().map(|fix| LocationSnapshot {
            coords: fix.coords,
            address: fix.address.clone(),
        })
    }

    /// Bring the cache up to date for `query`: fetch a fresh coordinate when
    /// the cache is stale and hardware is available, then geocode if the
    /// query wants an address. Every failure degrades to whatever is cached.
    pub async fn refresh(
        &self,
        query: &str,
        hardware: Option<&SharedHardware>,
    ) -> Option<LocationSnapshot> {
        if !self.query_needs_location(query) {
            return None;
        }

        let stale = {
            let inner = self.inner.lock().expect("location lock");
            match inner.fix {
                Some(ref fix) => fix.fetched_at.elapsed() >= self.ttl,
                None => true,
            }
        };

        if stale {
            if let Some(hardware) = hardware {
                match with_deadline(hardware.latest_location()).await {
                    Ok(coords) => self.update_coordinates(coords),
                    Err(e) => debug!(error = %e, "Location fetch failed, using cache"),
                }
            }
        }

        if self.query_needs_geocoding(query) {
            self.geocode_cached().await;
        }

        self.cached()
    }

    async fn geocode_cached(&self) {
        let Some(ref geocoder) = self.geocoder else {
            return;
        };
        let coords = {
            let inner = self.inner.lock().expect("location lock");
            match inner.fix {
                Some(ref fix) if fix.address.is_none() => fix.coords,
                _ => return,
            }
        };
        match geocoder.reverse(coords).await {
            Ok(address) => {
                let mut inner = self.inner.lock().expect("location lock");
                if let Some(ref mut fix) = inner.fix {
                    fix.address = Some(address);
                }
            }
            Err(e) => debug!(error = %e, "Reverse geocoding failed"),
        }
    }
}

//! Client geolocation for log enrichment.

use crate::logging::TelemetryError;
use maxminddb::geoip2;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Location reported when no geolocation database is configured.
pub const GEO_DISABLED: &str = "Unknown location (GeoIP disabled)";

/// Location reported for an address the database does not know.
pub const UNKNOWN_LOCATION: &str = "Unknown location";

/// Location reported when the client address does not parse.
pub const INVALID_IP: &str = "Invalid IP address";

/// Where a GeoLite2 City database is looked for, in order.
pub const GEOIP_DB_PATHS: [&str; 4] = [
    "GeoLite2-City.mmdb",
    "data/GeoLite2-City.mmdb",
    "/usr/share/GeoIP/GeoLite2-City.mmdb",
    "/opt/GeoIP/GeoLite2-City.mmdb",
];

/// Resolves a client address to a human readable location.
pub trait GeoLocator: Send + Sync {
    /// Describe where `ip` is. Never fails; unknown inputs get a placeholder.
    fn locate(&self, ip: &str) -> String;
}

/// Locator used when no database is available.
///
/// Loopback and private addresses are reported as local; everything else as
/// [`GEO_DISABLED`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledGeoLocator;

impl GeoLocator for DisabledGeoLocator {
    fn locate(&self, ip: &str) -> String {
        match ip.parse::<IpAddr>() {
            Ok(addr) if is_local(addr) => "Local network".to_string(),
            _ => GEO_DISABLED.to_string(),
        }
    }
}

fn is_local(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

/// Lookups against a MaxMind City database, e.g. GeoLite2-City.
pub struct MaxMindGeoLocator {
    reader: maxminddb::Reader<Vec<u8>>,
    path: PathBuf,
}

impl MaxMindGeoLocator {
    /// Load a database file into memory.
    ///
    /// # Errors
    /// Returns error if the file is missing or not a MaxMind database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TelemetryError> {
        let path = path.as_ref();
        let reader =
            maxminddb::Reader::open_readfile(path).map_err(|e| TelemetryError::GeoDatabase {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            reader,
            path: path.to_path_buf(),
        })
    }

    /// Database file in use
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl GeoLocator for MaxMindGeoLocator {
    fn locate(&self, ip: &str) -> String {
        let Ok(addr) = ip.parse::<IpAddr>() else {
            return INVALID_IP.to_string();
        };
        let Ok(record) = self.reader.lookup::<geoip2::City>(addr) else {
            return UNKNOWN_LOCATION.to_string();
        };

        let country = record
            .country
            .as_ref()
            .and_then(|c| c.names.as_ref())
            .and_then(|names| names.get("en").copied());
        let city = record
            .city
            .as_ref()
            .and_then(|c| c.names.as_ref())
            .and_then(|names| names.get("en").copied());
        let coordinates = record
            .location
            .as_ref()
            .and_then(|l| Some((l.latitude?, l.longitude?)));

        describe_location(country, city, coordinates)
    }
}

impl std::fmt::Debug for MaxMindGeoLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaxMindGeoLocator")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Format a lookup as `Country - City (lat, lon)`, omitting missing parts.
#[must_use]
pub fn describe_location(
    country: Option<&str>,
    city: Option<&str>,
    coordinates: Option<(f64, f64)>,
) -> String {
    let mut location = String::new();
    for name in [country, city].into_iter().flatten().filter(|n| !n.is_empty()) {
        if !location.is_empty() {
            location.push_str(" - ");
        }
        location.push_str(name);
    }

    if let Some((lat, lon)) = coordinates.filter(|&(lat, lon)| lat != 0.0 || lon != 0.0) {
        if !location.is_empty() {
            location.push(' ');
        }
        location.push_str(&format!("({lat:.4}, {lon:.4})"));
    }

    if location.is_empty() {
        UNKNOWN_LOCATION.to_string()
    } else {
        location
    }
}

/// Open the first readable database among `paths`, or fall back to
/// [`DisabledGeoLocator`] with a warning.
pub fn load_geo_locator<P: AsRef<Path>>(paths: &[P]) -> Arc<dyn GeoLocator> {
    for path in paths {
        let path = path.as_ref();
        if !path.is_file() {
            continue;
        }
        match MaxMindGeoLocator::open(path) {
            Ok(locator) => {
                info!(path = %path.display(), "GeoIP database loaded");
                return Arc::new(locator);
            }
            Err(err) => warn!(error = %err, "Skipping unreadable GeoIP database"),
        }
    }

    warn!("GeoIP database not found, geographic location is disabled");
    Arc::new(DisabledGeoLocator)
}

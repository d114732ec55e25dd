//! # OkaProxy Telemetry
//!
//! Log subscriber setup with an optional rolling file sink, and the
//! geolocation hook used to enrich access and failure logs.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod geo;
pub mod logging;

pub use geo::{
    describe_location, load_geo_locator, DisabledGeoLocator, GeoLocator, MaxMindGeoLocator,
    GEOIP_DB_PATHS, GEO_DISABLED, INVALID_IP, UNKNOWN_LOCATION,
};
pub use logging::{init_logging, LogGuard, LogOutput, LoggingConfig, TelemetryError};

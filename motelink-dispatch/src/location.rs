use h3o::{CellIndex, LatLng, Resolution};
use ordered_float::NotNan;
use serde::Serialize;

/// Resolution of the H3 cell attached to published payloads.
pub const CELL_RESOLUTION: Resolution = Resolution::Ten;

/// A validated latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LocationFix {
    pub lat: NotNan<f64>,
    pub lon: NotNan<f64>,
}

impl LocationFix {
    /// `None` for NaN or out-of-range coordinates.
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return None;
        }

        Some(Self {
            lat: NotNan::new(lat).ok()?,
            lon: NotNan::new(lon).ok()?,
        })
    }

    pub fn cell(&self) -> Option<CellIndex> {
        LatLng::new(*self.lat, *self.lon)
            .ok()
            .map(|ll| ll.to_cell(CELL_RESOLUTION))
    }
}

/// Source of position and wall-clock time for the gateway.
pub trait LocationProvider: Send + Sync + 'static {
    fn current_location(&self) -> Option<LocationFix>;

    fn current_time(&self) -> jiff::Timestamp;
}

/// A gateway that does not move, optionally with a pinned clock.
#[derive(Debug, Clone, Default)]
pub struct StaticLocation {
    fix: Option<LocationFix>,
    pinned: Option<jiff::Timestamp>,
}

impl StaticLocation {
    pub fn new(fix: Option<LocationFix>) -> Self {
        Self { fix, pinned: None }
    }

    /// Report `timestamp` instead of the system clock.
    pub fn pinned_at(mut self, timestamp: jiff::Timestamp) -> Self {
        self.pinned = Some(timestamp);
        self
    }
}

impl LocationProvider for StaticLocation {
    fn current_location(&self) -> Option<LocationFix> {
        self.fix
    }

    fn current_time(&self) -> jiff::Timestamp {
        self.pinned.unwrap_or_else(jiff::Timestamp::now)
    }
}

/// Seconds since the UNIX epoch in the width the ack carries.
pub fn ack_timestamp(time: jiff::Timestamp) -> u32 {
    u32::try_from(time.as_second().max(0)).unwrap_or(u32::MAX)
}

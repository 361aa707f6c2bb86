//! GeoIndex: 4-D volume parsing and overlap testing.
//!
//! Grounded in `original_source/datanode/src/app/scd/geo.py`. The horizontal
//! index is a flat set of equal-level S2 cells (see `s2_adapter`), so
//! candidate-set intersection is a hash-set lookup over cells of the query.

mod s2_adapter;

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DssError;

pub use s2_adapter::CellId;

/// A 4-D region: time x altitude x horizontal footprint (a set of S2 cells
/// at a fixed level).
#[derive(Clone, Debug, PartialEq)]
pub struct Volume4 {
    pub time_start: Option<DateTime<Utc>>,
    pub time_end: Option<DateTime<Utc>>,
    pub altitude_lo: Option<f64>,
    pub altitude_hi: Option<f64>,
    pub cells: HashSet<CellId>,
}

impl Volume4 {
    pub fn unbounded(cells: HashSet<CellId>) -> Self {
        Self {
            time_start: None,
            time_end: None,
            altitude_lo: None,
            altitude_hi: None,
            cells,
        }
    }

    /// True iff `other`'s time and altitude intervals lie inside this
    /// volume's and `other`'s cells are a subset of this volume's (cell
    /// union containment). Mirrors `Volume4.contains` in `geo.py`.
    pub fn contains(&self, other: &Volume4) -> bool {
        if let (Some(lo), Some(olo)) = (self.altitude_lo, other.altitude_lo) {
            if olo < lo {
                return false;
            }
        } else if self.altitude_lo.is_some() {
            return false;
        }
        if let (Some(hi), Some(ohi)) = (self.altitude_hi, other.altitude_hi) {
            if ohi > hi {
                return false;
            }
        } else if self.altitude_hi.is_some() {
            return false;
        }
        if let (Some(ts), Some(ots)) = (self.time_start, other.time_start) {
            if ots < ts {
                return false;
            }
        } else if self.time_start.is_some() {
            return false;
        }
        if let (Some(te), Some(ote)) = (self.time_end, other.time_end) {
            if ote > te {
                return false;
            }
        } else if self.time_end.is_some() {
            return false;
        }
        other.cells.is_subset(&self.cells)
    }

    /// Strict interval intersection on time and altitude; missing endpoints
    /// are treated as infinite. Mirrors `overlaps_time_altitude` in
    /// `geo.py`.
    pub fn overlaps_time_altitude(&self, other: &Volume4) -> bool {
        if let (Some(my_start), Some(other_end)) = (self.time_start, other.time_end) {
            if other_end < my_start {
                return false;
            }
        }
        if let (Some(my_end), Some(other_start)) = (self.time_end, other.time_start) {
            if other_start > my_end {
                return false;
            }
        }
        if let (Some(my_lo), Some(other_hi)) = (self.altitude_lo, other.altitude_hi) {
            if other_hi < my_lo {
                return false;
            }
        }
        if let (Some(my_hi), Some(other_lo)) = (self.altitude_hi, other.altitude_lo) {
            if other_lo > my_hi {
                return false;
            }
        }
        true
    }

    pub fn cells_overlap(&self, other: &Volume4) -> bool {
        !self.cells.is_disjoint(&other.cells)
    }
}

/// Envelope of one or more Volume4s: min start, max end, min lo, max hi,
/// union of cells. Mirrors `combine_volume4s`. Caller must pass at least one
/// volume.
pub fn combine_volume4s(vol4s: &[Volume4]) -> Volume4 {
    let mut iter = vol4s.iter();
    let first = iter.next().expect("combine_volume4s requires at least one Volume4");
    let mut union = first.clone();
    for v in iter {
        union.time_start = min_option(union.time_start, v.time_start, false);
        union.time_end = min_option(union.time_end, v.time_end, true);
        union.altitude_lo = min_option_f64(union.altitude_lo, v.altitude_lo, false);
        union.altitude_hi = min_option_f64(union.altitude_hi, v.altitude_hi, true);
        for c in &v.cells {
            union.cells.insert(*c);
        }
    }
    union
}

fn min_option<T: Ord + Copy>(a: Option<T>, b: Option<T>, take_max: bool) -> Option<T> {
    match (a, b) {
        (None, x) | (x, None) => x,
        (Some(a), Some(b)) => Some(if take_max { a.max(b) } else { a.min(b) }),
    }
}

fn min_option_f64(a: Option<f64>, b: Option<f64>, take_max: bool) -> Option<f64> {
    match (a, b) {
        (None, x) | (x, None) => x,
        (Some(a), Some(b)) => Some(if take_max { a.max(b) } else { a.min(b) }),
    }
}

// ---------------------------------------------------------------------
// Wire JSON shapes, matching the literal field names of the extents format.
// ---------------------------------------------------------------------

#[derive(Deserialize, Debug)]
pub struct TimeJson {
    format: String,
    value: String,
}

#[derive(Deserialize, Debug)]
pub struct AltitudeJson {
    reference: String,
    units: String,
    value: f64,
}

#[derive(Deserialize, Debug)]
pub struct RadiusJson {
    units: String,
    value: f64,
}

#[derive(Deserialize, Debug)]
pub struct CirclePropertiesJson {
    radius: RadiusJson,
}

#[derive(Deserialize, Debug)]
pub struct PointGeometryJson {
    #[serde(rename = "type")]
    kind: String,
    coordinates: Vec<f64>,
}

#[derive(Deserialize, Debug)]
pub struct OutlineCircleJson {
    #[serde(rename = "type")]
    kind: String,
    geometry: PointGeometryJson,
    properties: CirclePropertiesJson,
}

#[derive(Deserialize, Debug)]
pub struct OutlinePolygonJson {
    #[serde(rename = "type")]
    kind: String,
    coordinates: Vec<Vec<[f64; 2]>>,
}

#[derive(Deserialize, Debug, Default)]
pub struct VolumeJson {
    outline_circle: Option<OutlineCircleJson>,
    outline_polygon: Option<OutlinePolygonJson>,
    altitude_lower: Option<AltitudeJson>,
    altitude_upper: Option<AltitudeJson>,
}

#[derive(Deserialize, Debug)]
pub struct Volume4Json {
    volume: VolumeJson,
    time_start: Option<TimeJson>,
    time_end: Option<TimeJson>,
}

fn parse_time(t: &Option<TimeJson>) -> Result<Option<DateTime<Utc>>, DssError> {
    let Some(t) = t else { return Ok(None) };
    if t.format != "RFC3339" {
        return Err(DssError::InvalidRequest("incorrect `format` in time; expected RFC3339".into()));
    }
    let parsed = DateTime::parse_from_rfc3339(&t.value)
        .map_err(|e| DssError::InvalidRequest(format!("could not parse time value `{}`: {e}", t.value)))?;
    Ok(Some(parsed.with_timezone(&Utc)))
}

fn parse_altitude(a: &Option<AltitudeJson>) -> Result<Option<f64>, DssError> {
    let Some(a) = a else { return Ok(None) };
    if a.reference != "W84" {
        return Err(DssError::InvalidRequest("incorrect `reference` in altitude; expected W84".into()));
    }
    if a.units != "M" {
        return Err(DssError::InvalidRequest("incorrect `units` in altitude; expected M".into()));
    }
    Ok(Some(a.value))
}

/// Parses a Volume4 JSON object (a `{volume, time_start, time_end}`
/// envelope) into a `Volume4`, covering the horizontal footprint at the
/// fixed `level`. Mirrors `expand_volume4` in `geo.py`.
pub fn expand_volume4(json: &Volume4Json, level: u8) -> Result<Volume4, DssError> {
    let has_circle = json.volume.outline_circle.is_some();
    let has_polygon = json.volume.outline_polygon.is_some();
    if has_circle == has_polygon {
        return Err(DssError::InvalidRequest(
            "expected exactly one of `outline_circle` or `outline_polygon` in volume".into(),
        ));
    }

    let cells = if let Some(circle) = &json.volume.outline_circle {
        if circle.kind != "Feature" {
            return Err(DssError::InvalidRequest("expected `outline_circle` to have type `Feature`".into()));
        }
        if circle.geometry.kind != "Point" {
            return Err(DssError::InvalidRequest("expected `outline_circle` geometry to have type `Point`".into()));
        }
        if circle.geometry.coordinates.len() != 2 {
            return Err(DssError::InvalidRequest(
                "expected 2 elements in `outline_circle` geometry coordinates".into(),
            ));
        }
        let lng = circle.geometry.coordinates[0];
        let lat = circle.geometry.coordinates[1];
        if !(-180.0..=180.0).contains(&lng) {
            return Err(DssError::InvalidRequest("circle center point longitude outside [-180, 180]".into()));
        }
        if !(-90.0..=90.0).contains(&lat) {
            return Err(DssError::InvalidRequest("circle center point latitude outside [-90, 90]".into()));
        }
        if circle.properties.radius.units != "M" {
            return Err(DssError::InvalidRequest("expected `radius` units of `outline_circle` to be M".into()));
        }
        let radius = circle.properties.radius.value;
        if radius < 0.0 {
            return Err(DssError::InvalidRequest("circle radius must be non-negative".into()));
        }
        s2_adapter::cover_circle(lat, lng, radius, level)
    } else {
        let polygon = json.volume.outline_polygon.as_ref().unwrap();
        if polygon.kind != "Polygon" {
            return Err(DssError::InvalidRequest("expected `outline_polygon` to have type `Polygon`".into()));
        }
        if polygon.coordinates.len() != 1 {
            return Err(DssError::InvalidRequest("expected exactly one ring in `outline_polygon` coordinates".into()));
        }
        let ring = &polygon.coordinates[0];
        if ring.len() < 4 {
            return Err(DssError::InvalidRequest("expected at least 4 coordinates in `outline_polygon` ring".into()));
        }
        if ring[0] != ring[ring.len() - 1] {
            return Err(DssError::InvalidRequest(
                "expected first and last coordinates of `outline_polygon` ring to match".into(),
            ));
        }
        for &[lng, lat] in ring.iter() {
            if !(-180.0..=180.0).contains(&lng) {
                return Err(DssError::InvalidRequest("polygon vertex longitude outside [-180, 180]".into()));
            }
            if !(-90.0..=90.0).contains(&lat) {
                return Err(DssError::InvalidRequest("polygon vertex latitude outside [-90, 90]".into()));
            }
        }
        let ring_lat_lng: Vec<(f64, f64)> = ring.iter().map(|&[lng, lat]| (lat, lng)).collect();
        s2_adapter::cover_polygon_bbox(&ring_lat_lng, level)
    };

    let time_start = parse_time(&json.time_start)?;
    let time_end = parse_time(&json.time_end)?;
    if let (Some(ts), Some(te)) = (time_start, time_end) {
        if ts > te {
            return Err(DssError::InvalidRequest("`time_start` must not be after `time_end`".into()));
        }
    }
    let altitude_lo = parse_altitude(&json.volume.altitude_lower)?;
    let altitude_hi = parse_altitude(&json.volume.altitude_upper)?;
    if let (Some(lo), Some(hi)) = (altitude_lo, altitude_hi) {
        if lo > hi {
            return Err(DssError::InvalidRequest("`altitude_lower` must not exceed `altitude_upper`".into()));
        }
    }

    Ok(Volume4 {
        time_start,
        time_end,
        altitude_lo,
        altitude_hi,
        cells,
    })
}

#[derive(Serialize, Deserialize, Debug)]
pub struct AreaOfInterestJson {
    pub area_of_interest: Volume4Json,
}

//! Thin wrapper over the `s2` crate (a Rust port of Google's S2 geometry
//! library). All use of the third-party crate's region/cap/rect types is
//! confined to this file; the rest of the crate only ever sees `CellId`, a
//! plain `u64` newtype, so the geometry dependency can't leak into the
//! store or domain model.

use std::collections::HashSet;

use s2::cap::Cap;
use s2::cellid::CellID;
use s2::latlng::LatLng;
use s2::rect::Rect;
use s2::region::RegionCoverer;

/// One S2 cell ID at the server's fixed level. `Copy`/`Eq`/`Hash`/`Ord` so it
/// can be a hashmap/hashset key directly.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct CellId(pub u64);

impl From<CellID> for CellId {
    fn from(c: CellID) -> Self {
        CellId(c.0)
    }
}

const EARTH_CIRCUMFERENCE_M: f64 = 40.075e6;
const RADIANS_PER_METER: f64 = 2.0 * std::f64::consts::PI / EARTH_CIRCUMFERENCE_M;

/// Covers a circle (center lat/lng in degrees, radius in meters) at a fixed
/// S2 level, mirroring `expand_volume4`'s `outline_circle` branch.
pub fn cover_circle(lat_deg: f64, lng_deg: f64, radius_m: f64, level: u8) -> HashSet<CellId> {
    let center = LatLng::from_degrees(lat_deg, lng_deg).to_point();
    let radius_angle = radius_m * RADIANS_PER_METER;
    let cap = Cap::from_center_angle(&center, &s1::Angle(radius_angle));
    let coverer = RegionCoverer {
        min_level: level,
        max_level: level,
        level_mod: 1,
        max_cells: 0,
    };
    coverer
        .covering(&cap)
        .0
        .into_iter()
        .map(CellId::from)
        .collect()
}

/// Covers the bounding rectangle of a polygon ring (lat/lng in degrees),
/// mirroring `expand_volume4`'s `outline_polygon` branch — the server
/// indexes the ring's bounding box, not its true shape: a conservative
/// over-approximation that widens fan-out but never drops a true overlap.
pub fn cover_polygon_bbox(ring_lat_lng_deg: &[(f64, f64)], level: u8) -> HashSet<CellId> {
    let mut rect = Rect::empty();
    for &(lat, lng) in ring_lat_lng_deg {
        rect = rect.add_point(&LatLng::from_degrees(lat, lng));
    }
    let coverer = RegionCoverer {
        min_level: level,
        max_level: level,
        level_mod: 1,
        max_cells: 0,
    };
    coverer
        .covering(&rect)
        .0
        .into_iter()
        .map(CellId::from)
        .collect()
}

//! Airport exit geometry.
//!
//! An [`AirportGeometry`] is the static, per-airport description the tracker
//! and aggregator work against: where the airport is, how close a flight must
//! be to count as "at" it, and the labeled boxes that mark each runway exit.
//! Every airport is described by the same data type; nothing here is
//! airport-specific code.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::classify::{self, Classification};
use crate::error::{Error, Result};

/// A longitude/latitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Longitude, degrees east.
    pub lon: f64,
    /// Latitude, degrees north.
    pub lat: f64,
}

impl Position {
    /// Create a new position.
    #[must_use]
    pub const fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

impl AsRef<Position> for Position {
    fn as_ref(&self) -> &Position {
        self
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lon, self.lat)
    }
}

/// An axis-aligned rectangle in longitude/latitude space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Western edge.
    pub lon_min: f64,
    /// Eastern edge.
    pub lon_max: f64,
    /// Southern edge.
    pub lat_min: f64,
    /// Northern edge.
    pub lat_max: f64,
}

impl Bounds {
    /// Rectangle spanning `lon_range`/`lat_range` on either side of `center`.
    #[must_use]
    pub fn around(center: Position, lon_range: f64, lat_range: f64) -> Self {
        Self {
            lon_min: center.lon - lon_range,
            lon_max: center.lon + lon_range,
            lat_min: center.lat - lat_range,
            lat_max: center.lat + lat_range,
        }
    }

    /// Strict containment; points on an edge are outside.
    #[must_use]
    pub fn contains(&self, position: Position) -> bool {
        self.lon_min < position.lon
            && position.lon < self.lon_max
            && self.lat_min < position.lat
            && position.lat < self.lat_max
    }

    /// Area in square degrees.
    #[must_use]
    pub fn area(&self) -> f64 {
        (self.lon_max - self.lon_min) * (self.lat_max - self.lat_min)
    }

    fn is_degenerate(&self) -> bool {
        !(self.lon_min < self.lon_max && self.lat_min < self.lat_max)
    }
}

/// A labeled box covering one physical runway exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitRegion {
    /// Exit label, unique within an airport (e.g. `B4`).
    pub label: String,
    /// The region itself.
    #[serde(flatten)]
    pub bounds: Bounds,
}

impl ExitRegion {
    /// Create a region from its label and edges.
    #[must_use]
    pub fn new(label: impl Into<String>, lon: (f64, f64), lat: (f64, f64)) -> Self {
        Self {
            label: label.into(),
            bounds: Bounds {
                lon_min: lon.0,
                lon_max: lon.1,
                lat_min: lat.0,
                lat_max: lat.1,
            },
        }
    }

    /// Whether `position` lies strictly inside this region.
    #[must_use]
    pub fn contains(&self, position: Position) -> bool {
        self.bounds.contains(position)
    }

    /// Area of the region in square degrees.
    #[must_use]
    pub fn area(&self) -> f64 {
        self.bounds.area()
    }
}

/// Externally supplied description of one airport.
///
/// This is the serialized form found in airport catalog files; it becomes an
/// [`AirportGeometry`] only after validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirportSpec {
    /// Airport code (IATA or ICAO).
    pub code: String,
    /// Number of runways.
    pub runway_count: u32,
    /// Reference point for proximity filtering.
    pub center: Position,
    /// Per-axis distance, in degrees, within which a flight is at the airport.
    pub proximity_tolerance: f64,
    /// Viewport for external plotting.
    pub plot_bounds: Bounds,
    /// Exit regions in catalog order.
    #[serde(default)]
    pub exit_regions: Vec<ExitRegion>,
}

/// Validated, immutable exit geometry for one airport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AirportGeometry {
    code: String,
    runway_count: u32,
    center: Position,
    proximity_tolerance: f64,
    plot_bounds: Bounds,
    exit_regions: Vec<ExitRegion>,
}

fn airport_code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Z0-9]{3,4}$").expect("airport code pattern is valid"))
}

impl AirportGeometry {
    /// Validate a spec and build the geometry from it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidGeometry`] if the code is malformed, there are
    /// no runways or exit regions, a label repeats, a region is degenerate, or
    /// the proximity tolerance is not positive.
    pub fn from_spec(spec: AirportSpec) -> Result<Self> {
        let invalid = |message: String| Error::invalid_geometry(spec.code.clone(), message);

        if !airport_code_pattern().is_match(&spec.code) {
            return Err(invalid(format!("malformed airport code '{}'", spec.code)));
        }
        if spec.runway_count == 0 {
            return Err(invalid("runway_count must be at least 1".to_string()));
        }
        if spec.exit_regions.is_empty() {
            return Err(invalid("no exit regions defined".to_string()));
        }
        if !(spec.proximity_tolerance.is_finite() && spec.proximity_tolerance > 0.0) {
            return Err(invalid(format!(
                "proximity_tolerance must be positive, got {}",
                spec.proximity_tolerance
            )));
        }

        let mut labels = std::collections::HashSet::new();
        for region in &spec.exit_regions {
            if !labels.insert(region.label.as_str()) {
                return Err(invalid(format!("duplicate exit label '{}'", region.label)));
            }
            if region.bounds.is_degenerate() {
                return Err(invalid(format!(
                    "exit region '{}' has min edges not below max edges",
                    region.label
                )));
            }
        }

        Ok(Self {
            code: spec.code,
            runway_count: spec.runway_count,
            center: spec.center,
            proximity_tolerance: spec.proximity_tolerance,
            plot_bounds: spec.plot_bounds,
            exit_regions: spec.exit_regions,
        })
    }

    /// The airport code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Number of runways.
    #[must_use]
    pub fn runway_count(&self) -> u32 {
        self.runway_count
    }

    /// Reference center.
    #[must_use]
    pub fn center(&self) -> Position {
        self.center
    }

    /// Proximity tolerance in degrees.
    #[must_use]
    pub fn proximity_tolerance(&self) -> f64 {
        self.proximity_tolerance
    }

    /// Plotting viewport.
    #[must_use]
    pub fn plot_bounds(&self) -> Bounds {
        self.plot_bounds
    }

    /// Exit regions in catalog order.
    #[must_use]
    pub fn exit_regions(&self) -> &[ExitRegion] {
        &self.exit_regions
    }

    /// Whether `position` is within the proximity tolerance of the center on
    /// both axes.
    #[must_use]
    pub fn is_near(&self, position: Position) -> bool {
        (position.lon - self.center.lon).abs() <= self.proximity_tolerance
            && (position.lat - self.center.lat).abs() <= self.proximity_tolerance
    }

    /// Classify a trail against this airport's exit regions.
    #[must_use]
    pub fn match_exit<'a, I>(&self, trail: I) -> Classification
    where
        I: IntoIterator<Item = &'a Position>,
    {
        classify::classify(trail, &self.exit_regions)
    }
}

/// San Diego International. Exit boxes measured from satellite imagery along
/// runway 27/9: the `B` exits on the terminal side, `C` on the cargo side.
#[must_use]
pub fn san_diego() -> AirportSpec {
    let center = Position::new(-117.1916, 32.734);
    let exits = [
        ("B1", (-117.177_617, -117.175_235), (32.729_318, 32.729_787)),
        ("B2", (-117.181_531, -117.180_608), (32.730_730, 32.730_974)),
        ("B4", (-117.185_061, -117.184_417), (32.731_588, 32.731_904)),
        ("B5", (-117.188_870, -117.188_205), (32.732_554, 32.732_843)),
        ("B6", (-117.191_916, -117.191_241), (32.733_303, 32.733_574)),
        ("B7", (-117.195_594, -117.194_394), (32.734_134, 32.734_332)),
        ("B8", (-117.199_045, -117.197_898), (32.734_973, 32.735_162)),
        ("B9", (-117.202_463, -117.201_218), (32.735_797, 32.736_023)),
        ("B10", (-117.204_457, -117.203_686), (32.736_104, 32.736_853)),
        ("C1", (-117.175_991, -117.175_154), (32.730_561, 32.731_398)),
        ("C2", (-117.177_143, -117.176_413), (32.730_885, 32.731_147)),
        ("C3", (-117.182_337, -117.181_650), (32.732_194, 32.732_505)),
        ("C4", (-117.184_657, -117.184_088), (32.732_736, 32.733_124)),
        ("C5", (-117.188_519, -117.187_875), (32.733_684, 32.734_009)),
        ("C6", (-117.191_190, -117.190_332), (32.734_370, 32.734_650)),
    ];

    AirportSpec {
        code: "SAN".to_string(),
        runway_count: 1,
        center,
        proximity_tolerance: 0.1,
        plot_bounds: Bounds::around(center, 0.018, 0.007),
        exit_regions: exits
            .into_iter()
            .map(|(label, lon, lat)| ExitRegion::new(label, lon, lat))
            .collect(),
    }
}

/// Airport specs compiled into the binary.
#[must_use]
pub fn builtin_specs() -> Vec<AirportSpec> {
    vec![san_diego()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_with(regions: Vec<ExitRegion>) -> AirportSpec {
        AirportSpec {
            code: "TST".to_string(),
            runway_count: 1,
            center: Position::new(0.0, 0.0),
            proximity_tolerance: 0.1,
            plot_bounds: Bounds::around(Position::new(0.0, 0.0), 0.01, 0.01),
            exit_regions: regions,
        }
    }

    #[test]
    fn test_bounds_contains_is_strict() {
        let bounds = Bounds::around(Position::new(0.0, 0.0), 1.0, 1.0);
        assert!(bounds.contains(Position::new(0.5, -0.5)));
        assert!(!bounds.contains(Position::new(1.0, 0.0)));
        assert!(!bounds.contains(Position::new(0.0, -1.0)));
        assert!(!bounds.contains(Position::new(2.0, 0.0)));
    }

    #[test]
    fn test_bounds_area() {
        let bounds = Bounds::around(Position::new(10.0, 10.0), 1.0, 0.5);
        assert!((bounds.area() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_from_spec_valid() {
        let geometry =
            AirportGeometry::from_spec(spec_with(vec![ExitRegion::new("A", (0.0, 1.0), (0.0, 1.0))]))
                .unwrap();
        assert_eq!(geometry.code(), "TST");
        assert_eq!(geometry.exit_regions().len(), 1);
        assert_eq!(geometry.runway_count(), 1);
    }

    #[test]
    fn test_from_spec_rejects_empty_regions() {
        let err = AirportGeometry::from_spec(spec_with(Vec::new())).unwrap_err();
        assert!(matches!(err, Error::InvalidGeometry { .. }));
        assert!(err.to_string().contains("no exit regions"));
    }

    #[test]
    fn test_from_spec_rejects_duplicate_labels() {
        let err = AirportGeometry::from_spec(spec_with(vec![
            ExitRegion::new("A", (0.0, 1.0), (0.0, 1.0)),
            ExitRegion::new("A", (2.0, 3.0), (0.0, 1.0)),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("duplicate exit label 'A'"));
    }

    #[test]
    fn test_from_spec_rejects_degenerate_region() {
        let err = AirportGeometry::from_spec(spec_with(vec![ExitRegion::new(
            "A",
            (1.0, 0.0),
            (0.0, 1.0),
        )]))
        .unwrap_err();
        assert!(err.to_string().contains("'A'"));
    }

    #[test]
    fn test_from_spec_rejects_bad_tolerance_and_code() {
        let mut spec = spec_with(vec![ExitRegion::new("A", (0.0, 1.0), (0.0, 1.0))]);
        spec.proximity_tolerance = 0.0;
        assert!(AirportGeometry::from_spec(spec.clone()).is_err());

        spec.proximity_tolerance = 0.1;
        spec.code = "san".to_string();
        assert!(AirportGeometry::from_spec(spec.clone()).is_err());

        spec.code = "SAN".to_string();
        spec.runway_count = 0;
        assert!(AirportGeometry::from_spec(spec).is_err());
    }

    #[test]
    fn test_is_near_uses_per_axis_tolerance() {
        let geometry =
            AirportGeometry::from_spec(spec_with(vec![ExitRegion::new("A", (0.0, 1.0), (0.0, 1.0))]))
                .unwrap();
        assert!(geometry.is_near(Position::new(0.1, -0.1)));
        assert!(geometry.is_near(Position::new(0.05, 0.09)));
        assert!(!geometry.is_near(Position::new(0.11, 0.0)));
        assert!(!geometry.is_near(Position::new(0.0, -0.2)));
    }

    #[test]
    fn test_san_diego_is_valid() {
        let geometry = AirportGeometry::from_spec(san_diego()).unwrap();
        assert_eq!(geometry.code(), "SAN");
        assert_eq!(geometry.exit_regions().len(), 15);
        assert!(geometry.is_near(geometry.center()));
        let view = geometry.plot_bounds();
        for region in geometry.exit_regions() {
            assert!(view.contains(Position::new(region.bounds.lon_min, region.bounds.lat_min)));
            assert!(view.contains(Position::new(region.bounds.lon_max, region.bounds.lat_max)));
        }
    }

    #[test]
    fn test_match_exit_delegates_to_classifier() {
        let geometry = AirportGeometry::from_spec(san_diego()).unwrap();
        let trail = [
            Position::new(-117.15, 32.72),
            Position::new(-117.1885, 32.7327),
            Position::new(-117.19, 32.74),
        ];
        assert_eq!(
            geometry.match_exit(&trail),
            Classification::Exit("B5".to_string())
        );
    }

    #[test]
    fn test_spec_deserialize() {
        let json = r#"{
            "code": "TST",
            "runway_count": 2,
            "center": {"lon": 1.0, "lat": 2.0},
            "proximity_tolerance": 0.5,
            "plot_bounds": {"lon_min": 0.0, "lon_max": 2.0, "lat_min": 1.0, "lat_max": 3.0},
            "exit_regions": [
                {"label": "E1", "lon_min": 0.1, "lon_max": 0.2, "lat_min": 1.1, "lat_max": 1.2}
            ]
        }"#;
        let spec: AirportSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.runway_count, 2);
        assert_eq!(spec.exit_regions[0].label, "E1");
        assert!((spec.exit_regions[0].bounds.lat_max - 1.2).abs() < 1e-12);
    }
}

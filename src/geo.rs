use crate::spot::areas;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Public world boundary dataset, features keyed by ISO alpha-3 code
pub const BOUNDARY_URL: &str =
    "https://raw.githubusercontent.com/python-visualization/folium-example-data/main/world_countries.json";

/// The fetch sits on the rendering path, so it must give up quickly
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum GeoError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("GeoJSON parsing failed: {0}")]
    Parsing(#[from] serde_json::Error),
    #[error("invalid boundary data: {0}")]
    InvalidResponse(String),
}

/// GeoJSON position, `[longitude, latitude]`
pub type Position = [f64; 2];

/// Closed linear ring, first and last position equal
pub type Ring = Vec<Position>;

/// Country outline geometry. Each polygon part is a list of rings, the
/// first exterior, the rest holes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Polygon(Vec<Ring>),
    MultiPolygon(Vec<Vec<Ring>>),
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    id: Option<String>,
    geometry: serde_json::Value,
}

/// One country boundary, ready to merge with price data
#[derive(Debug, Clone)]
pub struct Boundary {
    pub region_code: String,
    pub short_code: &'static str,
    pub name: &'static str,
    /// Point guaranteed to lie inside the outline, for label placement
    pub label: Position,
    pub geometry: Geometry,
}

/// Boundary joined with its price summary; `mean_value` stays `None`
/// for countries the generator produced no data for, which render as
/// uncolored polygons.
#[derive(Debug, Clone, Serialize)]
pub struct MapRegion {
    pub region_code: String,
    pub short_code: String,
    pub name: String,
    pub mean_value: Option<f64>,
    pub label_lon: f64,
    pub label_lat: f64,
    pub geometry: Geometry,
}

pub struct GeoClient {
    client: reqwest::Client,
    url: String,
}

impl GeoClient {
    pub fn new() -> Self {
        Self::with_url(BOUNDARY_URL)
    }

    /// Client against a non-default dataset location, for tests
    pub fn with_url(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .expect("reqwest client construction");
        Self {
            client,
            url: url.into(),
        }
    }

    /// Fetch and parse the boundary dataset, filtered to the countries
    /// in the reference table. Any failure here means "no map this
    /// render", never a crash: callers log and skip the map.
    pub async fn fetch_boundaries(&self) -> Result<Vec<Boundary>, GeoError> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        parse_boundaries(&body)
    }
}

impl Default for GeoClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a GeoJSON FeatureCollection into the European boundary set.
/// Features with ids outside the reference table are skipped; a document
/// containing none of our regions is treated as invalid.
pub fn parse_boundaries(json: &str) -> Result<Vec<Boundary>, GeoError> {
    let collection: FeatureCollection = serde_json::from_str(json)?;

    let mut boundaries = Vec::new();
    for feature in collection.features {
        let Some(id) = feature.id else { continue };
        let Some(country) = areas::get_by_a3(&id) else {
            continue;
        };
        let geometry: Geometry = serde_json::from_value(feature.geometry)?;
        let Some(label) = representative_point(&geometry) else {
            continue;
        };
        boundaries.push(Boundary {
            region_code: id,
            short_code: country.a2,
            name: country.name,
            label,
            geometry,
        });
    }

    if boundaries.is_empty() {
        return Err(GeoError::InvalidResponse(
            "no known regions in boundary data".to_string(),
        ));
    }
    Ok(boundaries)
}

/// Left-join per-country means onto the boundary set. Means without a
/// boundary are dropped; boundaries without a mean keep `None`.
pub fn join_summaries(boundaries: Vec<Boundary>, means: &HashMap<String, f64>) -> Vec<MapRegion> {
    boundaries
        .into_iter()
        .map(|boundary| MapRegion {
            mean_value: means.get(boundary.short_code).copied(),
            region_code: boundary.region_code,
            short_code: boundary.short_code.to_string(),
            name: boundary.name.to_string(),
            label_lon: boundary.label[0],
            label_lat: boundary.label[1],
            geometry: boundary.geometry,
        })
        .collect()
}

/// Absolute shoelace area of a ring
fn ring_area(ring: &Ring) -> f64 {
    let mut doubled = 0.0;
    for edge in ring.windows(2) {
        doubled += edge[0][0] * edge[1][1] - edge[1][0] * edge[0][1];
    }
    (doubled / 2.0).abs()
}

/// Deterministic point guaranteed to lie inside the geometry.
///
/// The centroid of a concave or multi-part outline can fall outside it,
/// so instead: take the largest polygon part, cast a horizontal line
/// through the vertical middle of its exterior ring, and return the
/// midpoint of the widest even-odd interior interval. Holes participate
/// in the crossing count, so the point cannot land in one.
pub fn representative_point(geometry: &Geometry) -> Option<Position> {
    let parts: Vec<&Vec<Ring>> = match geometry {
        Geometry::Polygon(rings) => vec![rings],
        Geometry::MultiPolygon(parts) => parts.iter().collect(),
    };

    let part = parts
        .into_iter()
        .filter(|rings| rings.first().is_some_and(|outer| outer.len() >= 4))
        .max_by(|a, b| {
            ring_area(&a[0])
                .partial_cmp(&ring_area(&b[0]))
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;

    let outer = &part[0];
    let min_y = outer.iter().map(|p| p[1]).fold(f64::INFINITY, f64::min);
    let max_y = outer.iter().map(|p| p[1]).fold(f64::NEG_INFINITY, f64::max);
    if !(max_y > min_y) {
        return None;
    }

    // Nudge the scanline off any vertex so crossings are counted once
    let mut scan_y = (min_y + max_y) / 2.0;
    for _ in 0..64 {
        if !part.iter().flatten().any(|p| p[1] == scan_y) {
            break;
        }
        scan_y += (max_y - min_y) * 1e-7;
    }

    let mut crossings = Vec::new();
    for ring in part {
        for edge in ring.windows(2) {
            let (a, b) = (edge[0], edge[1]);
            if (a[1] > scan_y) != (b[1] > scan_y) {
                crossings.push(a[0] + (scan_y - a[1]) * (b[0] - a[0]) / (b[1] - a[1]));
            }
        }
    }
    crossings.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    crossings
        .chunks_exact(2)
        .max_by(|a, b| {
            (a[1] - a[0])
                .partial_cmp(&(b[1] - b[0]))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|widest| [(widest[0] + widest[1]) / 2.0, scan_y])
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Even-odd containment check, used to verify label placement
    fn contains(part: &[Ring], point: Position) -> bool {
        let mut inside = false;
        for ring in part {
            for edge in ring.windows(2) {
                let (a, b) = (edge[0], edge[1]);
                if (a[1] > point[1]) != (b[1] > point[1]) {
                    let x = a[0] + (point[1] - a[1]) * (b[0] - a[0]) / (b[1] - a[1]);
                    if x > point[0] {
                        inside = !inside;
                    }
                }
            }
        }
        inside
    }

    fn square(x0: f64, y0: f64, size: f64) -> Ring {
        vec![
            [x0, y0],
            [x0 + size, y0],
            [x0 + size, y0 + size],
            [x0, y0 + size],
            [x0, y0],
        ]
    }

    const FIXTURE: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "id": "DEU",
                "properties": {"name": "Germany"},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[6.0, 47.0], [15.0, 47.0], [15.0, 55.0], [6.0, 55.0], [6.0, 47.0]]]
                }
            },
            {
                "type": "Feature",
                "id": "FRA",
                "properties": {"name": "France"},
                "geometry": {
                    "type": "MultiPolygon",
                    "coordinates": [
                        [[[ -5.0, 42.0], [8.0, 42.0], [8.0, 51.0], [-5.0, 51.0], [-5.0, 42.0]]],
                        [[[8.5, 41.3], [9.6, 41.3], [9.6, 43.0], [8.5, 43.0], [8.5, 41.3]]]
                    ]
                }
            },
            {
                "type": "Feature",
                "id": "USA",
                "properties": {"name": "United States of America"},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[-125.0, 25.0], [-66.0, 25.0], [-66.0, 49.0], [-125.0, 49.0], [-125.0, 25.0]]]
                }
            }
        ]
    }"#;

    #[test]
    fn test_parse_filters_to_reference_table() {
        let boundaries = parse_boundaries(FIXTURE).unwrap();

        assert_eq!(boundaries.len(), 2);
        assert_eq!(boundaries[0].region_code, "DEU");
        assert_eq!(boundaries[0].short_code, "DE");
        assert_eq!(boundaries[0].name, "Germany");
        assert_eq!(boundaries[1].short_code, "FR");
        assert!(!boundaries.iter().any(|b| b.region_code == "USA"));
    }

    #[test]
    fn test_parse_garbage_is_error() {
        assert!(matches!(
            parse_boundaries("not geojson at all"),
            Err(GeoError::Parsing(_))
        ));
    }

    #[test]
    fn test_parse_without_known_regions_is_error() {
        let empty = r#"{"type": "FeatureCollection", "features": []}"#;
        assert!(matches!(
            parse_boundaries(empty),
            Err(GeoError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_join_is_left_outer_on_boundaries() {
        let boundaries = parse_boundaries(FIXTURE).unwrap();
        let mut means = HashMap::new();
        means.insert("DE".to_string(), 42.5);
        means.insert("IT".to_string(), 99.0); // no boundary in fixture

        let regions = join_summaries(boundaries, &means);

        assert_eq!(regions.len(), 2);
        let de = regions.iter().find(|r| r.short_code == "DE").unwrap();
        assert_eq!(de.mean_value, Some(42.5));
        let fr = regions.iter().find(|r| r.short_code == "FR").unwrap();
        assert_eq!(fr.mean_value, None);
        assert!(!regions.iter().any(|r| r.short_code == "IT"));
    }

    #[test]
    fn test_representative_point_inside_concave_shape() {
        // U-shaped outline whose centroid falls in the open middle
        let u_shape = vec![vec![
            [0.0, 0.0],
            [4.0, 0.0],
            [4.0, 4.0],
            [3.0, 4.0],
            [3.0, 1.0],
            [1.0, 1.0],
            [1.0, 4.0],
            [0.0, 4.0],
            [0.0, 0.0],
        ]];
        let geometry = Geometry::Polygon(u_shape.clone());

        let point = representative_point(&geometry).unwrap();
        assert!(contains(&u_shape, point));
        // the open middle of the U is not a valid label spot
        assert!(!contains(&u_shape, [2.0, 2.0]));
    }

    #[test]
    fn test_representative_point_picks_largest_part() {
        let geometry =
            Geometry::MultiPolygon(vec![vec![square(0.0, 0.0, 1.0)], vec![square(10.0, 10.0, 5.0)]]);

        let point = representative_point(&geometry).unwrap();
        assert!(contains(&[square(10.0, 10.0, 5.0)], point));
    }

    #[test]
    fn test_representative_point_avoids_hole() {
        // 10x10 square with a wide hole through the middle band
        let part = vec![square(0.0, 0.0, 10.0), square(1.0, 3.0, 4.0)];
        let geometry = Geometry::Polygon(part.clone());

        let point = representative_point(&geometry).unwrap();
        assert!(contains(&part, point));
    }

    #[test]
    fn test_representative_point_degenerate_geometry() {
        assert!(representative_point(&Geometry::Polygon(vec![])).is_none());
        let flat = vec![vec![[0.0, 1.0], [2.0, 1.0], [4.0, 1.0], [0.0, 1.0]]];
        assert!(representative_point(&Geometry::Polygon(flat)).is_none());
    }

    #[test]
    fn test_geometry_round_trips_as_geojson() {
        let json = r#"{"type":"Polygon","coordinates":[[[0.0,0.0],[1.0,0.0],[1.0,1.0],[0.0,0.0]]]}"#;
        let geometry: Geometry = serde_json::from_str(json).unwrap();
        assert_eq!(serde_json::to_string(&geometry).unwrap(), json);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_error_not_panic() {
        // discard port, nothing listens there
        let client = GeoClient::with_url("http://127.0.0.1:9/world.json");
        assert!(matches!(
            client.fetch_boundaries().await,
            Err(GeoError::Request(_))
        ));
    }
}

//! Canonical footprint representation.
//!
//! Providers describe footprints as GeoJSON, WKT, bbox arrays or plain
//! `"minx,miny,maxx,maxy"` strings. Everything is normalized to [`Geometry`]
//! on the way in, and rendered back to GeoJSON or WKT when a query template
//! needs it.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

/// A search area or product footprint in WGS84 lon/lat degrees.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    BBox {
        min_x: f64,
        min_y: f64,
        max_x: f64,
        max_y: f64,
    },
    /// Outer ring of a polygon, `[lon, lat]` pairs.
    Polygon(Vec<[f64; 2]>),
}

/// Bounds as `(min_x, min_y, max_x, max_y)`.
pub type Bounds = (f64, f64, f64, f64);

impl Geometry {
    /// Creates a bounding box, reordering corners if needed.
    pub fn bbox(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self::BBox {
            min_x: x1.min(x2),
            min_y: y1.min(y2),
            max_x: x1.max(x2),
            max_y: y1.max(y2),
        }
    }

    /// Parses `"minx,miny,maxx,maxy"`.
    pub fn parse_bbox(text: &str) -> Option<Self> {
        let parts: Vec<f64> = text
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .ok()?;
        match parts.as_slice() {
            [a, b, c, d] => Some(Self::bbox(*a, *b, *c, *d)),
            _ => None,
        }
    }

    /// Reads a geometry from a JSON value.
    ///
    /// Accepts GeoJSON objects (`Point`, `Polygon`, `MultiPolygon` whose first
    /// polygon is kept), four-number bbox arrays, and bbox strings.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Self::parse_bbox(s),
            Value::Array(items) if items.len() == 4 => {
                let nums: Vec<f64> = items.iter().filter_map(Value::as_f64).collect();
                (nums.len() == 4).then(|| Self::bbox(nums[0], nums[1], nums[2], nums[3]))
            }
            Value::Object(obj) => {
                let coords = obj.get("coordinates")?;
                match obj.get("type")?.as_str()? {
                    "Point" => {
                        let p = point(coords)?;
                        Some(Self::bbox(p[0], p[1], p[0], p[1]))
                    }
                    "Polygon" => ring(coords.get(0)?).map(Self::Polygon),
                    "MultiPolygon" => ring(coords.get(0)?.get(0)?).map(Self::Polygon),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Returns `(min_x, min_y, max_x, max_y)`.
    pub fn bounds(&self) -> Bounds {
        match self {
            Self::BBox {
                min_x,
                min_y,
                max_x,
                max_y,
            } => (*min_x, *min_y, *max_x, *max_y),
            Self::Polygon(ring) => ring.iter().fold(
                (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
                |(a, b, c, d), [x, y]| (a.min(*x), b.min(*y), c.max(*x), d.max(*y)),
            ),
        }
    }

    /// Bounding-box intersection test (edges touching count as intersecting).
    pub fn intersects_bbox(&self, other: &Geometry) -> bool {
        let (a_min_x, a_min_y, a_max_x, a_max_y) = self.bounds();
        let (b_min_x, b_min_y, b_max_x, b_max_y) = other.bounds();
        a_min_x <= b_max_x && b_min_x <= a_max_x && a_min_y <= b_max_y && b_min_y <= a_max_y
    }

    fn exterior(&self) -> Vec<[f64; 2]> {
        match self {
            Self::BBox {
                min_x,
                min_y,
                max_x,
                max_y,
            } => vec![
                [*min_x, *min_y],
                [*max_x, *min_y],
                [*max_x, *max_y],
                [*min_x, *max_y],
                [*min_x, *min_y],
            ],
            Self::Polygon(ring) => {
                let mut ring = ring.clone();
                if ring.first() != ring.last() {
                    if let Some(first) = ring.first().copied() {
                        ring.push(first);
                    }
                }
                ring
            }
        }
    }

    /// GeoJSON `Polygon` object.
    pub fn to_geojson(&self) -> Value {
        let ring: Vec<Value> = self.exterior().iter().map(|[x, y]| json!([x, y])).collect();
        json!({ "type": "Polygon", "coordinates": [ring] })
    }

    /// WKT `POLYGON ((...))` text.
    pub fn to_wkt(&self) -> String {
        let coords: Vec<String> = self
            .exterior()
            .iter()
            .map(|[x, y]| format!("{} {}", x, y))
            .collect();
        format!("POLYGON (({}))", coords.join(", "))
    }

    /// `"minx,miny,maxx,maxy"`.
    pub fn bbox_string(&self) -> String {
        let (a, b, c, d) = self.bounds();
        format!("{},{},{},{}", a, b, c, d)
    }
}

fn point(value: &Value) -> Option<[f64; 2]> {
    Some([value.get(0)?.as_f64()?, value.get(1)?.as_f64()?])
}

fn ring(value: &Value) -> Option<Vec<[f64; 2]>> {
    let points: Option<Vec<[f64; 2]>> = value.as_array()?.iter().map(point).collect();
    points.filter(|p| !p.is_empty())
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wkt())
    }
}

impl Serialize for Geometry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_geojson().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Geometry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_json(&value)
            .ok_or_else(|| serde::de::Error::custom("unsupported geometry representation"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bbox_string_normalizes_corners() {
        let g = Geometry::parse_bbox("10, 50, 0, 40").unwrap();
        assert_eq!(g.bounds(), (0.0, 40.0, 10.0, 50.0));
        assert!(Geometry::parse_bbox("1,2,3").is_none());
        assert!(Geometry::parse_bbox("a,b,c,d").is_none());
    }

    #[test]
    fn test_from_geojson_polygon() {
        let v = json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [2.0, 0.0], [2.0, 1.0], [0.0, 0.0]]]
        });
        let g = Geometry::from_json(&v).unwrap();
        assert_eq!(g.bounds(), (0.0, 0.0, 2.0, 1.0));
    }

    #[test]
    fn test_from_geojson_multipolygon_takes_first() {
        let v = json!({
            "type": "MultiPolygon",
            "coordinates": [
                [[[5.0, 5.0], [6.0, 5.0], [6.0, 6.0], [5.0, 5.0]]],
                [[[50.0, 50.0], [60.0, 50.0], [60.0, 60.0], [50.0, 50.0]]]
            ]
        });
        let g = Geometry::from_json(&v).unwrap();
        assert_eq!(g.bounds(), (5.0, 5.0, 6.0, 6.0));
    }

    #[test]
    fn test_from_bbox_array_and_point() {
        let g = Geometry::from_json(&json!([1, 2, 3, 4])).unwrap();
        assert_eq!(g, Geometry::bbox(1.0, 2.0, 3.0, 4.0));
        let p = Geometry::from_json(&json!({"type": "Point", "coordinates": [7.5, 8.5]})).unwrap();
        assert_eq!(p.bounds(), (7.5, 8.5, 7.5, 8.5));
    }

    #[test]
    fn test_wkt_closes_ring() {
        let g = Geometry::bbox(0.0, 0.0, 1.0, 1.0);
        assert_eq!(g.to_wkt(), "POLYGON ((0 0, 1 0, 1 1, 0 1, 0 0))");
        let open = Geometry::Polygon(vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]]);
        assert!(open.to_wkt().ends_with("0 0))"));
    }

    #[test]
    fn test_intersects_bbox() {
        let a = Geometry::bbox(0.0, 0.0, 10.0, 10.0);
        assert!(a.intersects_bbox(&Geometry::bbox(5.0, 5.0, 20.0, 20.0)));
        assert!(a.intersects_bbox(&Geometry::bbox(10.0, 10.0, 20.0, 20.0)));
        assert!(!a.intersects_bbox(&Geometry::bbox(11.0, 11.0, 20.0, 20.0)));
    }

    #[test]
    fn test_serde_roundtrip_through_geojson() {
        let g = Geometry::bbox(0.0, 0.0, 1.0, 1.0);
        let text = serde_json::to_string(&g).unwrap();
        let back: Geometry = serde_json::from_str(&text).unwrap();
        assert_eq!(back.bounds(), g.bounds());
    }
}

//! Area of interest: user geometry read from a Shapefile or GeoJSON file,
//! merged into a single multipolygon with its bounding box.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use geo::{
    Area, BooleanOps, BoundingRect, Coord, CoordsIter, Geometry, LineString, MapCoords,
    MultiPolygon, Polygon,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use shapefile::{PolygonRing, Shape};

use crate::domain::BoundingBox;
use crate::error::LandsatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Crs {
    pub epsg: u32,
}

impl Crs {
    pub const WGS84: Crs = Crs { epsg: 4326 };

    pub fn epsg(epsg: u32) -> Self {
        Self { epsg }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg)
    }
}

#[derive(Debug, Clone)]
pub struct AreaOfInterest {
    geometry: MultiPolygon<f64>,
    crs: Crs,
    bbox: BoundingBox,
}

impl AreaOfInterest {
    /// Unions every areal part of `parts` into one multipolygon.
    ///
    /// Points and lines are rejected, as are inputs whose union has no area.
    pub fn from_geometries(parts: Vec<Geometry<f64>>, crs: Crs) -> Result<Self, LandsatError> {
        let mut polygons = Vec::new();
        for part in parts {
            collect_polygons(part, &mut polygons)?;
        }
        if polygons.is_empty() {
            return Err(LandsatError::InvalidGeometry(
                "no polygon geometry in input".to_string(),
            ));
        }
        let all_finite = polygons
            .iter()
            .flat_map(|polygon| polygon.coords_iter())
            .all(|coord| coord.x.is_finite() && coord.y.is_finite());
        if !all_finite {
            return Err(LandsatError::InvalidGeometry(
                "geometry contains non-finite coordinates".to_string(),
            ));
        }

        let geometry = polygons
            .into_iter()
            .fold(MultiPolygon::new(Vec::new()), |acc, polygon| {
                acc.union(&polygon)
            });
        if geometry.0.is_empty() || geometry.unsigned_area() <= 0.0 {
            return Err(LandsatError::InvalidGeometry(
                "geometry union is empty".to_string(),
            ));
        }
        let rect = geometry.bounding_rect().ok_or_else(|| {
            LandsatError::InvalidGeometry("geometry has no bounding box".to_string())
        })?;

        Ok(Self {
            geometry,
            crs,
            bbox: BoundingBox::from_rect(rect),
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, LandsatError> {
        let (parts, crs) = match extension(path).as_deref() {
            Some("shp") => read_shapefile(path)?,
            Some("geojson") | Some("json") => read_geojson(path)?,
            _ => {
                return Err(LandsatError::InvalidGeometry(format!(
                    "unsupported area file (expected .shp or .geojson): {}",
                    path.display()
                )));
            }
        };
        Self::from_geometries(parts, crs)
    }

    pub fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    pub fn to_crs(&self, target: Crs) -> Result<Self, LandsatError> {
        if self.crs == target {
            return Ok(self.clone());
        }
        let geometry = reproject(&self.geometry, self.crs, target)?;
        Self::from_geometries(vec![Geometry::MultiPolygon(geometry)], target)
    }
}

fn collect_polygons(
    geometry: Geometry<f64>,
    out: &mut Vec<Polygon<f64>>,
) -> Result<(), LandsatError> {
    match geometry {
        Geometry::Polygon(polygon) => out.push(polygon),
        Geometry::MultiPolygon(multi) => out.extend(multi.0),
        Geometry::Rect(rect) => out.push(rect.to_polygon()),
        Geometry::Triangle(triangle) => out.push(triangle.to_polygon()),
        Geometry::GeometryCollection(collection) => {
            for inner in collection.0 {
                collect_polygons(inner, out)?;
            }
        }
        Geometry::Point(_) | Geometry::MultiPoint(_) => {
            return Err(LandsatError::InvalidGeometry(
                "point geometries do not describe an area".to_string(),
            ));
        }
        Geometry::Line(_) | Geometry::LineString(_) | Geometry::MultiLineString(_) => {
            return Err(LandsatError::InvalidGeometry(
                "line geometries do not describe an area".to_string(),
            ));
        }
    }
    Ok(())
}

fn reproject(
    geometry: &MultiPolygon<f64>,
    from: Crs,
    to: Crs,
) -> Result<MultiPolygon<f64>, LandsatError> {
    let proj = proj::Proj::new_known_crs(&from.to_string(), &to.to_string(), None)
        .map_err(|err| LandsatError::UnsupportedCrs(format!("{from} -> {to}: {err}")))?;
    geometry
        .try_map_coords(|coord| {
            proj.convert((coord.x, coord.y))
                .map(|(x, y)| Coord { x, y })
        })
        .map_err(|err| LandsatError::InvalidGeometry(format!("projection failed: {err}")))
}

pub(crate) fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

fn read_shapefile(path: &Path) -> Result<(Vec<Geometry<f64>>, Crs), LandsatError> {
    let crs = shapefile_crs(path)?;
    let mut reader = shapefile::Reader::from_path(path).map_err(|err| {
        LandsatError::InvalidGeometry(format!("open shapefile {}: {err}", path.display()))
    })?;
    let mut parts = Vec::new();
    for result in reader.iter_shapes_and_records() {
        let (shape, _record) = result
            .map_err(|err| LandsatError::InvalidGeometry(format!("read shape: {err}")))?;
        match shape_to_geometry(shape) {
            Some(geometry) => parts.push(geometry),
            None => {
                return Err(LandsatError::InvalidGeometry(
                    "shapefile contains non-polygon shapes".to_string(),
                ));
            }
        }
    }
    Ok((parts, crs))
}

fn read_geojson(path: &Path) -> Result<(Vec<Geometry<f64>>, Crs), LandsatError> {
    let content = fs::read_to_string(path)
        .map_err(|err| LandsatError::Filesystem(format!("read {}: {err}", path.display())))?;
    let geojson: geojson::GeoJson = content
        .parse()
        .map_err(|err| LandsatError::InvalidGeometry(format!("parse GeoJSON: {err}")))?;
    let crs = geojson_crs(&geojson)?;
    let collection = geo::GeometryCollection::<f64>::try_from(&geojson)
        .map_err(|err| LandsatError::InvalidGeometry(format!("convert GeoJSON: {err}")))?;
    Ok((collection.0, crs))
}

/// Converts the polygon flavours of a shapefile shape. Inner rings attach to
/// the outer ring that precedes them.
pub(crate) fn shape_to_geometry(shape: Shape) -> Option<Geometry<f64>> {
    let rings = match shape {
        Shape::Polygon(polygon) => rings_of(polygon.rings(), |p| Coord { x: p.x, y: p.y }),
        Shape::PolygonM(polygon) => rings_of(polygon.rings(), |p| Coord { x: p.x, y: p.y }),
        Shape::PolygonZ(polygon) => rings_of(polygon.rings(), |p| Coord { x: p.x, y: p.y }),
        _ => return None,
    };

    let mut polygons: Vec<Polygon<f64>> = Vec::new();
    for (is_outer, ring) in rings {
        match polygons.last_mut() {
            Some(last) if !is_outer => last.interiors_push(ring),
            _ => polygons.push(Polygon::new(ring, Vec::new())),
        }
    }
    Some(Geometry::MultiPolygon(MultiPolygon::new(polygons)))
}

fn rings_of<P>(
    rings: &[PolygonRing<P>],
    to_coord: impl Fn(&P) -> Coord<f64>,
) -> Vec<(bool, LineString<f64>)> {
    rings
        .iter()
        .map(|ring| {
            let coords = ring.points().iter().map(&to_coord).collect::<Vec<_>>();
            (
                matches!(ring, PolygonRing::Outer(_)),
                LineString::from(coords),
            )
        })
        .collect()
}

/// Reads the CRS from the sidecar `.prj`; a missing file means WGS84.
pub(crate) fn shapefile_crs(path: &Path) -> Result<Crs, LandsatError> {
    let prj_path = path.with_extension("prj");
    if !prj_path.exists() {
        return Ok(Crs::WGS84);
    }
    let content = fs::read_to_string(&prj_path).map_err(|err| {
        LandsatError::Filesystem(format!("read {}: {err}", prj_path.display()))
    })?;
    parse_prj(&content)
}

pub(crate) fn parse_prj(wkt: &str) -> Result<Crs, LandsatError> {
    static AUTHORITY: OnceLock<Regex> = OnceLock::new();
    let authority = AUTHORITY.get_or_init(|| {
        Regex::new(r#"AUTHORITY\[\s*"EPSG"\s*,\s*"?(\d+)"?\s*\]"#).expect("valid regex")
    });

    // The outermost AUTHORITY comes last; earlier ones belong to datum and spheroid.
    if let Some(code) = authority
        .captures_iter(wkt)
        .last()
        .and_then(|caps| caps.get(1))
        .and_then(|code| code.as_str().parse::<u32>().ok())
    {
        return Ok(Crs::epsg(code));
    }
    if wkt.trim_start().starts_with("PROJCS") {
        return Err(LandsatError::UnsupportedCrs(
            "projected .prj without an EPSG authority".to_string(),
        ));
    }
    Ok(Crs::WGS84)
}

pub(crate) fn geojson_crs(geojson: &geojson::GeoJson) -> Result<Crs, LandsatError> {
    let members = match geojson {
        geojson::GeoJson::FeatureCollection(fc) => fc.foreign_members.as_ref(),
        geojson::GeoJson::Feature(feature) => feature.foreign_members.as_ref(),
        geojson::GeoJson::Geometry(geometry) => geometry.foreign_members.as_ref(),
    };
    let Some(name) = members
        .and_then(|members| members.get("crs"))
        .and_then(|crs| crs.get("properties"))
        .and_then(|props| props.get("name"))
        .and_then(|name| name.as_str())
    else {
        return Ok(Crs::WGS84);
    };
    parse_crs_name(name)
        .ok_or_else(|| LandsatError::UnsupportedCrs(format!("unrecognised CRS name: {name}")))
}

fn parse_crs_name(name: &str) -> Option<Crs> {
    if name.ends_with("CRS84") {
        return Some(Crs::WGS84);
    }
    let (_, rest) = name.split_once("EPSG")?;
    let digits: String = rest
        .chars()
        .skip_while(|ch| !ch.is_ascii_digit())
        .take_while(|ch| ch.is_ascii_digit())
        .collect();
    digits.parse().ok().map(Crs::epsg)
}

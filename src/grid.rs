//! WRS-2 path/row grid and its intersection with an area of interest.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use geo::{Geometry, Intersects, MultiPolygon};
use shapefile::dbase::FieldValue;

use crate::area::{self, AreaOfInterest, Crs};
use crate::error::LandsatError;

const NAME_FIELD: &str = "Name";

#[derive(Debug, Clone)]
pub struct GridCell {
    pub name: String,
    pub geometry: MultiPolygon<f64>,
}

impl GridCell {
    pub fn new(name: impl Into<String>, geometry: impl Into<MultiPolygon<f64>>) -> Self {
        Self {
            name: name.into(),
            geometry: geometry.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Grid {
    pub cells: Vec<GridCell>,
    pub crs: Crs,
}

impl Grid {
    pub fn new(cells: Vec<GridCell>, crs: Crs) -> Self {
        Self { cells, crs }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

pub fn load_grid(path: &Path) -> Result<Grid, LandsatError> {
    match area::extension(path).as_deref() {
        Some("shp") => load_shapefile_grid(path),
        Some("geojson") | Some("json") => load_geojson_grid(path),
        _ => Err(LandsatError::GridRead(format!(
            "unsupported grid file (expected .shp or .geojson): {}",
            path.display()
        ))),
    }
}

/// Catalog tile code for a grid cell name: `123_45` becomes `123045`.
pub fn transform_cell_name(name: &str) -> String {
    name.replace('_', "0")
}

/// Tile codes of every cell whose geometry intersects `area`.
///
/// The area is brought into the grid's CRS first; its parts were already
/// unioned when it was built.
pub fn intersecting_cells(
    grid: &Grid,
    area: &AreaOfInterest,
) -> Result<BTreeSet<String>, LandsatError> {
    let area = area.to_crs(grid.crs)?;
    let target = area.geometry();
    if target.0.is_empty() {
        return Err(LandsatError::InvalidGeometry(
            "area of interest is empty".to_string(),
        ));
    }

    let cells = grid
        .cells
        .iter()
        .filter(|cell| cell.geometry.intersects(target))
        .map(|cell| transform_cell_name(&cell.name))
        .collect::<BTreeSet<_>>();
    tracing::debug!(
        cells = cells.len(),
        grid = grid.len(),
        "grid cells intersecting area"
    );
    Ok(cells)
}

fn load_shapefile_grid(path: &Path) -> Result<Grid, LandsatError> {
    let crs = area::shapefile_crs(path)?;
    let mut reader = shapefile::Reader::from_path(path)
        .map_err(|err| LandsatError::GridRead(format!("open {}: {err}", path.display())))?;

    let mut cells = Vec::new();
    for result in reader.iter_shapes_and_records() {
        let (shape, record) =
            result.map_err(|err| LandsatError::GridRead(format!("read feature: {err}")))?;
        let name = match record.get(NAME_FIELD) {
            Some(FieldValue::Character(Some(value))) => value.trim().to_string(),
            Some(FieldValue::Memo(value)) => value.trim().to_string(),
            _ => {
                return Err(LandsatError::GridRead(format!(
                    "feature {} has no {NAME_FIELD} attribute",
                    cells.len()
                )));
            }
        };
        let geometry = match area::shape_to_geometry(shape) {
            Some(Geometry::MultiPolygon(multi)) => multi,
            _ => {
                return Err(LandsatError::GridRead(format!(
                    "cell {name} is not a polygon"
                )));
            }
        };
        cells.push(GridCell { name, geometry });
    }
    Ok(Grid::new(cells, crs))
}

fn load_geojson_grid(path: &Path) -> Result<Grid, LandsatError> {
    let content = fs::read_to_string(path)
        .map_err(|err| LandsatError::GridRead(format!("read {}: {err}", path.display())))?;
    let geojson: geojson::GeoJson = content
        .parse()
        .map_err(|err| LandsatError::GridRead(format!("parse GeoJSON: {err}")))?;
    let crs = area::geojson_crs(&geojson)?;
    let geojson::GeoJson::FeatureCollection(collection) = geojson else {
        return Err(LandsatError::GridRead(
            "grid GeoJSON must be a FeatureCollection".to_string(),
        ));
    };

    let mut cells = Vec::with_capacity(collection.features.len());
    for (index, feature) in collection.features.into_iter().enumerate() {
        let name = feature
            .property(NAME_FIELD)
            .and_then(|value| value.as_str())
            .map(|value| value.trim().to_string())
            .ok_or_else(|| {
                LandsatError::GridRead(format!("feature {index} has no {NAME_FIELD} property"))
            })?;
        let geometry = feature
            .geometry
            .ok_or_else(|| LandsatError::GridRead(format!("cell {name} has no geometry")))?;
        let geometry = Geometry::<f64>::try_from(geometry)
            .map_err(|err| LandsatError::GridRead(format!("cell {name}: {err}")))?;
        let geometry = match geometry {
            Geometry::Polygon(polygon) => MultiPolygon::new(vec![polygon]),
            Geometry::MultiPolygon(multi) => multi,
            _ => {
                return Err(LandsatError::GridRead(format!(
                    "cell {name} is not a polygon"
                )));
            }
        };
        cells.push(GridCell { name, geometry });
    }
    Ok(Grid::new(cells, crs))
}

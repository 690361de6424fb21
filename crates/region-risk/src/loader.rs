//! Data loading from CSV and GeoJSON files

use crate::config::{IndicatorColumns, PopulationColumns};
use crate::{
    IncidentRecord, IndicatorField, IndicatorRecord, PipelineError, PopulationRecord,
    RegionPolygon, Result,
};
use csv::{ReaderBuilder, StringRecord, Writer};
use geo::{Geometry, MultiPolygon};
use geojson::GeoJson;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Columns the incident archive must provide
const INCIDENT_COLUMNS: [&str; 5] = ["x", "y", "relevance", "state", "types"];

fn require_file(path: &Path, resource: &str) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(PipelineError::MissingResource {
            resource: resource.to_string(),
            path: path.to_path_buf(),
        })
    }
}

fn format_error(table: &str, detail: impl Into<String>) -> PipelineError {
    PipelineError::Format {
        table: table.to_string(),
        detail: detail.into(),
    }
}

/// Collapse whitespace so multi-line spreadsheet headers match config names
fn normalize_header(header: &str) -> String {
    header.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn column_position(headers: &StringRecord, name: &str, table: &str) -> Result<usize> {
    let wanted = normalize_header(name);
    headers
        .iter()
        .position(|h| normalize_header(h) == wanted)
        .ok_or_else(|| format_error(table, format!("missing expected column {:?}", name)))
}

/// Cell spellings that mean "no value" in exported spreadsheets
const MISSING_MARKERS: [&str; 19] = [
    "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null", "-",
];

/// Empty cell or missing marker → `None`; accepts a decimal comma.
/// Infinite values are rejected.
fn parse_number(cell: &str, table: &str, column: &str, line: usize) -> Result<Option<f64>> {
    let cell = cell.trim();
    if cell.is_empty() || MISSING_MARKERS.contains(&cell) {
        return Ok(None);
    }
    let value = cell
        .parse::<f64>()
        .or_else(|_| cell.replace(',', ".").parse::<f64>())
        .map_err(|_| {
            format_error(
                table,
                format!("line {}: {:?} in column {:?} is not a number", line, cell, column),
            )
        })?;
    if !value.is_finite() {
        return Err(format_error(
            table,
            format!("line {}: {:?} in column {:?} is not a finite number", line, cell, column),
        ));
    }
    Ok(Some(value))
}

/// Raw incident row from the archive CSV
#[derive(Debug, Deserialize)]
struct RawIncident {
    x: Option<f64>,
    y: Option<f64>,
    relevance: Option<i32>,
    state: Option<i32>,
    types: Option<i32>,
}

/// Load incidents from an archive CSV. Extra columns are ignored; rows with
/// missing or malformed coordinates or codes are skipped.
pub fn load_incidents(path: impl AsRef<Path>) -> Result<Vec<IncidentRecord>> {
    let path = path.as_ref();
    info!("Loading incidents from {:?}", path);
    require_file(path, "incident table")?;

    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    for column in INCIDENT_COLUMNS {
        column_position(&headers, column, "incident table")?;
    }

    let mut incidents = Vec::new();
    let mut skipped = 0;

    for result in reader.deserialize::<RawIncident>() {
        let raw = match result {
            Ok(raw) => raw,
            Err(e) if matches!(e.kind(), csv::ErrorKind::Deserialize { .. }) => {
                debug!("Skipping malformed incident row: {}", e);
                skipped += 1;
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        match (raw.x, raw.y, raw.relevance, raw.state, raw.types) {
            (Some(x), Some(y), Some(relevance), Some(state), Some(types))
                if x.is_finite() && y.is_finite() =>
            {
                incidents.push(IncidentRecord::new(x, y, relevance, state, types));
            }
            _ => skipped += 1,
        }
    }

    info!(
        "Loaded {} incidents ({} skipped for missing fields)",
        incidents.len(),
        skipped
    );

    Ok(incidents)
}

/// Load region polygons from a GeoJSON FeatureCollection, keeping feature
/// order as match order
pub fn load_polygons(path: impl AsRef<Path>, name_property: &str) -> Result<Vec<RegionPolygon>> {
    let path = path.as_ref();
    info!("Loading region polygons from {:?}", path);
    require_file(path, "region polygons")?;

    let text = fs::read_to_string(path)?;
    let features = match text.parse::<GeoJson>()? {
        GeoJson::FeatureCollection(collection) => collection.features,
        GeoJson::Feature(feature) => vec![feature],
        GeoJson::Geometry(_) => {
            return Err(format_error(
                "region polygons",
                "expected a FeatureCollection, found a bare geometry",
            ))
        }
    };

    let mut polygons = Vec::with_capacity(features.len());

    for (i, feature) in features.into_iter().enumerate() {
        let name = feature
            .properties
            .as_ref()
            .and_then(|props| props.get(name_property))
            .and_then(|value| value.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                format_error(
                    "region polygons",
                    format!("feature {} has no {:?} property", i, name_property),
                )
            })?;

        let geometry = feature.geometry.ok_or_else(|| {
            format_error("region polygons", format!("feature {:?} has no geometry", name))
        })?;

        let boundary: MultiPolygon<f64> = match Geometry::<f64>::try_from(geometry.value)? {
            Geometry::Polygon(polygon) => MultiPolygon::new(vec![polygon]),
            Geometry::MultiPolygon(multi) => multi,
            _ => {
                return Err(format_error(
                    "region polygons",
                    format!("feature {:?} is not a Polygon or MultiPolygon", name),
                ))
            }
        };

        polygons.push(RegionPolygon { name, boundary });
    }

    info!("Loaded {} region polygons", polygons.len());

    Ok(polygons)
}

/// Load the indicator table. Columns are located by header, so their order
/// in the file does not matter.
pub fn load_indicators(
    path: impl AsRef<Path>,
    columns: &IndicatorColumns,
) -> Result<Vec<IndicatorRecord>> {
    const TABLE: &str = "indicator table";
    let path = path.as_ref();
    info!("Loading indicators from {:?}", path);
    require_file(path, TABLE)?;

    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;
    let headers = reader.headers()?.clone();

    let region_at = column_position(&headers, &columns.region, TABLE)?;
    let mut field_at = Vec::with_capacity(IndicatorField::ALL.len());
    for field in IndicatorField::ALL {
        let name = columns.column(field);
        field_at.push((field, name, column_position(&headers, name, TABLE)?));
    }

    let mut records = Vec::new();
    let mut skipped = 0;

    for (i, result) in reader.records().enumerate() {
        let row = result?;
        let line = i + 2;

        let region = row.get(region_at).unwrap_or("").trim();
        if region.is_empty() {
            skipped += 1;
            continue;
        }

        let mut record = IndicatorRecord {
            region: region.to_string(),
            ..Default::default()
        };
        for &(field, name, at) in &field_at {
            let value = parse_number(row.get(at).unwrap_or(""), TABLE, name, line)?;
            record.set(field, value);
        }
        records.push(record);
    }

    info!(
        "Loaded {} indicator rows ({} skipped without a region name)",
        records.len(),
        skipped
    );

    Ok(records)
}

/// Load the population table; incomplete rows are dropped
pub fn load_population(
    path: impl AsRef<Path>,
    columns: &PopulationColumns,
) -> Result<Vec<PopulationRecord>> {
    const TABLE: &str = "population table";
    let path = path.as_ref();
    info!("Loading population from {:?}", path);
    require_file(path, TABLE)?;

    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    let region_at = column_position(&headers, &columns.region, TABLE)?;
    let population_at = column_position(&headers, &columns.population, TABLE)?;

    let mut records = Vec::new();
    let mut dropped = 0;

    for (i, result) in reader.records().enumerate() {
        let row = result?;
        let line = i + 2;

        let region = row.get(region_at).unwrap_or("").trim();
        let cell = row.get(population_at).unwrap_or("");
        let population = parse_number(cell, TABLE, &columns.population, line)?;

        match population {
            Some(p) if !p.is_finite() || p < 0.0 => {
                return Err(format_error(
                    TABLE,
                    format!("line {}: population {} for {:?} is not a non-negative count", line, p, region),
                ));
            }
            Some(p) if !region.is_empty() => records.push(PopulationRecord {
                region: region.to_string(),
                population: p,
            }),
            _ => dropped += 1,
        }
    }

    if dropped > 0 {
        warn!("Dropped {} incomplete population rows", dropped);
    }
    info!("Loaded {} population rows", records.len());

    Ok(records)
}

/// Matched-incident cache row
#[derive(Debug, Serialize, Deserialize)]
struct CachedIncident {
    x: f64,
    y: f64,
    relevance: i32,
    state: i32,
    types: i32,
    region: Option<String>,
}

/// Write filtered, matched incidents for later reuse
pub fn write_matched_cache(path: impl AsRef<Path>, incidents: &[IncidentRecord]) -> Result<()> {
    let path = path.as_ref();
    info!("Writing {} matched incidents to {:?}", incidents.len(), path);

    let mut writer = Writer::from_path(path)?;
    for incident in incidents {
        writer.serialize(CachedIncident {
            x: incident.location.x,
            y: incident.location.y,
            relevance: incident.relevance,
            state: incident.state,
            types: incident.type_code,
            region: incident.region.clone(),
        })?;
    }
    writer.flush()?;

    Ok(())
}

/// Read a cache written by [`write_matched_cache`]
pub fn load_matched_cache(path: impl AsRef<Path>) -> Result<Vec<IncidentRecord>> {
    let path = path.as_ref();
    info!("Loading matched incidents from {:?}", path);
    require_file(path, "matched incident cache")?;

    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;
    let mut incidents = Vec::new();

    for result in reader.deserialize::<CachedIncident>() {
        let cached = result?;
        let mut incident =
            IncidentRecord::new(cached.x, cached.y, cached.relevance, cached.state, cached.types);
        incident.region = cached.region.filter(|r| !r.is_empty());
        incidents.push(incident);
    }

    info!("Loaded {} cached incidents", incidents.len());

    Ok(incidents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_incidents_skips_incomplete_rows() {
        let csv = "id,x,y,mp,date,state,relevance,types\n\
                   a1,14.42,50.08,f,2014-05-01,1,3,20\n\
                   a2,,50.08,f,2014-05-01,1,3,20\n\
                   a3,14.42,50.08,f,2014-05-01,x,3,20\n";
        let file = temp_file(csv);

        let incidents = load_incidents(file.path()).unwrap();
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].type_code, 20);
        assert_eq!(incidents[0].relevance, 3);
    }

    #[test]
    fn test_load_incidents_requires_columns() {
        let file = temp_file("x,y,state,types\n1,2,1,20\n");
        let err = load_incidents(file.path()).unwrap_err();
        assert!(matches!(err, PipelineError::Format { .. }));
    }

    #[test]
    fn test_load_polygons() {
        let json = r#"{
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": {"NAZEV": "Beroun"},
                 "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]}},
                {"type": "Feature", "properties": {"NAZEV": "Kladno"},
                 "geometry": {"type": "MultiPolygon", "coordinates": [[[[2,0],[3,0],[3,1],[2,1],[2,0]]]]}}
            ]
        }"#;
        let file = temp_file(json);

        let polygons = load_polygons(file.path(), "NAZEV").unwrap();
        let names: Vec<&str> = polygons.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Beroun", "Kladno"]);
        assert_eq!(polygons[1].boundary.0.len(), 1);
    }

    #[test]
    fn test_load_polygons_rejects_points() {
        let json = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {"NAZEV": "X"}, "geometry": {"type": "Point", "coordinates": [0, 0]}}
        ]}"#;
        let file = temp_file(json);
        assert!(matches!(
            load_polygons(file.path(), "NAZEV"),
            Err(PipelineError::Format { .. })
        ));
    }

    #[test]
    fn test_load_indicators_any_column_order() {
        let columns = IndicatorColumns::default();
        let header = |names: &[&str]| names.join(",");
        let ordered = [
            columns.region.as_str(),
            columns.foreclosure.as_str(),
            columns.no_high_school.as_str(),
            columns.benefits.as_str(),
            columns.dropout.as_str(),
        ];
        let shuffled = [
            columns.dropout.as_str(),
            columns.benefits.as_str(),
            columns.region.as_str(),
            columns.no_high_school.as_str(),
            columns.foreclosure.as_str(),
        ];

        let a = temp_file(&format!("{}\nPraha,1.5,2.5,3.5,4.5\n", header(&ordered)));
        let b = temp_file(&format!("{}\n4.5,3.5,Praha,2.5,1.5\n", header(&shuffled)));

        let from_a = load_indicators(a.path(), &columns).unwrap();
        let from_b = load_indicators(b.path(), &columns).unwrap();
        assert_eq!(from_a, from_b);
        assert_eq!(from_a[0].foreclosure, Some(1.5));
        assert_eq!(from_a[0].dropout, Some(4.5));
    }

    #[test]
    fn test_load_indicators_missing_column_is_format_error() {
        let columns = IndicatorColumns::default();
        let csv = format!(
            "{},{},{},{}\nPraha,1,2,3\n",
            columns.region, columns.foreclosure, columns.no_high_school, columns.benefits
        );
        let file = temp_file(&csv);

        match load_indicators(file.path(), &columns) {
            Err(PipelineError::Format { detail, .. }) => assert!(detail.contains(&columns.dropout)),
            other => panic!("expected format error, got {:?}", other),
        }
    }

    #[test]
    fn test_load_indicators_empty_cell_and_comma_decimal() {
        let columns = IndicatorColumns {
            region: "name".to_string(),
            foreclosure: "f".to_string(),
            no_high_school: "h".to_string(),
            benefits: "b".to_string(),
            dropout: "d".to_string(),
        };
        let file = temp_file("name,f,h,b,d\nBeroun,,\"2,5\",1,0\n");
        let records = load_indicators(file.path(), &columns).unwrap();
        assert_eq!(records[0].foreclosure, None);
        assert_eq!(records[0].no_high_school, Some(2.5));
    }

    fn short_columns() -> IndicatorColumns {
        IndicatorColumns {
            region: "n".to_string(),
            foreclosure: "f".to_string(),
            no_high_school: "h".to_string(),
            benefits: "b".to_string(),
            dropout: "d".to_string(),
        }
    }

    #[test]
    fn test_load_indicators_missing_markers_are_empty() {
        let file = temp_file("n,f,h,b,d\nA,NaN,NA,#N/A,nan\nB,1,null,N/A,2\n");
        let records = load_indicators(file.path(), &short_columns()).unwrap();
        for field in IndicatorField::ALL {
            assert_eq!(records[0].value(field), None);
        }
        assert_eq!(records[1].foreclosure, Some(1.0));
        assert_eq!(records[1].no_high_school, None);
        assert_eq!(records[1].benefits, None);
        assert_eq!(records[1].dropout, Some(2.0));
    }

    #[test]
    fn test_load_indicators_infinite_is_format_error() {
        for cell in ["inf", "-inf", "infinity", "1e400"] {
            let file = temp_file(&format!("n,f,h,b,d\nC,3,3,{},1\n", cell));
            match load_indicators(file.path(), &short_columns()) {
                Err(PipelineError::Format { detail, .. }) => assert!(detail.contains("finite")),
                other => panic!("expected format error for {:?}, got {:?}", cell, other),
            }
        }
    }

    #[test]
    fn test_load_population_nan_count_dropped() {
        let file = temp_file("Kraje / SO ORP,Počet obyvatel celkem\nBeroun,NaN\nKladno,70000\n");
        let records = load_population(file.path(), &PopulationColumns::default()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].region, "Kladno");
    }

    #[test]
    fn test_load_population_multiline_header_and_dropna() {
        let file = temp_file(
            "\"Kraje / SO ORP\",\"Počet\nobyvatel\ncelkem\"\nBeroun,62000\nČesko,\n,100\n",
        );
        let records = load_population(file.path(), &PopulationColumns::default()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].region, "Beroun");
        assert_eq!(records[0].population, 62000.0);
    }

    #[test]
    fn test_load_population_negative_rejected() {
        let file = temp_file("Kraje / SO ORP,Počet obyvatel celkem\nBeroun,-5\n");
        assert!(matches!(
            load_population(file.path(), &PopulationColumns::default()),
            Err(PipelineError::Format { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_missing_resource() {
        let err = load_indicators("/nonexistent/paq.csv", &IndicatorColumns::default()).unwrap_err();
        assert!(matches!(err, PipelineError::MissingResource { .. }));
    }

    #[test]
    fn test_matched_cache_keeps_assignments() {
        let mut a = IncidentRecord::new(14.4, 50.1, 3, 1, 20);
        a.region = Some("Beroun".to_string());
        let b = IncidentRecord::new(1.0, 1.0, 4, 2, 30);

        let file = NamedTempFile::new().unwrap();
        write_matched_cache(file.path(), &[a.clone(), b.clone()]).unwrap();
        let loaded = load_matched_cache(file.path()).unwrap();
        assert_eq!(loaded, vec![a, b]);
    }
}

//! KML 2.2 export of result points.

use crate::core::coords::to_wgs84;
use crate::error::Result;
use crate::models::SurveyPoint;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::fs;
use std::path::Path;
use tracing::info;

const KML_NAMESPACE: &str = "http://www.opengis.net/kml/2.2";

#[derive(Debug, Clone, PartialEq)]
pub struct Placemark {
    pub name: String,
    pub longitude: f64,
    pub latitude: f64,
    pub elevation: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct KmlDocument {
    pub name: String,
    pub placemarks: Vec<Placemark>,
    /// Optional line through the points, as (longitude, latitude).
    pub path: Option<Vec<(f64, f64)>>,
}

impl KmlDocument {
    /// Project result points from `epsg` to WGS84 placemarks.
    pub fn from_points(
        name: impl Into<String>,
        points: &[SurveyPoint],
        epsg: u32,
        with_path: bool,
    ) -> Result<Self> {
        let coords: Vec<_> = points.iter().map(SurveyPoint::coord).collect();
        let lonlat = to_wgs84(&coords, epsg)?;

        let placemarks = points
            .iter()
            .zip(&lonlat)
            .map(|(p, (lon, lat))| Placemark {
                name: p.name.clone(),
                longitude: *lon,
                latitude: *lat,
                elevation: p.elevation,
            })
            .collect();

        Ok(Self {
            name: name.into(),
            placemarks,
            path: (with_path && lonlat.len() > 1).then_some(lonlat),
        })
    }
}

fn start(writer: &mut Writer<Vec<u8>>, name: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    Ok(())
}

fn end(writer: &mut Writer<Vec<u8>>, name: &str) -> Result<()> {
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<()> {
    start(writer, name)?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    end(writer, name)
}

fn coordinate(longitude: f64, latitude: f64, elevation: Option<f64>) -> String {
    match elevation {
        Some(alt) => format!("{:.8},{:.8},{:.3}", longitude, latitude, alt),
        None => format!("{:.8},{:.8}", longitude, latitude),
    }
}

/// Serialise a document to KML text.
pub fn render_kml(doc: &KmlDocument) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.write_event(Event::Start(
        BytesStart::new("kml").with_attributes([("xmlns", KML_NAMESPACE)]),
    ))?;
    start(&mut writer, "Document")?;
    text_element(&mut writer, "name", &doc.name)?;

    for mark in &doc.placemarks {
        start(&mut writer, "Placemark")?;
        text_element(&mut writer, "name", &mark.name)?;
        start(&mut writer, "Point")?;
        if mark.elevation.is_some() {
            text_element(&mut writer, "altitudeMode", "absolute")?;
        }
        text_element(
            &mut writer,
            "coordinates",
            &coordinate(mark.longitude, mark.latitude, mark.elevation),
        )?;
        end(&mut writer, "Point")?;
        end(&mut writer, "Placemark")?;
    }

    if let Some(path) = &doc.path {
        let coordinates = path
            .iter()
            .map(|(lon, lat)| coordinate(*lon, *lat, None))
            .collect::<Vec<_>>()
            .join(" ");

        start(&mut writer, "Placemark")?;
        text_element(&mut writer, "name", &format!("{} path", doc.name))?;
        start(&mut writer, "LineString")?;
        text_element(&mut writer, "tessellate", "1")?;
        text_element(&mut writer, "coordinates", &coordinates)?;
        end(&mut writer, "LineString")?;
        end(&mut writer, "Placemark")?;
    }

    end(&mut writer, "Document")?;
    end(&mut writer, "kml")?;

    Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
}

/// Write a document to a `.kml` file.
pub fn write_kml(path: &Path, doc: &KmlDocument) -> Result<()> {
    let kml = render_kml(doc)?;
    fs::write(path, kml)?;
    info!(
        "Exported {} placemark(s) to {}",
        doc.placemarks.len(),
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Coord;

    fn sample() -> KmlDocument {
        KmlDocument {
            name: "Survey & Co".to_string(),
            placemarks: vec![
                Placemark {
                    name: "Point 1".to_string(),
                    longitude: 9.99,
                    latitude: 53.55,
                    elevation: None,
                },
                Placemark {
                    name: "Point 2".to_string(),
                    longitude: 10.0,
                    latitude: 53.56,
                    elevation: Some(12.5),
                },
            ],
            path: None,
        }
    }

    #[test]
    fn test_render_placemarks_lon_lat() {
        let kml = render_kml(&sample()).unwrap();

        assert!(kml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(kml.contains("<kml xmlns=\"http://www.opengis.net/kml/2.2\">"));
        assert_eq!(kml.matches("<Placemark>").count(), 2);
        assert!(kml.contains("<coordinates>9.99000000,53.55000000</coordinates>"));
        assert!(kml.contains("<coordinates>10.00000000,53.56000000,12.500</coordinates>"));
        assert_eq!(kml.matches("<altitudeMode>absolute</altitudeMode>").count(), 1);
    }

    #[test]
    fn test_names_are_escaped() {
        let kml = render_kml(&sample()).unwrap();
        assert!(kml.contains("<name>Survey &amp; Co</name>"));
    }

    #[test]
    fn test_path_line_string() {
        let mut doc = sample();
        doc.path = Some(vec![(9.99, 53.55), (10.0, 53.56)]);
        let kml = render_kml(&doc).unwrap();
        assert!(kml.contains("<LineString>"));
        assert!(kml.contains("9.99000000,53.55000000 10.00000000,53.56000000"));
    }

    #[test]
    fn test_from_utm_points() {
        let points = vec![
            SurveyPoint::new("CM", Coord::new(500_000.0, 0.0)),
            SurveyPoint::new("East", Coord::new(600_000.0, 100_000.0)),
        ];
        let doc = KmlDocument::from_points("Traverse", &points, 32631, true).unwrap();
        assert!((doc.placemarks[0].longitude - 3.0).abs() < 1e-9);
        assert!(doc.placemarks[1].longitude > 3.0);
        assert_eq!(doc.path.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn test_unsupported_epsg() {
        let points = vec![SurveyPoint::new("A", Coord::new(0.0, 0.0))];
        assert!(KmlDocument::from_points("x", &points, 2193, false).is_err());
    }
}

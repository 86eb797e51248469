//! PLY colour point export

use crate::error::IoError;
use log::debug;
use mvreg_core::{Point3d, PointRecord, RecordCloud, Result, Transform3D, Vector3d};
use ply_rs::{
    parser::Parser,
    ply::{Addable, DefaultElement, ElementDef, Ply, Property, PropertyDef, PropertyType, ScalarType},
    writer::Writer,
};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

const POSITION_PROPERTIES: [&str; 3] = ["x", "y", "z"];
const NORMAL_PROPERTIES: [&str; 3] = ["nx", "ny", "nz"];
const COLOR_PROPERTIES: [&str; 3] = ["red", "green", "blue"];

pub struct PlyReader;
pub struct PlyWriter;

impl PlyWriter {
    /// Write the non-noise records of `cloud` as coloured vertices.
    ///
    /// With `frame` set, positions and normals are mapped through it first,
    /// e.g. into the turntable axis frame.
    pub fn write_point_cloud<P: AsRef<Path>>(cloud: &RecordCloud, path: P, frame: Option<&Transform3D>) -> Result<()> {
        let path = path.as_ref();
        let records = cloud.transformed_records(frame.unwrap_or(&Transform3D::identity()));

        let mut ply = Ply::<DefaultElement>::new();
        let mut vertex_element = ElementDef::new("vertex".to_string());
        vertex_element.count = records.len();
        for name in POSITION_PROPERTIES.iter().chain(&NORMAL_PROPERTIES) {
            vertex_element
                .properties
                .add(PropertyDef::new(name.to_string(), PropertyType::Scalar(ScalarType::Float)));
        }
        for name in COLOR_PROPERTIES {
            vertex_element
                .properties
                .add(PropertyDef::new(name.to_string(), PropertyType::Scalar(ScalarType::UChar)));
        }
        ply.header.elements.add(vertex_element);

        let vertices = records
            .iter()
            .map(|record| {
                let mut vertex = DefaultElement::new();
                let p = record.position;
                let n = record.normal;
                for (name, value) in POSITION_PROPERTIES.iter().zip([p.x, p.y, p.z]) {
                    vertex.insert(name.to_string(), Property::Float(value as f32));
                }
                for (name, value) in NORMAL_PROPERTIES.iter().zip([n.x, n.y, n.z]) {
                    vertex.insert(name.to_string(), Property::Float(value as f32));
                }
                for (name, value) in COLOR_PROPERTIES.iter().zip(record.color) {
                    vertex.insert(name.to_string(), Property::UChar(value));
                }
                vertex
            })
            .collect();
        ply.payload.insert("vertex".to_string(), vertices);

        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        Writer::new()
            .write_ply(&mut writer, &mut ply)
            .map_err(|e| IoError::WriteError { message: e.to_string() })?;
        writer.flush()?;
        debug!("exported {} points to {}", records.len(), path.display());
        Ok(())
    }
}

impl PlyReader {
    /// Read vertices with optional normals and colours
    pub fn read_point_cloud<P: AsRef<Path>>(path: P) -> Result<RecordCloud> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let parser = Parser::<DefaultElement>::new();
        let ply = parser.read_ply(&mut reader)?;

        let mut cloud = RecordCloud::new();
        if let Some(vertex_element) = ply.payload.get("vertex") {
            for vertex in vertex_element {
                let [x, y, z] = POSITION_PROPERTIES.map(|name| extract_property_value(vertex, name));
                let mut record = PointRecord::at(Point3d::new(x?, y?, z?));

                if let [Ok(nx), Ok(ny), Ok(nz)] = NORMAL_PROPERTIES.map(|name| extract_property_value(vertex, name)) {
                    record.normal = Vector3d::new(nx, ny, nz);
                }
                if let [Some(r), Some(g), Some(b)] = COLOR_PROPERTIES.map(|name| extract_color(vertex, name)) {
                    record.color = [r, g, b];
                }
                cloud.push(record);
            }
        }

        Ok(cloud)
    }
}

/// Extract a property value as f64 from a PLY element
fn extract_property_value(element: &DefaultElement, name: &str) -> Result<f64> {
    match element.get(name) {
        Some(Property::Float(val)) => Ok(f64::from(*val)),
        Some(Property::Double(val)) => Ok(*val),
        Some(Property::Int(val)) => Ok(f64::from(*val)),
        Some(Property::UInt(val)) => Ok(f64::from(*val)),
        _ => Err(IoError::parse(format!("Property '{}' not found or invalid type", name)).into()),
    }
}

fn extract_color(element: &DefaultElement, name: &str) -> Option<u8> {
    match element.get(name)? {
        Property::UChar(val) => Some(*val),
        Property::Float(val) => Some((val.clamp(0.0, 1.0) * 255.0).round() as u8),
        _ => None,
    }
}

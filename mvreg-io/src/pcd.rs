//! PCD (Point Cloud Data) format support
//!
//! Point records are stored as `x y z normal_x normal_y normal_z rgb`, with
//! positions and normals as 8-byte floats and the colour packed into the bits
//! of a 4-byte float the way PCL does. The reader also accepts 4-byte float
//! and unsigned integer fields, ASCII data and files without normals or colour.

use crate::error::IoError;
use log::debug;
use mvreg_core::{Point3d, PointRecord, RecordCloud, Result, Vector3d};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// PCD data format variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcdDataFormat {
    Ascii,
    Binary,
    BinaryCompressed,
}

/// PCD field data types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcdFieldType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl PcdFieldType {
    fn size(self) -> usize {
        match self {
            PcdFieldType::I8 | PcdFieldType::U8 => 1,
            PcdFieldType::I16 | PcdFieldType::U16 => 2,
            PcdFieldType::I32 | PcdFieldType::U32 | PcdFieldType::F32 => 4,
            PcdFieldType::F64 => 8,
        }
    }

    fn type_char(self) -> &'static str {
        match self {
            PcdFieldType::I8 | PcdFieldType::I16 | PcdFieldType::I32 => "I",
            PcdFieldType::U8 | PcdFieldType::U16 | PcdFieldType::U32 => "U",
            PcdFieldType::F32 | PcdFieldType::F64 => "F",
        }
    }

    fn from_header(type_str: &str, size: usize) -> Result<Self> {
        let field_type = match (type_str, size) {
            ("I", 1) => PcdFieldType::I8,
            ("I", 2) => PcdFieldType::I16,
            ("I", 4) => PcdFieldType::I32,
            ("U", 1) => PcdFieldType::U8,
            ("U", 2) => PcdFieldType::U16,
            ("U", 4) => PcdFieldType::U32,
            ("F", 4) => PcdFieldType::F32,
            ("F", 8) => PcdFieldType::F64,
            _ => {
                return Err(IoError::parse(format!(
                    "Unknown field type/size combination: {}/{}",
                    type_str, size
                ))
                .into())
            }
        };
        Ok(field_type)
    }
}

/// PCD field definition
#[derive(Debug, Clone, PartialEq)]
pub struct PcdField {
    pub name: String,
    pub field_type: PcdFieldType,
    pub count: usize,
}

impl PcdField {
    fn new(name: &str, field_type: PcdFieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            count: 1,
        }
    }
}

/// PCD header information
#[derive(Debug, Clone)]
pub struct PcdHeader {
    pub version: String,
    pub fields: Vec<PcdField>,
    pub width: usize,
    pub height: usize,
    pub viewpoint: [f64; 7], // tx, ty, tz, qw, qx, qy, qz
    pub data_format: PcdDataFormat,
}

impl PcdHeader {
    pub fn point_count(&self) -> usize {
        self.width * self.height
    }
}

/// PCD write options
#[derive(Debug, Clone)]
pub struct PcdWriteOptions {
    pub data_format: PcdDataFormat,
    pub version: String,
    pub viewpoint: Option<[f64; 7]>,
}

impl Default for PcdWriteOptions {
    fn default() -> Self {
        Self {
            data_format: PcdDataFormat::Binary,
            version: "0.7".to_string(),
            viewpoint: None,
        }
    }
}

/// Where the record attributes live within one point's values
#[derive(Debug, Default)]
struct FieldSlots {
    position: [Option<usize>; 3],
    normal: [Option<usize>; 3],
    rgb: Option<usize>,
}

impl FieldSlots {
    /// Slot of each named field, counting one slot per field element
    fn new(fields: &[PcdField]) -> Result<Self> {
        let mut slots = FieldSlots::default();
        let mut offset = 0;
        for field in fields {
            match field.name.as_str() {
                "x" => slots.position[0] = Some(offset),
                "y" => slots.position[1] = Some(offset),
                "z" => slots.position[2] = Some(offset),
                "normal_x" => slots.normal[0] = Some(offset),
                "normal_y" => slots.normal[1] = Some(offset),
                "normal_z" => slots.normal[2] = Some(offset),
                "rgb" | "rgba" => slots.rgb = Some(offset),
                _ => {}
            }
            offset += field.count;
        }
        if slots.position.iter().any(Option::is_none) {
            return Err(IoError::format("PCD file has no x/y/z fields").into());
        }
        Ok(slots)
    }

    fn record(&self, values: &[FieldValue]) -> PointRecord {
        let get = |slot: Option<usize>| slot.and_then(|i| values.get(i));
        let coord = |slot: Option<usize>| get(slot).map(FieldValue::as_f64).unwrap_or(0.0);

        let mut record = PointRecord::at(Point3d::new(
            coord(self.position[0]),
            coord(self.position[1]),
            coord(self.position[2]),
        ));
        if self.normal.iter().all(Option::is_some) {
            record.normal = Vector3d::new(coord(self.normal[0]), coord(self.normal[1]), coord(self.normal[2]));
        }
        if let Some(value) = get(self.rgb) {
            record.color = PointRecord::unpack_rgb(value.as_packed_rgb());
        }
        record
    }
}

/// One decoded field element
#[derive(Debug, Clone, Copy)]
enum FieldValue {
    Int(i64),
    F32(f32),
    F64(f64),
}

impl FieldValue {
    fn as_f64(&self) -> f64 {
        match *self {
            FieldValue::Int(v) => v as f64,
            FieldValue::F32(v) => f64::from(v),
            FieldValue::F64(v) => v,
        }
    }

    /// Colour bits: a float field carries them in its bit pattern
    fn as_packed_rgb(&self) -> u32 {
        match *self {
            FieldValue::Int(v) => v as u32,
            FieldValue::F32(v) => v.to_bits(),
            FieldValue::F64(v) => (v as f32).to_bits(),
        }
    }
}

/// Reader for point record PCD files
pub struct PcdReader;

impl PcdReader {
    /// Read a PCD file into point records
    pub fn read_point_cloud<P: AsRef<Path>>(path: P) -> Result<RecordCloud> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let cloud = Self::read_records(&mut reader)?;
        debug!("read {} points from {}", cloud.len(), path.display());
        Ok(cloud)
    }

    /// Read header and records from any buffered source
    pub fn read_records<R: BufRead>(reader: &mut R) -> Result<RecordCloud> {
        let header = Self::read_header(reader)?;
        let slots = FieldSlots::new(&header.fields)?;
        let value_count: usize = header.fields.iter().map(|f| f.count).sum();

        let mut cloud = RecordCloud::with_capacity(header.point_count());
        let mut values = Vec::with_capacity(value_count);
        match header.data_format {
            PcdDataFormat::Ascii => {
                let mut line = String::new();
                while cloud.len() < header.point_count() {
                    line.clear();
                    if reader.read_line(&mut line)? == 0 {
                        return Err(IoError::parse(format!(
                            "PCD data ended after {} of {} points",
                            cloud.len(),
                            header.point_count()
                        ))
                        .into());
                    }
                    if line.trim().is_empty() {
                        continue;
                    }
                    values.clear();
                    Self::parse_ascii_values(&line, &header.fields, &mut values)?;
                    cloud.push(slots.record(&values));
                }
            }
            PcdDataFormat::Binary => {
                for _ in 0..header.point_count() {
                    values.clear();
                    Self::read_binary_values(reader, &header.fields, &mut values)?;
                    cloud.push(slots.record(&values));
                }
            }
            PcdDataFormat::BinaryCompressed => {
                return Err(mvreg_core::Error::Unsupported(
                    "Binary compressed PCD format not yet supported".to_string(),
                ))
            }
        }
        Ok(cloud)
    }

    /// Read PCD header
    pub fn read_header<R: BufRead>(reader: &mut R) -> Result<PcdHeader> {
        let mut version = None;
        let mut names = Vec::new();
        let mut sizes = Vec::new();
        let mut types = Vec::new();
        let mut counts = Vec::new();
        let mut width = None;
        let mut height = None;
        let mut viewpoint = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0];
        let mut points = None;
        let mut data_format = None;

        let parse_usize = |key: &str, value: &str| {
            value
                .parse::<usize>()
                .map_err(|_| mvreg_core::Error::from(IoError::parse(format!("Invalid {} value: {}", key, value))))
        };

        let mut line = String::new();
        while data_format.is_none() {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Err(IoError::parse("Unexpected end of file in PCD header").into());
            }

            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let parts: Vec<&str> = line.split_whitespace().collect();
            let values = &parts[1..];
            match parts[0] {
                "VERSION" => version = values.first().map(|v| v.to_string()),
                "FIELDS" => names = values.iter().map(|v| v.to_string()).collect(),
                "SIZE" => {
                    sizes = values.iter().map(|v| parse_usize("SIZE", *v)).collect::<Result<_>>()?;
                }
                "TYPE" => types = values.iter().map(|v| v.to_string()).collect(),
                "COUNT" => {
                    counts = values.iter().map(|v| parse_usize("COUNT", *v)).collect::<Result<_>>()?;
                }
                "WIDTH" => width = values.first().map(|v| parse_usize("WIDTH", *v)).transpose()?,
                "HEIGHT" => height = values.first().map(|v| parse_usize("HEIGHT", *v)).transpose()?,
                "POINTS" => points = values.first().map(|v| parse_usize("POINTS", *v)).transpose()?,
                "VIEWPOINT" => {
                    if values.len() >= 7 {
                        for (slot, value) in viewpoint.iter_mut().zip(values) {
                            *slot = value.parse::<f64>().map_err(|_| {
                                IoError::parse(format!("Invalid VIEWPOINT value: {}", value))
                            })?;
                        }
                    }
                }
                "DATA" => {
                    data_format = Some(match values.first().copied() {
                        Some("ascii") => PcdDataFormat::Ascii,
                        Some("binary") => PcdDataFormat::Binary,
                        Some("binary_compressed") => PcdDataFormat::BinaryCompressed,
                        other => {
                            return Err(IoError::parse(format!("Unknown PCD DATA format: {:?}", other)).into())
                        }
                    });
                }
                _ => {
                    // Ignore unknown header fields
                }
            }
        }

        let version = version.unwrap_or_else(|| "0.7".to_string());
        let height = height.unwrap_or(1);
        let width = match (width, points) {
            (Some(width), _) => width,
            (None, Some(points)) => points / height.max(1),
            (None, None) => return Err(IoError::parse("Missing WIDTH in PCD header").into()),
        };

        if sizes.len() != names.len() || types.len() != names.len() {
            return Err(IoError::parse("Mismatch between FIELDS, SIZE and TYPE declarations").into());
        }
        if counts.is_empty() {
            counts = vec![1; names.len()];
        } else if counts.len() != names.len() {
            return Err(IoError::parse("Mismatch between FIELDS and COUNT declarations").into());
        }

        let fields = names
            .into_iter()
            .zip(types.iter().zip(&sizes))
            .zip(&counts)
            .map(|((name, (type_str, &size)), &count)| {
                Ok(PcdField {
                    name,
                    field_type: PcdFieldType::from_header(type_str, size)?,
                    count,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if let Some(points) = points {
            if points != width * height {
                return Err(IoError::parse(format!(
                    "POINTS ({}) doesn't match WIDTH * HEIGHT ({})",
                    points,
                    width * height
                ))
                .into());
            }
        }

        Ok(PcdHeader {
            version,
            fields,
            width,
            height,
            viewpoint,
            data_format: data_format.unwrap_or(PcdDataFormat::Ascii),
        })
    }

    fn parse_ascii_values(line: &str, fields: &[PcdField], values: &mut Vec<FieldValue>) -> Result<()> {
        let mut tokens = line.split_whitespace();
        for field in fields {
            for _ in 0..field.count {
                let token = tokens
                    .next()
                    .ok_or_else(|| IoError::parse("Not enough values in ASCII PCD line"))?;
                let invalid = || IoError::parse(format!("Invalid {:?} value: {}", field.field_type, token));
                let value = match field.field_type {
                    PcdFieldType::F32 => FieldValue::F32(token.parse::<f32>().map_err(|_| invalid())?),
                    PcdFieldType::F64 => FieldValue::F64(token.parse::<f64>().map_err(|_| invalid())?),
                    _ => FieldValue::Int(token.parse::<i64>().map_err(|_| invalid())?),
                };
                values.push(value);
            }
        }
        Ok(())
    }

    fn read_binary_values<R: Read>(reader: &mut R, fields: &[PcdField], values: &mut Vec<FieldValue>) -> Result<()> {
        let mut buf = [0u8; 8];
        for field in fields {
            for _ in 0..field.count {
                let bytes = &mut buf[..field.field_type.size()];
                reader.read_exact(bytes)?;
                let value = match field.field_type {
                    PcdFieldType::I8 => FieldValue::Int(i64::from(bytes[0] as i8)),
                    PcdFieldType::U8 => FieldValue::Int(i64::from(bytes[0])),
                    PcdFieldType::I16 => FieldValue::Int(i64::from(i16::from_le_bytes([bytes[0], bytes[1]]))),
                    PcdFieldType::U16 => FieldValue::Int(i64::from(u16::from_le_bytes([bytes[0], bytes[1]]))),
                    PcdFieldType::I32 => {
                        FieldValue::Int(i64::from(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])))
                    }
                    PcdFieldType::U32 => {
                        FieldValue::Int(i64::from(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])))
                    }
                    PcdFieldType::F32 => FieldValue::F32(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
                    PcdFieldType::F64 => FieldValue::F64(f64::from_le_bytes(buf)),
                };
                values.push(value);
            }
        }
        Ok(())
    }
}

/// Writer for point record PCD files
pub struct PcdWriter;

impl PcdWriter {
    /// Write every record of `cloud` with the default (binary) options
    pub fn write_point_cloud<P: AsRef<Path>>(cloud: &RecordCloud, path: P) -> Result<()> {
        Self::write_point_cloud_with_options(cloud, path, &PcdWriteOptions::default())
    }

    pub fn write_point_cloud_with_options<P: AsRef<Path>>(
        cloud: &RecordCloud,
        path: P,
        options: &PcdWriteOptions,
    ) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        Self::write_records(cloud.iter(), cloud.len(), &mut writer, options)?;
        writer.flush()?;
        debug!("wrote {} points to {}", cloud.len(), path.display());
        Ok(())
    }

    /// Write `count` records to `writer`
    pub fn write_records<'a, I, W>(records: I, count: usize, writer: &mut W, options: &PcdWriteOptions) -> Result<()>
    where
        I: IntoIterator<Item = &'a PointRecord>,
        W: Write,
    {
        let header = PcdHeader {
            version: options.version.clone(),
            fields: vec![
                PcdField::new("x", PcdFieldType::F64),
                PcdField::new("y", PcdFieldType::F64),
                PcdField::new("z", PcdFieldType::F64),
                PcdField::new("normal_x", PcdFieldType::F64),
                PcdField::new("normal_y", PcdFieldType::F64),
                PcdField::new("normal_z", PcdFieldType::F64),
                PcdField::new("rgb", PcdFieldType::F32),
            ],
            width: count,
            height: 1,
            viewpoint: options.viewpoint.unwrap_or([0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0]),
            data_format: options.data_format,
        };
        Self::write_header(writer, &header)?;

        let mut written = 0;
        for record in records {
            let p = record.position;
            let n = record.normal;
            let rgb = f32::from_bits(record.packed_rgb());
            match options.data_format {
                PcdDataFormat::Ascii => {
                    writeln!(writer, "{} {} {} {} {} {} {}", p.x, p.y, p.z, n.x, n.y, n.z, rgb)?;
                }
                PcdDataFormat::Binary => {
                    for value in [p.x, p.y, p.z, n.x, n.y, n.z] {
                        writer.write_all(&value.to_le_bytes())?;
                    }
                    writer.write_all(&rgb.to_le_bytes())?;
                }
                PcdDataFormat::BinaryCompressed => {
                    return Err(mvreg_core::Error::Unsupported(
                        "Binary compressed PCD format not yet supported".to_string(),
                    ))
                }
            }
            written += 1;
        }

        if written != count {
            return Err(IoError::WriteError {
                message: format!("declared {} points but wrote {}", count, written),
            }
            .into());
        }
        Ok(())
    }

    /// Write PCD header
    fn write_header<W: Write>(writer: &mut W, header: &PcdHeader) -> Result<()> {
        writeln!(writer, "# .PCD v{} - Point Cloud Data file format", header.version)?;
        writeln!(writer, "VERSION {}", header.version)?;
        write!(writer, "FIELDS")?;
        for field in &header.fields {
            write!(writer, " {}", field.name)?;
        }
        writeln!(writer)?;

        write!(writer, "SIZE")?;
        for field in &header.fields {
            write!(writer, " {}", field.field_type.size())?;
        }
        writeln!(writer)?;

        write!(writer, "TYPE")?;
        for field in &header.fields {
            write!(writer, " {}", field.field_type.type_char())?;
        }
        writeln!(writer)?;

        write!(writer, "COUNT")?;
        for field in &header.fields {
            write!(writer, " {}", field.count)?;
        }
        writeln!(writer)?;

        writeln!(writer, "WIDTH {}", header.width)?;
        writeln!(writer, "HEIGHT {}", header.height)?;
        let v = header.viewpoint;
        writeln!(writer, "VIEWPOINT {} {} {} {} {} {} {}", v[0], v[1], v[2], v[3], v[4], v[5], v[6])?;
        writeln!(writer, "POINTS {}", header.point_count())?;

        let data_str = match header.data_format {
            PcdDataFormat::Ascii => "ascii",
            PcdDataFormat::Binary => "binary",
            PcdDataFormat::BinaryCompressed => "binary_compressed",
        };
        writeln!(writer, "DATA {}", data_str)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_cloud() -> RecordCloud {
        RecordCloud::from_points(vec![
            PointRecord::new(Point3d::new(1.5, -2.25, 3.0), Vector3d::new(0.0, 1.0, 0.0), [255, 128, 0]),
            PointRecord::new(Point3d::new(0.1, 0.2, 0.3), Vector3d::new(1.0, 0.0, 0.0), [0, 0, 0]),
            PointRecord::new(Point3d::new(-7.0, 8.0, 1e-3), Vector3d::new(0.0, 0.0, -1.0), [12, 34, 56]),
        ])
    }

    fn write_to_bytes(cloud: &RecordCloud, data_format: PcdDataFormat) -> Vec<u8> {
        let mut bytes = Vec::new();
        let options = PcdWriteOptions {
            data_format,
            ..PcdWriteOptions::default()
        };
        PcdWriter::write_records(cloud.iter(), cloud.len(), &mut bytes, &options).unwrap();
        bytes
    }

    #[test]
    fn test_binary_records_are_exact() {
        let cloud = sample_cloud();
        let bytes = write_to_bytes(&cloud, PcdDataFormat::Binary);
        let read = PcdReader::read_records(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(read, cloud);
    }

    #[test]
    fn test_ascii_records_are_exact() {
        let cloud = sample_cloud();
        let bytes = write_to_bytes(&cloud, PcdDataFormat::Ascii);
        let read = PcdReader::read_records(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(read, cloud);
    }

    #[test]
    fn test_header_fields() {
        let bytes = write_to_bytes(&sample_cloud(), PcdDataFormat::Binary);
        let header = PcdReader::read_header(&mut Cursor::new(bytes)).unwrap();

        assert_eq!(header.point_count(), 3);
        assert_eq!(header.fields.len(), 7);
        assert_eq!(header.fields[0].field_type, PcdFieldType::F64);
        assert_eq!(header.fields[6].name, "rgb");
        assert_eq!(header.fields[6].field_type, PcdFieldType::F32);
    }

    #[test]
    fn test_read_float_xyz_with_uint_rgb() {
        let text = "VERSION .7\nFIELDS x y z rgb\nSIZE 4 4 4 4\nTYPE F F F U\nCOUNT 1 1 1 1\n\
                    WIDTH 2\nHEIGHT 1\nPOINTS 2\nDATA ascii\n1.5 2 3 16711680\n4 5 6 255\n";
        let cloud = PcdReader::read_records(&mut Cursor::new(text)).unwrap();

        assert_eq!(cloud.len(), 2);
        assert_eq!(cloud[0].position, Point3d::new(1.5, 2.0, 3.0));
        assert_eq!(cloud[0].color, [255, 0, 0]);
        assert_eq!(cloud[1].color, [0, 0, 255]);
        assert_eq!(cloud[1].normal, PointRecord::default().normal);
    }

    #[test]
    fn test_missing_xyz_rejected() {
        let text = "VERSION .7\nFIELDS a b\nSIZE 4 4\nTYPE F F\nCOUNT 1 1\nWIDTH 1\nHEIGHT 1\nDATA ascii\n1 2\n";
        assert!(PcdReader::read_records(&mut Cursor::new(text)).is_err());
    }

    #[test]
    fn test_truncated_binary_rejected() {
        let mut bytes = write_to_bytes(&sample_cloud(), PcdDataFormat::Binary);
        bytes.truncate(bytes.len() - 5);
        assert!(PcdReader::read_records(&mut Cursor::new(bytes)).is_err());
    }
}

//! `points.bxyzuv`: raw scanner output
//!
//! A headerless stream of little-endian `f64` quintuples `x y z u v`, where
//! `(u, v)` is the snapshot pixel the point was seen at.

use crate::error::IoError;
use bytemuck::{Pod, Zeroable};
use mvreg_core::{Point3d, Result};
use std::fs;
use std::path::Path;

pub const BXYZUV_FILE_NAME: &str = "points.bxyzuv";

/// On-disk layout of one sample, each field a little-endian `f64` bit pattern
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct RawSample {
    x: u64,
    y: u64,
    z: u64,
    u: u64,
    v: u64,
}

const SAMPLE_SIZE: usize = std::mem::size_of::<RawSample>();

fn decode(bits: u64) -> f64 {
    f64::from_bits(u64::from_le(bits))
}

fn encode(value: f64) -> u64 {
    value.to_bits().to_le()
}

/// A scanned point with the image coordinate it came from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanSample {
    pub position: Point3d,
    pub u: f64,
    pub v: f64,
}

/// Decode a sample stream; the length must be a whole number of samples
pub fn parse_bxyzuv(bytes: &[u8]) -> Result<Vec<ScanSample>> {
    if bytes.len() % SAMPLE_SIZE != 0 {
        return Err(IoError::format(format!(
            "bxyzuv stream of {} bytes is not a multiple of {}",
            bytes.len(),
            SAMPLE_SIZE
        ))
        .into());
    }

    Ok(bytes
        .chunks_exact(SAMPLE_SIZE)
        .map(|chunk| {
            let raw: RawSample = bytemuck::pod_read_unaligned(chunk);
            ScanSample {
                position: Point3d::new(decode(raw.x), decode(raw.y), decode(raw.z)),
                u: decode(raw.u),
                v: decode(raw.v),
            }
        })
        .collect())
}

/// Encode samples in file form
pub fn encode_bxyzuv(samples: &[ScanSample]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * SAMPLE_SIZE);
    for sample in samples {
        let raw = RawSample {
            x: encode(sample.position.x),
            y: encode(sample.position.y),
            z: encode(sample.position.z),
            u: encode(sample.u),
            v: encode(sample.v),
        };
        bytes.extend_from_slice(bytemuck::bytes_of(&raw));
    }
    bytes
}

pub fn read_bxyzuv<P: AsRef<Path>>(path: P) -> Result<Vec<ScanSample>> {
    parse_bxyzuv(&fs::read(path)?)
}

pub fn write_bxyzuv<P: AsRef<Path>>(path: P, samples: &[ScanSample]) -> Result<()> {
    fs::write(path, encode_bxyzuv(samples))?;
    Ok(())
}

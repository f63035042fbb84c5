//! MetaImage codec: `.mha` with inline voxels, or a `.mhd` header naming a
//! separate `.raw` file. Zlib compressed voxel data is read but never written.

use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

use nalgebra::{Matrix3, Vector3};

use super::format::has_extension;
use super::raw::{byte_len, encode_i16_le, inflate, parse_numbers, Deflate, ElementType};
use super::Volume;
use crate::error::ConvertError;

struct MetaHeader {
    fields: Vec<(String, String)>,
}

impl MetaHeader {
    fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    fn first_of(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| self.get(key))
    }

    fn is_true(&self, keys: &[&str]) -> bool {
        self.first_of(keys)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }
}

/// Parses header lines up to and including `ElementDataFile`. Returns the
/// header and the byte offset just past it.
fn parse_header(path: &Path, bytes: &[u8]) -> Result<(MetaHeader, usize), ConvertError> {
    let mut fields = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let end = bytes[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(bytes.len(), |i| pos + i);
        let line = std::str::from_utf8(&bytes[pos..end])
            .map_err(|_| ConvertError::header(path, "header is not valid text"))?
            .trim();
        pos = (end + 1).min(bytes.len());
        if line.is_empty() {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| ConvertError::header(path, format!("malformed header line `{line}`")))?;
        let key = key.trim();
        fields.push((key.to_owned(), value.trim().to_owned()));
        if key.eq_ignore_ascii_case("ElementDataFile") {
            return Ok((MetaHeader { fields }, pos));
        }
    }
    Err(ConvertError::header(path, "missing ElementDataFile"))
}

fn vector3(path: &Path, header: &MetaHeader, keys: &[&str]) -> Result<Option<Vector3<f64>>, ConvertError> {
    match header.first_of(keys) {
        None => Ok(None),
        Some(text) => match parse_numbers::<f64>(text).as_deref() {
            Some(&[x, y, z]) => Ok(Some(Vector3::new(x, y, z))),
            _ => Err(ConvertError::header(
                path,
                format!("{} must hold 3 numbers, got `{text}`", keys[0]),
            )),
        },
    }
}

pub fn read(path: &Path) -> Result<Volume, ConvertError> {
    // a `.raw` path stands for the `.mhd` header next to it
    let header_path = if has_extension(path, "raw") {
        path.with_extension("mhd")
    } else {
        path.to_path_buf()
    };
    let bytes = fs::read(&header_path).map_err(ConvertError::io(&header_path))?;
    let (header, data_offset) = parse_header(&header_path, &bytes)?;
    let path = header_path.as_path();

    let ndims = header.get("NDims").and_then(|v| v.parse::<usize>().ok());
    if ndims != Some(3) {
        return Err(ConvertError::header(path, "only 3D images are supported"));
    }
    let dims: [usize; 3] = header
        .get("DimSize")
        .and_then(parse_numbers::<usize>)
        .and_then(|d| d.try_into().ok())
        .ok_or_else(|| ConvertError::header(path, "DimSize must hold 3 sizes"))?;
    if header
        .get("ElementNumberOfChannels")
        .is_some_and(|c| c != "1")
    {
        return Err(ConvertError::header(path, "only single channel images are supported"));
    }
    let element = match header.get("ElementType") {
        Some("MET_UCHAR") => ElementType::U8,
        Some("MET_CHAR") => ElementType::I8,
        Some("MET_USHORT") => ElementType::U16,
        Some("MET_SHORT") => ElementType::I16,
        Some("MET_INT") => ElementType::I32,
        Some("MET_FLOAT") => ElementType::F32,
        other => {
            return Err(ConvertError::header(
                path,
                format!("unsupported ElementType {other:?}"),
            ))
        }
    };
    let big_endian = header.is_true(&["BinaryDataByteOrderMSB", "ElementByteOrderMSB"]);

    let spacing = vector3(path, &header, &["ElementSpacing", "ElementSize"])?
        .unwrap_or_else(|| Vector3::repeat(1.0));
    let origin = vector3(path, &header, &["Offset", "Position", "Origin"])?
        .unwrap_or_else(Vector3::zeros);
    let direction = match header.first_of(&["TransformMatrix", "Rotation", "Orientation"]) {
        None => Matrix3::identity(),
        Some(text) => match parse_numbers::<f64>(text) {
            Some(values) if values.len() == 9 => Matrix3::from_column_slice(&values),
            _ => {
                return Err(ConvertError::header(
                    path,
                    "TransformMatrix must hold 9 numbers",
                ))
            }
        },
    };

    let needed = byte_len(dims, element)
        .ok_or_else(|| ConvertError::header(path, "image size overflows"))?;
    let compressed = header.is_true(&["CompressedData"]);
    let data_file = header.get("ElementDataFile").unwrap_or_default();
    let stored: Vec<u8> = if data_file.eq_ignore_ascii_case("LOCAL") {
        bytes[data_offset..].to_vec()
    } else if data_file.eq_ignore_ascii_case("LIST") || data_file.contains('%') {
        return Err(ConvertError::header(
            path,
            "multi-file ElementDataFile is not supported",
        ));
    } else {
        let raw_path = header_path
            .parent()
            .map_or_else(|| PathBuf::from(data_file), |dir| dir.join(data_file));
        let raw = fs::read(&raw_path).map_err(ConvertError::io(&raw_path))?;
        match header.get("HeaderSize").and_then(|v| v.parse::<i64>().ok()) {
            Some(-1) if !compressed => raw[raw.len().saturating_sub(needed)..].to_vec(),
            Some(skip) if skip > 0 => usize::try_from(skip)
                .ok()
                .and_then(|skip| raw.get(skip..))
                .unwrap_or_default()
                .to_vec(),
            _ => raw,
        }
    };
    let voxel_bytes = if compressed {
        inflate(&stored, Deflate::Zlib, needed).map_err(|e| {
            ConvertError::header(path, format!("corrupt compressed voxel data: {e}"))
        })?
    } else {
        stored
    };
    if voxel_bytes.len() < needed {
        return Err(ConvertError::header(
            path,
            format!(
                "expected {needed} bytes of voxel data, found {}",
                voxel_bytes.len()
            ),
        ));
    }

    let values = element.decode(&voxel_bytes[..needed], big_endian);
    Ok(Volume {
        data: Volume::array_from_x_fastest(dims, values)?,
        spacing,
        origin,
        direction,
    })
}

fn join<T: Display>(values: impl IntoIterator<Item = T>) -> String {
    values
        .into_iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_header(volume: &Volume, data_file: &str) -> String {
    [
        "ObjectType = Image".to_owned(),
        "NDims = 3".to_owned(),
        "BinaryData = True".to_owned(),
        "BinaryDataByteOrderMSB = False".to_owned(),
        "CompressedData = False".to_owned(),
        format!("TransformMatrix = {}", join(volume.direction.iter())),
        format!("Offset = {}", join(volume.origin.iter())),
        format!("ElementSpacing = {}", join(volume.spacing.iter())),
        format!("DimSize = {}", join(volume.dims())),
        "ElementType = MET_SHORT".to_owned(),
        format!("ElementDataFile = {data_file}"),
    ]
    .iter()
    .map(|line| format!("{line}\n"))
    .collect()
}

pub fn write(volume: &Volume, path: &Path) -> Result<(), ConvertError> {
    let voxels = encode_i16_le(volume.voxels_x_fastest());
    if has_extension(path, "mhd") {
        let raw_path = path.with_extension("raw");
        let raw_name = raw_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ConvertError::header(path, "output name is not valid UTF-8"))?;
        fs::write(path, format_header(volume, raw_name)).map_err(ConvertError::io(path))?;
        fs::write(&raw_path, voxels).map_err(ConvertError::io(&raw_path))?;
    } else {
        let mut bytes = format_header(volume, "LOCAL").into_bytes();
        bytes.extend_from_slice(&voxels);
        fs::write(path, bytes).map_err(ConvertError::io(path))?;
    }
    Ok(())
}

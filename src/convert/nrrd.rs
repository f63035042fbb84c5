//! NRRD codec for 3D volumes: attached (`.nrrd`) or detached (`.nhdr`)
//! data, `raw` or `gzip` encoded. Written files are always raw.
//!
//! Format reference: http://teem.sourceforge.net/nrrd/format.html

use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};

use nalgebra::{Matrix3, Vector3};

use super::format::has_extension;
use super::raw::{byte_len, encode_i16_le, inflate, parse_numbers, Deflate, ElementType};
use super::Volume;
use crate::error::ConvertError;

fn element_type(name: &str) -> Option<ElementType> {
    let t = match name {
        "uchar" | "unsigned char" | "uint8" | "uint8_t" => ElementType::U8,
        "signed char" | "int8" | "int8_t" => ElementType::I8,
        "ushort" | "unsigned short" | "unsigned short int" | "uint16" | "uint16_t" => {
            ElementType::U16
        }
        "short" | "short int" | "signed short" | "signed short int" | "int16" | "int16_t" => {
            ElementType::I16
        }
        "int" | "signed int" | "int32" | "int32_t" => ElementType::I32,
        "float" => ElementType::F32,
        _ => return None,
    };
    Some(t)
}

/// Parses `(x,y,z)`.
fn parse_vector(text: &str) -> Option<Vector3<f64>> {
    let inner = text.trim().strip_prefix('(')?.strip_suffix(')')?;
    let values: Vec<f64> = inner
        .split(',')
        .map(|v| v.trim().parse().ok())
        .collect::<Option<_>>()?;
    match values.as_slice() {
        &[x, y, z] => Some(Vector3::new(x, y, z)),
        _ => None,
    }
}

fn format_vector(v: &Vector3<f64>) -> String {
    format!("({},{},{})", v.x, v.y, v.z)
}

/// Splits the header into lower-cased `key: value` fields. Returns them with
/// the offset of the attached data, which starts after the first blank line.
fn parse_header(path: &Path, bytes: &[u8]) -> Result<(Vec<(String, String)>, usize), ConvertError> {
    let mut fields = Vec::new();
    let mut pos = 0;
    let mut first = true;
    while pos < bytes.len() {
        let end = bytes[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(bytes.len(), |i| pos + i);
        let line = std::str::from_utf8(&bytes[pos..end])
            .map_err(|_| ConvertError::header(path, "header is not valid text"))?
            .trim_end_matches('\r');
        pos = (end + 1).min(bytes.len());
        if first {
            first = false;
            continue;
        }
        if line.is_empty() {
            break;
        }
        if line.starts_with('#') || line.contains(":=") {
            continue;
        }
        let (key, value) = line
            .split_once(": ")
            .ok_or_else(|| ConvertError::header(path, format!("malformed field `{line}`")))?;
        fields.push((key.trim().to_ascii_lowercase(), value.trim().to_owned()));
    }
    Ok((fields, pos))
}

pub fn read(path: &Path) -> Result<Volume, ConvertError> {
    let bytes = fs::read(path).map_err(ConvertError::io(path))?;
    if !bytes.starts_with(b"NRRD000") {
        return Err(ConvertError::header(path, "missing NRRD magic"));
    }

    let (fields, data_offset) = parse_header(path, &bytes)?;
    let get = |key: &str| {
        fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    };

    if get("dimension") != Some("3") {
        return Err(ConvertError::header(path, "only 3D images are supported"));
    }
    let framing = match get("encoding") {
        Some("raw") => None,
        Some("gzip") | Some("gz") => Some(Deflate::Gzip),
        other => {
            return Err(ConvertError::header(
                path,
                format!("unsupported encoding {other:?}"),
            ))
        }
    };
    let element = get("type")
        .and_then(element_type)
        .ok_or_else(|| ConvertError::header(path, format!("unsupported type {:?}", get("type"))))?;
    let big_endian = get("endian") == Some("big");
    let dims: [usize; 3] = get("sizes")
        .and_then(parse_numbers::<usize>)
        .and_then(|d| d.try_into().ok())
        .ok_or_else(|| ConvertError::header(path, "sizes must hold 3 values"))?;

    // RAS and LAS headers are brought into LPS
    let flip = match get("space") {
        None | Some("left-posterior-superior") | Some("LPS") => Vector3::new(1.0, 1.0, 1.0),
        Some("right-anterior-superior") | Some("RAS") => Vector3::new(-1.0, -1.0, 1.0),
        Some("left-anterior-superior") | Some("LAS") => Vector3::new(1.0, -1.0, 1.0),
        Some(other) => {
            return Err(ConvertError::header(
                path,
                format!("unsupported space `{other}`"),
            ))
        }
    };
    let flip = Matrix3::from_diagonal(&flip);

    let mut affine_linear = Matrix3::identity();
    if let Some(text) = get("space directions") {
        let columns: Vec<Vector3<f64>> = text
            .split_whitespace()
            .map(parse_vector)
            .collect::<Option<_>>()
            .filter(|c: &Vec<_>| c.len() == 3)
            .ok_or_else(|| ConvertError::header(path, "space directions must hold 3 vectors"))?;
        for (axis, column) in columns.iter().enumerate() {
            affine_linear.set_column(axis, &(flip * column));
        }
    } else if let Some(text) = get("spacings") {
        let spacings = parse_numbers::<f64>(text)
            .filter(|s| s.len() == 3)
            .ok_or_else(|| ConvertError::header(path, "spacings must hold 3 values"))?;
        affine_linear = Matrix3::from_diagonal(&Vector3::from_column_slice(&spacings));
    }
    let origin = match get("space origin") {
        Some(text) => {
            flip * parse_vector(text)
                .ok_or_else(|| ConvertError::header(path, "space origin must be `(x,y,z)`"))?
        }
        None => Vector3::zeros(),
    };

    let needed = byte_len(dims, element)
        .ok_or_else(|| ConvertError::header(path, "image size overflows"))?;
    let stored: Cow<[u8]> = match get("data file").or_else(|| get("datafile")) {
        None => Cow::Borrowed(&bytes[data_offset..]),
        Some(name) if name.starts_with("LIST") || name.split_whitespace().count() > 1 => {
            return Err(ConvertError::header(
                path,
                "multi-file data is not supported",
            ))
        }
        Some(name) => {
            let data_path = path
                .parent()
                .map_or_else(|| PathBuf::from(name), |dir| dir.join(name));
            Cow::Owned(fs::read(&data_path).map_err(ConvertError::io(&data_path))?)
        }
    };
    let byte_skip = match get("byte skip") {
        None => 0,
        Some(text) => text
            .parse::<i64>()
            .map_err(|_| ConvertError::header(path, format!("invalid byte skip `{text}`")))?,
    };
    let voxel_bytes: Cow<[u8]> = match (framing, byte_skip) {
        (None, -1) => Cow::Borrowed(&stored[stored.len().saturating_sub(needed)..]),
        (None, skip) => Cow::Borrowed(
            usize::try_from(skip)
                .ok()
                .and_then(|skip| stored.get(skip..))
                .unwrap_or_default(),
        ),
        (Some(framing), 0) => Cow::Owned(inflate(&stored, framing, needed).map_err(|e| {
            ConvertError::header(path, format!("corrupt compressed voxel data: {e}"))
        })?),
        (Some(_), _) => {
            return Err(ConvertError::header(
                path,
                "byte skip is only supported for raw encoding",
            ))
        }
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

    let voxels = element.decode(&voxel_bytes[..needed], big_endian);
    let data = Volume::array_from_x_fastest(dims, voxels)?;
    let mut affine = nalgebra::Matrix4::identity();
    affine.fixed_slice_mut::<3, 3>(0, 0).copy_from(&affine_linear);
    affine.fixed_slice_mut::<3, 1>(0, 3).copy_from(&origin);
    Ok(Volume::from_affine(data, &affine))
}

fn format_header(volume: &Volume, data_file: Option<&str>) -> String {
    let [nx, ny, nz] = volume.dims();
    let directions: Vec<String> = (0..3)
        .map(|axis| {
            let column: Vector3<f64> = volume.direction.column(axis) * volume.spacing[axis];
            format_vector(&column)
        })
        .collect();

    let mut header = format!(
        "NRRD0004\n\
         # Complete NRRD file format specification at:\n\
         # http://teem.sourceforge.net/nrrd/format.html\n\
         type: short\n\
         dimension: 3\n\
         space: left-posterior-superior\n\
         sizes: {nx} {ny} {nz}\n\
         space directions: {}\n\
         kinds: domain domain domain\n\
         endian: little\n\
         encoding: raw\n\
         space origin: {}\n",
        directions.join(" "),
        format_vector(&volume.origin),
    );
    if let Some(name) = data_file {
        header.push_str(&format!("data file: {name}\n"));
    }
    header.push('\n');
    header
}

/// Writes `path`; a `.nhdr` path gets its voxels in a `.raw` file beside it.
pub fn write(volume: &Volume, path: &Path) -> Result<(), ConvertError> {
    let voxels = encode_i16_le(volume.voxels_x_fastest());
    if has_extension(path, "nhdr") {
        let raw_path = path.with_extension("raw");
        let raw_name = raw_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ConvertError::header(path, "output name is not valid UTF-8"))?;
        fs::write(path, format_header(volume, Some(raw_name))).map_err(ConvertError::io(path))?;
        fs::write(&raw_path, voxels).map_err(ConvertError::io(&raw_path))
    } else {
        let mut bytes = format_header(volume, None).into_bytes();
        bytes.extend_from_slice(&voxels);
        fs::write(path, bytes).map_err(ConvertError::io(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::tests::{assert_geometry_close, sample_volume};
    use pretty_assertions::assert_eq;

    #[test]
    fn round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.nrrd");
        let volume = sample_volume();
        write(&volume, &path).unwrap();

        let back = read(&path).unwrap();
        assert_eq!(back.data, volume.data);
        assert_geometry_close(&back, &volume);
    }

    #[test]
    fn reads_ras_spacings_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ras.nrrd");
        let mut bytes = b"NRRD0004\n# comment\ntype: uchar\ndimension: 3\nspace: RAS\n\
            sizes: 2 1 1\nspacings: 0.5 0.5 2\nencoding: raw\nspace origin: (10,20,30)\n\n"
            .to_vec();
        bytes.extend_from_slice(&[7, 9]);
        fs::write(&path, bytes).unwrap();

        let volume = read(&path).unwrap();
        assert_eq!(volume.data.iter().copied().collect::<Vec<_>>(), vec![7, 9]);
        assert_eq!(volume.spacing, Vector3::new(0.5, 0.5, 2.0));
        assert_eq!(volume.origin, Vector3::new(-10.0, -20.0, 30.0));
    }

    #[test]
    fn rejects_unsupported_headers() {
        let dir = tempfile::tempdir().unwrap();
        for (name, header) in [
            ("bz.nrrd", "NRRD0004\ntype: short\ndimension: 3\nsizes: 1 1 1\nencoding: bzip2\n\n"),
            ("gz.nrrd", "NRRD0004\ntype: short\ndimension: 3\nsizes: 1 1 1\nencoding: gzip\n\nxx"),
            ("list.nrrd", "NRRD0004\ntype: short\ndimension: 3\nsizes: 1 1 1\nencoding: raw\ndata file: LIST\n\n"),
            ("huge.nrrd", "NRRD0004\ntype: short\ndimension: 3\nsizes: 4294967296 4294967296 2\nencoding: raw\n\n"),
            ("bad.nrrd", "P5\n"),
        ] {
            let path = dir.path().join(name);
            fs::write(&path, header).unwrap();
            assert!(
                matches!(read(&path), Err(ConvertError::Header { .. })),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn oversized_sizes_are_header_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.nrrd");
        fs::write(
            &path,
            "NRRD0004\ntype: short\ndimension: 3\nsizes: 4294967296 4294967296 2\nencoding: raw\n\n",
        )
        .unwrap();

        let err = read(&path).unwrap_err();
        assert!(
            matches!(&err, ConvertError::Header { message, .. } if message == "image size overflows"),
            "{err}"
        );
    }

    #[test]
    fn detached_header_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.nhdr");
        let volume = sample_volume();
        write(&volume, &path).unwrap();

        let header = fs::read_to_string(&path).unwrap();
        assert!(header.contains("data file: scan.raw\n"));
        assert_eq!(
            fs::metadata(dir.path().join("scan.raw")).unwrap().len(),
            3 * 4 * 5 * 2
        );

        let back = read(&path).unwrap();
        assert_eq!(back.data, volume.data);
        assert_geometry_close(&back, &volume);
    }

    #[test]
    fn reads_gzip_encoded_data() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gz.nrrd");
        let volume = sample_volume();

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&encode_i16_le(volume.voxels_x_fastest()))
            .unwrap();
        let mut bytes = format_header(&volume, None)
            .replace("encoding: raw", "encoding: gzip")
            .into_bytes();
        bytes.extend_from_slice(&encoder.finish().unwrap());
        fs::write(&path, bytes).unwrap();

        let back = read(&path).unwrap();
        assert_eq!(back.data, volume.data);
        assert_geometry_close(&back, &volume);
    }

    #[test]
    fn byte_skip_from_the_end_of_a_detached_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("data.bin"), [0xaa, 0xbb, 0xcc, 3, 4]).unwrap();
        let path = dir.path().join("skip.nhdr");
        fs::write(
            &path,
            "NRRD0004\ntype: uchar\ndimension: 3\nsizes: 2 1 1\nencoding: raw\nbyte skip: -1\ndata file: data.bin\n",
        )
        .unwrap();

        let volume = read(&path).unwrap();
        assert_eq!(volume.data.iter().copied().collect::<Vec<_>>(), vec![3, 4]);
    }
}

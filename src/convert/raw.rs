//! Raw voxel buffers shared by the MetaImage and NRRD codecs.

use std::io::{self, Read};

use flate2::read::{GzDecoder, ZlibDecoder};

/// Scalar types accepted on read. Everything is stored as `i16` afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    U8,
    I8,
    U16,
    I16,
    I32,
    F32,
}

impl ElementType {
    pub fn size(&self) -> usize {
        match self {
            ElementType::U8 | ElementType::I8 => 1,
            ElementType::U16 | ElementType::I16 => 2,
            ElementType::I32 | ElementType::F32 => 4,
        }
    }

    /// Decodes `bytes` into `i16`, saturating values that do not fit.
    pub fn decode(&self, bytes: &[u8], big_endian: bool) -> Vec<i16> {
        let size = self.size();
        bytes
            .chunks_exact(size)
            .map(|chunk| match self {
                ElementType::U8 => i16::from(chunk[0]),
                ElementType::I8 => i16::from(chunk[0] as i8),
                ElementType::U16 => {
                    let v = if big_endian {
                        u16::from_be_bytes([chunk[0], chunk[1]])
                    } else {
                        u16::from_le_bytes([chunk[0], chunk[1]])
                    };
                    i16::try_from(v).unwrap_or(i16::MAX)
                }
                ElementType::I16 => {
                    if big_endian {
                        i16::from_be_bytes([chunk[0], chunk[1]])
                    } else {
                        i16::from_le_bytes([chunk[0], chunk[1]])
                    }
                }
                ElementType::I32 => {
                    let b = [chunk[0], chunk[1], chunk[2], chunk[3]];
                    let v = if big_endian {
                        i32::from_be_bytes(b)
                    } else {
                        i32::from_le_bytes(b)
                    };
                    v.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
                }
                ElementType::F32 => {
                    let b = [chunk[0], chunk[1], chunk[2], chunk[3]];
                    let v = if big_endian {
                        f32::from_be_bytes(b)
                    } else {
                        f32::from_le_bytes(b)
                    };
                    // `as` saturates and maps NaN to 0
                    v.round() as i16
                }
            })
            .collect()
    }
}

/// Rounds to the nearest `i16`, saturating out of range values and mapping
/// NaN to 0.
pub fn saturate_i16(value: f64) -> i16 {
    value.round() as i16
}

/// Number of bytes in a `dims` volume of `element`, `None` if it overflows.
pub fn byte_len(dims: [usize; 3], element: ElementType) -> Option<usize> {
    dims.iter()
        .try_fold(element.size(), |total, &dim| total.checked_mul(dim))
}

/// Stream framing of compressed voxel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deflate {
    /// MetaImage `CompressedData = True`.
    Zlib,
    /// NRRD `encoding: gzip`.
    Gzip,
}

/// Inflates `bytes`, stopping after `limit` output bytes.
pub fn inflate(bytes: &[u8], framing: Deflate, limit: usize) -> io::Result<Vec<u8>> {
    let limit = u64::try_from(limit).unwrap_or(u64::MAX);
    let mut out = Vec::new();
    match framing {
        Deflate::Zlib => ZlibDecoder::new(bytes).take(limit).read_to_end(&mut out)?,
        Deflate::Gzip => GzDecoder::new(bytes).take(limit).read_to_end(&mut out)?,
    };
    Ok(out)
}

/// Little-endian `i16` bytes of `values`.
pub fn encode_i16_le<'a>(values: impl Iterator<Item = &'a i16>) -> Vec<u8> {
    values.flat_map(|v| v.to_le_bytes()).collect()
}

/// Parses a whitespace separated list of numbers.
pub fn parse_numbers<T: std::str::FromStr>(text: &str) -> Option<Vec<T>> {
    text.split_whitespace().map(|t| t.parse().ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn saturates_floats() {
        assert_eq!(saturate_i16(-1.5), -2);
        assert_eq!(saturate_i16(1e9), i16::MAX);
        assert_eq!(saturate_i16(f64::NEG_INFINITY), i16::MIN);
        assert_eq!(saturate_i16(f64::NAN), 0);
    }

    #[test]
    fn decodes_and_saturates() {
        assert_eq!(ElementType::U8.decode(&[0, 255], false), vec![0, 255]);
        assert_eq!(ElementType::I8.decode(&[0xff], false), vec![-1]);
        assert_eq!(ElementType::U16.decode(&[0xff, 0xff], false), vec![i16::MAX]);
        assert_eq!(ElementType::I16.decode(&[0x01, 0x00], true), vec![256]);
        assert_eq!(
            ElementType::I32.decode(&(-100_000i32).to_le_bytes(), false),
            vec![i16::MIN]
        );
        assert_eq!(ElementType::F32.decode(&1.6f32.to_be_bytes(), true), vec![2]);
    }

    #[test]
    fn encodes_little_endian() {
        assert_eq!(encode_i16_le([1i16, -2].iter()), vec![1, 0, 0xfe, 0xff]);
    }

    #[test]
    fn byte_len_detects_overflow() {
        assert_eq!(byte_len([3, 4, 5], ElementType::I16), Some(120));
        assert_eq!(byte_len([1 << 32, 1 << 32, 2], ElementType::U8), None);
        assert_eq!(byte_len([usize::MAX, 1, 1], ElementType::I16), None);
    }

    #[test]
    fn inflates_both_framings_up_to_the_limit() {
        use flate2::write::{GzEncoder, ZlibEncoder};
        use flate2::Compression;
        use std::io::Write;

        let payload: Vec<u8> = (0..=255).collect();
        let mut zlib = ZlibEncoder::new(Vec::new(), Compression::default());
        zlib.write_all(&payload).unwrap();
        let zlib = zlib.finish().unwrap();
        let mut gzip = GzEncoder::new(Vec::new(), Compression::default());
        gzip.write_all(&payload).unwrap();
        let gzip = gzip.finish().unwrap();

        assert_eq!(inflate(&zlib, Deflate::Zlib, 1000).unwrap(), payload);
        assert_eq!(inflate(&gzip, Deflate::Gzip, 16).unwrap(), payload[..16].to_vec());
        assert!(inflate(b"not compressed", Deflate::Zlib, 1000).is_err());
    }

    #[test]
    fn parses_number_lists() {
        assert_eq!(parse_numbers::<usize>("3 4  5"), Some(vec![3, 4, 5]));
        assert_eq!(parse_numbers::<f64>("1 x"), None);
    }
}

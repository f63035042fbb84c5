//! Grayscale TIFF stacks: every page (or every file of a series) is one z
//! slice. TIFF carries no geometry, so volumes read back with unit spacing.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use nalgebra::Vector3;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype::GrayI16, TiffEncoder};
use tiff::ColorType;
use tracing::{debug, warn};

use super::raw::saturate_i16;
use super::Volume;
use crate::error::ConvertError;

/// Pages gathered so far, x varying fastest within each page.
#[derive(Default)]
struct Stack {
    size: Option<(u32, u32)>,
    pages: usize,
    values: Vec<i16>,
}

impl Stack {
    fn push_file(&mut self, path: &Path) -> Result<(), ConvertError> {
        let file = File::open(path).map_err(ConvertError::io(path))?;
        let mut decoder = Decoder::new(BufReader::new(file)).map_err(ConvertError::tiff(path))?;
        loop {
            self.push_page(path, &mut decoder)?;
            if !decoder.more_images() {
                return Ok(());
            }
            decoder.next_image().map_err(ConvertError::tiff(path))?;
        }
    }

    fn push_page(
        &mut self,
        path: &Path,
        decoder: &mut Decoder<BufReader<File>>,
    ) -> Result<(), ConvertError> {
        let size = decoder.dimensions().map_err(ConvertError::tiff(path))?;
        match decoder.colortype().map_err(ConvertError::tiff(path))? {
            ColorType::Gray(_) => {}
            other => {
                return Err(ConvertError::header(
                    path,
                    format!("only grayscale TIFF is supported, found {other:?}"),
                ))
            }
        }
        match self.size {
            None => self.size = Some(size),
            Some(first) if first != size => {
                return Err(ConvertError::header(
                    path,
                    format!(
                        "page is {}x{}, earlier pages are {}x{}",
                        size.0, size.1, first.0, first.1
                    ),
                ))
            }
            Some(_) => {}
        }

        let page: Vec<i16> = match decoder.read_image().map_err(ConvertError::tiff(path))? {
            DecodingResult::U8(v) => v.into_iter().map(i16::from).collect(),
            DecodingResult::I8(v) => v.into_iter().map(i16::from).collect(),
            DecodingResult::I16(v) => v,
            DecodingResult::U16(v) => v
                .into_iter()
                .map(|x| i16::try_from(x).unwrap_or(i16::MAX))
                .collect(),
            DecodingResult::U32(v) => v.into_iter().map(|x| saturate_i16(f64::from(x))).collect(),
            DecodingResult::I32(v) => v.into_iter().map(|x| saturate_i16(f64::from(x))).collect(),
            DecodingResult::U64(v) => v.into_iter().map(|x| saturate_i16(x as f64)).collect(),
            DecodingResult::I64(v) => v.into_iter().map(|x| saturate_i16(x as f64)).collect(),
            DecodingResult::F32(v) => v.into_iter().map(|x| saturate_i16(f64::from(x))).collect(),
            DecodingResult::F64(v) => v.into_iter().map(saturate_i16).collect(),
            #[allow(unreachable_patterns)]
            _ => return Err(ConvertError::header(path, "unsupported TIFF sample format")),
        };
        let expected = size.0 as usize * size.1 as usize;
        if page.len() != expected {
            return Err(ConvertError::header(
                path,
                format!("expected {expected} samples per page, found {}", page.len()),
            ));
        }
        self.values.extend(page);
        self.pages += 1;
        Ok(())
    }

    fn into_volume(self, path: &Path) -> Result<Volume, ConvertError> {
        let (width, height) = self
            .size
            .ok_or_else(|| ConvertError::header(path, "no pages found"))?;
        let dims = [width as usize, height as usize, self.pages];
        debug!(path = %path.display(), dims = ?dims, "read TIFF stack");
        Ok(Volume::new(Volume::array_from_x_fastest(dims, self.values)?))
    }
}

/// Reads a single, possibly multi-page, TIFF file.
pub fn read(path: &Path) -> Result<Volume, ConvertError> {
    let mut stack = Stack::default();
    stack.push_file(path)?;
    stack.into_volume(path)
}

/// Reads a directory of TIFF files in the given order, one or more pages each.
pub fn read_series(dir: &Path, files: &[PathBuf]) -> Result<Volume, ConvertError> {
    let mut stack = Stack::default();
    for path in files {
        stack.push_file(path)?;
    }
    stack.into_volume(dir)
}

/// Linear map of `values` onto `[0, i16::MAX]`. A constant image maps to 0.
fn rescale_to_positive(values: impl Iterator<Item = i16> + Clone) -> Vec<i16> {
    let (min, max) = values
        .clone()
        .fold((i16::MAX, i16::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
    let range = f64::from(max) - f64::from(min);
    values
        .map(|v| {
            if range > 0.0 {
                saturate_i16((f64::from(v) - f64::from(min)) / range * f64::from(i16::MAX))
            } else {
                0
            }
        })
        .collect()
}

/// Writes a multi-page signed 16-bit TIFF, one page per z slice. Intensities
/// are rescaled to `[0, 32767]` and the voxel geometry is dropped.
pub fn write(volume: &Volume, path: &Path) -> Result<(), ConvertError> {
    let [nx, ny, nz] = volume.dims();
    let (width, height) = match (u32::try_from(nx), u32::try_from(ny)) {
        (Ok(w), Ok(h)) => (w, h),
        _ => return Err(ConvertError::header(path, "slice too large for TIFF")),
    };
    if nx * ny * nz == 0 {
        return Err(ConvertError::header(path, "cannot write an empty volume"));
    }
    if volume.spacing != Vector3::repeat(1.0) {
        warn!(output = %path.display(), "TIFF output does not keep voxel spacing");
    }

    let values = rescale_to_positive(volume.voxels_x_fastest().copied());
    let file = File::create(path).map_err(ConvertError::io(path))?;
    let mut encoder = TiffEncoder::new(BufWriter::new(file)).map_err(ConvertError::tiff(path))?;
    for page in values.chunks(nx * ny).take(nz) {
        encoder
            .write_image::<GrayI16>(width, height, page)
            .map_err(ConvertError::tiff(path))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use pretty_assertions::assert_eq;

    fn positive_volume() -> Volume {
        let data = Array3::from_shape_fn((3, 2, 4), |(i, j, k)| {
            if (i, j, k) == (2, 1, 3) {
                i16::MAX
            } else {
                (i + 10 * j + 100 * k) as i16
            }
        });
        Volume::new(data)
    }

    #[test]
    fn multi_page_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.tif");
        let volume = positive_volume();
        write(&volume, &path).unwrap();

        let back = read(&path).unwrap();
        assert_eq!(back.dims(), [3, 2, 4]);
        assert_eq!(back.data, volume.data);
    }

    #[test]
    fn output_is_rescaled_to_the_positive_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scaled.tif");
        let mut volume = positive_volume();
        volume.data.mapv_inplace(|v| v / 2 - 1000);
        volume.spacing = Vector3::new(0.5, 0.5, 2.0);
        write(&volume, &path).unwrap();

        let back = read(&path).unwrap();
        assert_eq!(back.data[[0, 0, 0]], 0);
        assert_eq!(back.data[[2, 1, 3]], i16::MAX);
        assert_eq!(back.spacing, Vector3::repeat(1.0));
    }

    #[test]
    fn constant_image_writes_zeros() {
        assert_eq!(rescale_to_positive([7_i16, 7, 7].into_iter()), vec![0, 0, 0]);
    }

    #[test]
    fn series_of_files_stacks_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let volume = positive_volume();
        write(&volume, &dir.path().join("a.tif")).unwrap();
        write(&volume, &dir.path().join("b.tif")).unwrap();

        let files = vec![dir.path().join("a.tif"), dir.path().join("b.tif")];
        let back = read_series(dir.path(), &files).unwrap();
        assert_eq!(back.dims(), [3, 2, 8]);
        assert_eq!(back.data[[1, 1, 5]], volume.data[[1, 1, 1]]);
    }

    #[test]
    fn mismatched_pages_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(&positive_volume(), &dir.path().join("a.tif")).unwrap();
        write(
            &Volume::new(Array3::zeros((2, 2, 1))),
            &dir.path().join("b.tif"),
        )
        .unwrap();

        let files = vec![dir.path().join("a.tif"), dir.path().join("b.tif")];
        assert!(matches!(
            read_series(dir.path(), &files),
            Err(ConvertError::Header { .. })
        ));
    }
}

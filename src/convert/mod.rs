//! Conversion between 3D image file formats.
//!
//! The input and output formats are picked from file extensions. Each format
//! has an entry in [`BACKENDS`] saying whether it can be read, as a file or as
//! a directory of slices, and written. Scanco ISQ/AIM have no codec here; they
//! are recognised so they fail with a clear message rather than a bad
//! extension.
//!
//! Voxels are held as `i16`. Geometry is kept in LPS patient coordinates.

mod dicom_io;
mod format;
mod metaimage;
mod nifti_io;
mod nrrd;
mod raw;
mod tiff_io;

pub use format::{classify_input, output_target, strip_version, ImageFormat, ImageSource};

use std::path::{Path, PathBuf};

use nalgebra::{Matrix3, Matrix4, Vector3};
use ndarray::{Array3, ShapeBuilder};
use tracing::info;

use crate::error::ConvertError;

/// A voxel volume and its placement in LPS space. Axis 0 of `data` is x.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    pub data: Array3<i16>,
    pub spacing: Vector3<f64>,
    pub origin: Vector3<f64>,
    /// Columns are the unit directions of the x, y and z voxel axes.
    pub direction: Matrix3<f64>,
}

impl Volume {
    /// A volume with unit spacing at the origin.
    pub fn new(data: Array3<i16>) -> Self {
        Self {
            data,
            spacing: Vector3::repeat(1.0),
            origin: Vector3::zeros(),
            direction: Matrix3::identity(),
        }
    }

    /// Splits a voxel-to-LPS affine into spacing, direction and origin.
    pub fn from_affine(data: Array3<i16>, affine: &Matrix4<f64>) -> Self {
        let linear = affine.fixed_slice::<3, 3>(0, 0).into_owned();
        let mut spacing = Vector3::repeat(1.0);
        let mut direction = Matrix3::identity();
        for axis in 0..3 {
            let column = linear.column(axis);
            let norm = column.norm();
            if norm > 0.0 {
                spacing[axis] = norm;
                direction.set_column(axis, &(column / norm));
            }
        }
        Self {
            data,
            spacing,
            origin: affine.fixed_slice::<3, 1>(0, 3).into_owned(),
            direction,
        }
    }

    /// Voxel index to LPS position.
    pub fn affine(&self) -> Matrix4<f64> {
        let mut affine = Matrix4::identity();
        affine
            .fixed_slice_mut::<3, 3>(0, 0)
            .copy_from(&(self.direction * Matrix3::from_diagonal(&self.spacing)));
        affine.fixed_slice_mut::<3, 1>(0, 3).copy_from(&self.origin);
        affine
    }

    pub fn dims(&self) -> [usize; 3] {
        let shape = self.data.shape();
        [shape[0], shape[1], shape[2]]
    }

    /// Voxels in file order, x varying fastest.
    pub(crate) fn voxels_x_fastest(&self) -> impl Iterator<Item = &i16> + Clone {
        self.data.t().into_iter()
    }

    /// Inverse of [`Volume::voxels_x_fastest`].
    pub(crate) fn array_from_x_fastest(
        dims: [usize; 3],
        values: Vec<i16>,
    ) -> Result<Array3<i16>, ndarray::ShapeError> {
        Array3::from_shape_vec((dims[0], dims[1], dims[2]).f(), values)
    }
}

pub type ReadFn = fn(&Path) -> Result<Volume, ConvertError>;
/// Reads a series directory from its slice files.
pub type SeriesReadFn = fn(&Path, &[PathBuf]) -> Result<Volume, ConvertError>;
pub type WriteFn = fn(&Volume, &Path) -> Result<(), ConvertError>;

/// What can be done with one format.
#[derive(Debug, Clone, Copy)]
pub struct Backend {
    pub format: ImageFormat,
    pub read: Option<ReadFn>,
    pub read_series: Option<SeriesReadFn>,
    pub write: Option<WriteFn>,
}

pub const BACKENDS: &[Backend] = &[
    Backend {
        format: ImageFormat::Mha,
        read: Some(metaimage::read),
        read_series: None,
        write: Some(metaimage::write),
    },
    Backend {
        format: ImageFormat::Mhd,
        read: Some(metaimage::read),
        read_series: None,
        write: Some(metaimage::write),
    },
    Backend {
        format: ImageFormat::Nifti,
        read: Some(nifti_io::read),
        read_series: None,
        write: Some(nifti_io::write),
    },
    Backend {
        format: ImageFormat::Nrrd,
        read: Some(nrrd::read),
        read_series: None,
        write: Some(nrrd::write),
    },
    Backend {
        format: ImageFormat::Dicom,
        read: Some(dicom_io::read),
        read_series: Some(dicom_io::read_series),
        write: Some(dicom_io::write),
    },
    Backend {
        format: ImageFormat::Tiff,
        read: Some(tiff_io::read),
        read_series: Some(tiff_io::read_series),
        write: Some(tiff_io::write),
    },
    Backend {
        format: ImageFormat::Isq,
        read: None,
        read_series: None,
        write: None,
    },
    Backend {
        format: ImageFormat::Aim,
        read: None,
        read_series: None,
        write: None,
    },
];

pub fn backend(format: ImageFormat) -> &'static Backend {
    BACKENDS
        .iter()
        .find(|b| b.format == format)
        .unwrap_or_else(|| unreachable!("every image format has a backend entry"))
}

pub fn read_image(source: &ImageSource) -> Result<Volume, ConvertError> {
    match source {
        ImageSource::File { path, format } => {
            let read = backend(*format).read.ok_or(ConvertError::NoReader(*format))?;
            read(path)
        }
        ImageSource::Series { dir, format, files } => {
            let read = backend(*format)
                .read_series
                .ok_or(ConvertError::NoReader(*format))?;
            read(dir, files)
        }
    }
}

pub fn write_image(volume: &Volume, format: ImageFormat, path: &Path) -> Result<(), ConvertError> {
    let write = backend(format).write.ok_or(ConvertError::NoWriter(format))?;
    write(volume, path)
}

/// Converts `input` (a file or a series directory) to `output`. Returns the
/// path actually written, which differs from `output` for `.raw` and `.isq`
/// and is a directory of slices for `.dcm`.
pub fn convert(input: &Path, output: &Path) -> Result<PathBuf, ConvertError> {
    let source = classify_input(input)?;
    let (format, target) = output_target(output)?;
    if backend(format).write.is_none() {
        return Err(ConvertError::NoWriter(format));
    }

    info!(input = %input.display(), output = %target.display(), "converting");
    let volume = read_image(&source)?;
    info!(dims = ?volume.dims(), spacing = ?volume.spacing.as_slice(), "read image");
    write_image(&volume, format, &target)?;
    info!(output = %target.display(), "wrote image");
    Ok(target)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use nalgebra::Rotation3;
    use ndarray::Array;
    use pretty_assertions::assert_eq;
    use std::fs;

    /// A small volume with non-trivial values and geometry.
    pub(crate) fn sample_volume() -> Volume {
        let data = Array::from_shape_fn((3, 4, 5), |(i, j, k)| {
            (i as i16) - 10 * (j as i16) + 100 * (k as i16)
        });
        Volume {
            data,
            spacing: Vector3::new(0.0607, 0.0607, 0.25),
            origin: Vector3::new(-12.5, 3.0, 40.25),
            direction: Rotation3::from_axis_angle(&Vector3::z_axis(), 0.5).into_inner(),
        }
    }

    pub(crate) fn assert_geometry_close(a: &Volume, b: &Volume) {
        assert!((a.spacing - b.spacing).amax() < 1e-6, "{} vs {}", a.spacing, b.spacing);
        assert!((a.origin - b.origin).amax() < 1e-4, "{} vs {}", a.origin, b.origin);
        assert!(
            (a.direction - b.direction).amax() < 1e-6,
            "{} vs {}",
            a.direction,
            b.direction
        );
    }

    #[test]
    fn affine_round_trip() {
        let volume = sample_volume();
        let rebuilt = Volume::from_affine(volume.data.clone(), &volume.affine());
        assert_geometry_close(&volume, &rebuilt);
    }

    #[test]
    fn x_fastest_order() {
        let volume = Volume::new(Array::from_shape_fn((2, 2, 2), |(i, j, k)| {
            (i + 10 * j + 100 * k) as i16
        }));
        let values: Vec<i16> = volume.voxels_x_fastest().copied().collect();
        assert_eq!(values, vec![0, 1, 10, 11, 100, 101, 110, 111]);

        let array = Volume::array_from_x_fastest([2, 2, 2], values).unwrap();
        assert_eq!(array, volume.data);
    }

    #[test]
    fn every_format_has_one_backend() {
        for format in ImageFormat::ALL {
            assert_eq!(BACKENDS.iter().filter(|b| b.format == format).count(), 1);
        }
    }

    #[test]
    fn converts_nifti_to_metaimage() {
        let dir = tempfile::tempdir().unwrap();
        let nii = dir.path().join("scan.nii");
        let volume = sample_volume();
        write_image(&volume, ImageFormat::Nifti, &nii).unwrap();

        let written = convert(&nii, &dir.path().join("scan.mha")).unwrap();
        assert_eq!(written, dir.path().join("scan.mha"));

        let back = metaimage::read(&written).unwrap();
        assert_eq!(back.data, volume.data);
        assert_geometry_close(&back, &volume);
    }

    #[test]
    fn raw_output_becomes_header_and_data_pair() {
        let dir = tempfile::tempdir().unwrap();
        let nrrd = dir.path().join("scan.nrrd");
        write_image(&sample_volume(), ImageFormat::Nrrd, &nrrd).unwrap();

        let written = convert(&nrrd, &dir.path().join("scan.raw")).unwrap();
        assert_eq!(written, dir.path().join("scan.mhd"));
        assert!(dir.path().join("scan.raw").is_file());
    }

    #[test]
    fn unsupported_backends_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let nrrd = dir.path().join("scan.nrrd");
        write_image(&sample_volume(), ImageFormat::Nrrd, &nrrd).unwrap();

        let err = convert(&nrrd, &dir.path().join("scan.aim")).unwrap_err();
        assert!(matches!(err, ConvertError::NoWriter(ImageFormat::Aim)));

        let isq = dir.path().join("C0001234.ISQ;1");
        fs::write(&isq, b"not really").unwrap();
        let err = convert(&isq, &dir.path().join("scan.nii")).unwrap_err();
        assert!(matches!(err, ConvertError::NoReader(ImageFormat::Isq)));
    }

    #[test]
    fn dicom_output_is_a_series_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nii = dir.path().join("scan.nii.gz");
        let volume = sample_volume();
        write_image(&volume, ImageFormat::Nifti, &nii).unwrap();

        let written = convert(&nii, &dir.path().join("scan.dcm")).unwrap();
        assert_eq!(written, dir.path().join("scan"));
        assert!(written.join("IM00001.dcm").is_file());

        let back = convert(&written, &dir.path().join("back.nrrd")).unwrap();
        let back = nrrd::read(&back).unwrap();
        assert_eq!(back.data, volume.data);
        assert_geometry_close(&back, &volume);
    }

    #[test]
    fn tiff_series_directory_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let series = dir.path().join("tiffs");
        fs::create_dir(&series).unwrap();
        let volume = Volume::new(Array::from_shape_fn((4, 3, 1), |(i, j, _)| {
            (i * 1000 + j) as i16
        }));
        let mut top = volume.clone();
        top.data.mapv_inplace(|v| v + 5);
        // a lone maximum keeps the rescale an identity on every page
        let mut bottom = volume;
        bottom.data[[3, 2, 0]] = i16::MAX;
        top.data[[0, 0, 0]] = 0;
        top.data[[3, 2, 0]] = i16::MAX;
        write_image(&bottom, ImageFormat::Tiff, &series.join("slice_000.tif")).unwrap();
        write_image(&top, ImageFormat::Tiff, &series.join("slice_001.tif")).unwrap();

        let written = convert(&series, &dir.path().join("stack.mha")).unwrap();
        let back = metaimage::read(&written).unwrap();
        assert_eq!(back.dims(), [4, 3, 2]);
        assert_eq!(back.data[[1, 1, 0]], 1001);
        assert_eq!(back.data[[1, 1, 1]], 1006);
    }

    #[test]
    fn missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let err = convert(&dir.path().join("nope.nii"), &dir.path().join("out.mha")).unwrap_err();
        assert!(matches!(err, ConvertError::MissingInput(_)));
    }
}

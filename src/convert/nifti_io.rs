//! NIfTI-1 reading and writing through the `nifti` crate.
//!
//! NIfTI places voxels in RAS space; volumes are converted to and from LPS
//! by negating the first two world axes.

use std::path::Path;

use nalgebra::{Matrix4, Vector4};
use ndarray::{Axis, Ix3};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use tracing::debug;

use super::raw::saturate_i16;
use super::Volume;
use crate::error::ConvertError;

/// `xyzt_units` value for millimetres.
const UNITS_MM: u8 = 2;

fn ras_lps_flip() -> Matrix4<f64> {
    Matrix4::from_diagonal(&Vector4::new(-1.0, -1.0, 1.0, 1.0))
}

/// Voxel-to-RAS affine: sform if set, else qform, else the shape and
/// `pixdim` based affine.
fn ras_affine(path: &Path, header: &NiftiHeader) -> Result<Matrix4<f64>, ConvertError> {
    let mut header = header.clone();
    // a qfac other than -1 or 1 is read as 1
    header.fix();
    if header.sform_code == 0
        && header.qform_code != 0
        && header.pixdim[1..4].iter().any(|&p| p < 0.0)
    {
        return Err(ConvertError::header(
            path,
            "qform spacings (pixdim) must be positive",
        ));
    }
    Ok(header.affine::<f64>())
}

pub fn read(path: &Path) -> Result<Volume, ConvertError> {
    let obj = ReaderOptions::new().read_file(path)?;
    let header = obj.header().clone();
    let image = obj.into_volume().into_ndarray::<f64>()?;
    debug!(shape = ?image.shape(), datatype = header.datatype, "read nifti volume");

    // a trailing singleton time axis is common in exported scans
    let image = if image.ndim() == 4 && image.shape()[3] == 1 {
        image.index_axis_move(Axis(3), 0)
    } else {
        image
    };
    if image.ndim() != 3 {
        return Err(ConvertError::header(path, "input nifti file must be 3D"));
    }
    let image = image.into_dimensionality::<Ix3>()?;
    let data = image.mapv(saturate_i16);

    let affine = ras_lps_flip() * ras_affine(path, &header)?;
    Ok(Volume::from_affine(data, &affine))
}

pub fn write(volume: &Volume, path: &Path) -> Result<(), ConvertError> {
    let mut header = NiftiHeader {
        xyzt_units: UNITS_MM,
        ..NiftiHeader::default()
    };
    // sform holds the exact affine, pixdim and qform are derived from it
    header.set_affine(&(ras_lps_flip() * volume.affine()));

    WriterOptions::new(path)
        .reference_header(&header)
        .write_nifti(&volume.data)?;
    Ok(())
}

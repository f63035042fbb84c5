//! DICOM series: one single-frame grayscale file per slice.
//!
//! Slices are ordered by their position along the slice normal. Voxel values
//! go through the modality LUT (rescale slope and intercept) before they are
//! stored as `i16`.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use dicom_core::{DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::tags;
use dicom_object::{open_file, DefaultDicomObject, FileMetaTableBuilder, InMemDicomObject};
use dicom_pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder};
use nalgebra::{Matrix3, Vector3};
use ndarray::Array3;
use tracing::{debug, warn};

use super::raw::saturate_i16;
use super::Volume;
use crate::error::ConvertError;

const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";

fn element_str(obj: &DefaultDicomObject, tag: dicom_core::Tag) -> Option<String> {
    Some(obj.element(tag).ok()?.to_str().ok()?.trim().to_owned())
}

fn element_u32(obj: &DefaultDicomObject, tag: dicom_core::Tag) -> Option<u32> {
    obj.element(tag).ok()?.to_int::<u32>().ok()
}

fn element_f64(obj: &DefaultDicomObject, tag: dicom_core::Tag) -> Option<f64> {
    obj.element(tag).ok()?.to_float64().ok()
}

fn element_f64s(obj: &DefaultDicomObject, tag: dicom_core::Tag) -> Option<Vec<f64>> {
    obj.element(tag).ok()?.to_multi_float64().ok()
}

fn position(obj: &DefaultDicomObject) -> Option<Vector3<f64>> {
    element_f64s(obj, tags::IMAGE_POSITION_PATIENT)
        .filter(|p| p.len() == 3)
        .map(|p| Vector3::from_column_slice(&p))
}

struct Slice {
    path: PathBuf,
    obj: DefaultDicomObject,
    position: Option<Vector3<f64>>,
}

/// Reads one file as a single-slice series.
pub fn read(path: &Path) -> Result<Volume, ConvertError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    read_series(dir, &[path.to_path_buf()])
}

/// Reads the series of the first readable file in `files`. Files that are not
/// DICOM or belong to another series are skipped.
pub fn read_series(dir: &Path, files: &[PathBuf]) -> Result<Volume, ConvertError> {
    let mut slices = Vec::new();
    let mut first_error = None;
    let mut series_uid = None;
    for path in files {
        let obj = match open_file(path) {
            Ok(obj) => obj,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping unreadable DICOM file");
                first_error.get_or_insert_with(|| ConvertError::dicom(path)(e));
                continue;
            }
        };
        let uid = element_str(&obj, tags::SERIES_INSTANCE_UID);
        match &series_uid {
            None => series_uid = Some(uid),
            Some(first) if *first != uid => {
                warn!(file = %path.display(), "skipping file from another series");
                continue;
            }
            Some(_) => {}
        }
        slices.push(Slice {
            path: path.clone(),
            position: position(&obj),
            obj,
        });
    }
    if slices.is_empty() {
        return Err(first_error.unwrap_or_else(|| ConvertError::EmptySeries(dir.to_path_buf())));
    }

    let first = &slices[0].obj;
    let orientation = element_f64s(first, tags::IMAGE_ORIENTATION_PATIENT)
        .filter(|o| o.len() == 6)
        .unwrap_or_else(|| vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
    let row_dir = Vector3::new(orientation[0], orientation[1], orientation[2]).normalize();
    let col_dir = Vector3::new(orientation[3], orientation[4], orientation[5]).normalize();
    let normal = row_dir.cross(&col_dir);
    if !normal.iter().all(|v| v.is_finite()) || normal.norm() < 1e-6 {
        return Err(ConvertError::header(
            &slices[0].path,
            "image orientation is degenerate",
        ));
    }
    let normal = normal.normalize();

    let located = slices.iter().all(|s| s.position.is_some());
    if located {
        slices.sort_by(|a, b| {
            let da = a.position.map_or(0.0, |p| p.dot(&normal));
            let db = b.position.map_or(0.0, |p| p.dot(&normal));
            da.partial_cmp(&db).unwrap_or(Ordering::Equal)
        });
    } else {
        debug!("slices without a position are kept in file name order");
    }

    let first = &slices[0].obj;
    let rows = element_u32(first, tags::ROWS)
        .ok_or_else(|| ConvertError::header(&slices[0].path, "missing Rows"))? as usize;
    let cols = element_u32(first, tags::COLUMNS)
        .ok_or_else(|| ConvertError::header(&slices[0].path, "missing Columns"))? as usize;
    let pixel_spacing = element_f64s(first, tags::PIXEL_SPACING)
        .filter(|s| s.len() == 2)
        .unwrap_or_else(|| vec![1.0, 1.0]);

    let positions: Vec<Vector3<f64>> = slices.iter().filter_map(|s| s.position).collect();
    let dz = if located && slices.len() > 1 {
        let span = (positions[positions.len() - 1] - positions[0]).dot(&normal);
        span / (slices.len() - 1) as f64
    } else {
        element_f64(first, tags::SPACING_BETWEEN_SLICES)
            .or_else(|| element_f64(first, tags::SLICE_THICKNESS))
            .unwrap_or(1.0)
    };
    let dz = if dz > 0.0 { dz } else { 1.0 };

    let options = ConvertOptions::new().with_modality_lut(ModalityLutOption::Default);
    let plane = rows * cols;
    let mut data = Array3::<i16>::zeros((cols, rows, slices.len()));
    for (k, slice) in slices.iter().enumerate() {
        let slice_rows = element_u32(&slice.obj, tags::ROWS).map(|r| r as usize);
        let slice_cols = element_u32(&slice.obj, tags::COLUMNS).map(|c| c as usize);
        if slice_rows != Some(rows) || slice_cols != Some(cols) {
            return Err(ConvertError::header(
                &slice.path,
                format!("slice size differs from the first slice ({cols}x{rows})"),
            ));
        }
        let values = slice
            .obj
            .decode_pixel_data()
            .map_err(ConvertError::dicom(&slice.path))?
            .to_ndarray_with_options::<f32>(&options)
            .map_err(ConvertError::dicom(&slice.path))?
            .into_raw_vec();
        if values.len() != plane {
            return Err(ConvertError::header(
                &slice.path,
                "only single-frame grayscale images are supported",
            ));
        }
        // rows are stored one after the other, columns varying fastest
        for (index, value) in values.into_iter().enumerate() {
            data[[index % cols, index / cols, k]] = saturate_i16(f64::from(value));
        }
    }

    debug!(
        dir = %dir.display(),
        slices = slices.len(),
        rows,
        cols,
        "read DICOM series"
    );
    Ok(Volume {
        data,
        spacing: Vector3::new(pixel_spacing[1], pixel_spacing[0], dz),
        origin: positions.first().copied().unwrap_or_else(Vector3::zeros),
        direction: Matrix3::from_columns(&[row_dir, col_dir, normal]),
    })
}

/// Formats a DS value within the 16 characters DICOM allows.
fn decimal_string(value: f64) -> String {
    (0..=10)
        .rev()
        .map(|precision| {
            let text = format!("{value:.precision$}");
            if text.contains('.') {
                text.trim_end_matches('0').trim_end_matches('.').to_owned()
            } else {
                text
            }
        })
        .find(|text| text.len() <= 16)
        .unwrap_or_else(|| format!("{value:e}"))
}

fn decimal_strings(values: &[f64]) -> PrimitiveValue {
    PrimitiveValue::Strs(values.iter().map(|&v| decimal_string(v)).collect())
}

/// A `2.25` UID derived from the current time.
fn uid_root() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos());
    format!("2.25.{nanos}")
}

/// Writes `volume` into directory `dir`, one CT image file per z slice.
pub fn write(volume: &Volume, dir: &Path) -> Result<(), ConvertError> {
    let [nx, ny, nz] = volume.dims();
    let (columns, rows) = match (u16::try_from(nx), u16::try_from(ny)) {
        (Ok(columns), Ok(rows)) => (columns, rows),
        _ => {
            return Err(ConvertError::header(
                dir,
                "slices larger than 65535 pixels cannot be written as DICOM",
            ))
        }
    };
    fs::create_dir_all(dir).map_err(ConvertError::io(dir))?;

    let root = uid_root();
    let study_uid = format!("{root}.1");
    let series_uid = format!("{root}.2");
    let row_dir = volume.direction.column(0);
    let col_dir = volume.direction.column(1);
    let orientation = [
        row_dir[0], row_dir[1], row_dir[2], col_dir[0], col_dir[1], col_dir[2],
    ];
    let step = volume.direction.column(2) * volume.spacing[2];

    for k in 0..nz {
        let path = dir.join(format!("IM{:05}.dcm", k + 1));
        let sop_uid = format!("{root}.3.{}", k + 1);
        let position = volume.origin + step * k as f64;

        let mut pixels = Vec::with_capacity(nx * ny * 2);
        for j in 0..ny {
            for i in 0..nx {
                pixels.extend_from_slice(&volume.data[[i, j, k]].to_le_bytes());
            }
        }

        let mut obj = InMemDicomObject::new_empty();
        let mut put = |tag, vr, value: PrimitiveValue| {
            obj.put(DataElement::new(tag, vr, value));
        };
        put(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from(CT_IMAGE_STORAGE));
        put(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(sop_uid.as_str()));
        put(tags::STUDY_INSTANCE_UID, VR::UI, PrimitiveValue::from(study_uid.as_str()));
        put(tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from(series_uid.as_str()));
        put(tags::MODALITY, VR::CS, PrimitiveValue::from("CT"));
        put(tags::INSTANCE_NUMBER, VR::IS, PrimitiveValue::from((k + 1).to_string()));
        put(
            tags::IMAGE_POSITION_PATIENT,
            VR::DS,
            decimal_strings(position.as_slice()),
        );
        put(
            tags::IMAGE_ORIENTATION_PATIENT,
            VR::DS,
            decimal_strings(&orientation),
        );
        put(
            tags::PIXEL_SPACING,
            VR::DS,
            decimal_strings(&[volume.spacing[1], volume.spacing[0]]),
        );
        put(
            tags::SLICE_THICKNESS,
            VR::DS,
            PrimitiveValue::from(decimal_string(volume.spacing[2])),
        );
        put(
            tags::SPACING_BETWEEN_SLICES,
            VR::DS,
            PrimitiveValue::from(decimal_string(volume.spacing[2])),
        );
        put(tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1_u16));
        put(
            tags::PHOTOMETRIC_INTERPRETATION,
            VR::CS,
            PrimitiveValue::from("MONOCHROME2"),
        );
        put(tags::ROWS, VR::US, PrimitiveValue::from(rows));
        put(tags::COLUMNS, VR::US, PrimitiveValue::from(columns));
        put(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(16_u16));
        put(tags::BITS_STORED, VR::US, PrimitiveValue::from(16_u16));
        put(tags::HIGH_BIT, VR::US, PrimitiveValue::from(15_u16));
        put(tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(1_u16));
        put(tags::RESCALE_INTERCEPT, VR::DS, PrimitiveValue::from("0"));
        put(tags::RESCALE_SLOPE, VR::DS, PrimitiveValue::from("1"));
        put(tags::PIXEL_DATA, VR::OW, PrimitiveValue::from(pixels));

        let meta = FileMetaTableBuilder::new()
            .transfer_syntax(EXPLICIT_VR_LITTLE_ENDIAN)
            .media_storage_sop_class_uid(CT_IMAGE_STORAGE)
            .media_storage_sop_instance_uid(sop_uid.as_str());
        obj.with_meta(meta)
            .map_err(ConvertError::dicom(&path))?
            .write_to_file(&path)
            .map_err(ConvertError::dicom(&path))?;
    }
    debug!(dir = %dir.display(), slices = nz, "wrote DICOM series");
    Ok(())
}

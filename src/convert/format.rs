use std::fmt;
use std::path::{Path, PathBuf};

use glob::{glob, Pattern};
use tracing::debug;

use crate::error::ConvertError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    /// MetaImage with the voxels in the same file.
    Mha,
    /// MetaImage header with a companion `.raw` file.
    Mhd,
    /// NIfTI-1, optionally gzipped.
    Nifti,
    Nrrd,
    Dicom,
    Tiff,
    /// Scanco raw projection/reconstruction file.
    Isq,
    /// Scanco image file.
    Aim,
}

const SUFFIXES: &[(&str, ImageFormat)] = &[
    (".nii.gz", ImageFormat::Nifti),
    (".nii", ImageFormat::Nifti),
    (".mha", ImageFormat::Mha),
    (".mhd", ImageFormat::Mhd),
    (".raw", ImageFormat::Mhd),
    (".nrrd", ImageFormat::Nrrd),
    (".nhdr", ImageFormat::Nrrd),
    (".dcm", ImageFormat::Dicom),
    (".tiff", ImageFormat::Tiff),
    (".tif", ImageFormat::Tiff),
    (".isq", ImageFormat::Isq),
    (".aim", ImageFormat::Aim),
];

impl ImageFormat {
    pub const ALL: [ImageFormat; 8] = [
        ImageFormat::Mha,
        ImageFormat::Mhd,
        ImageFormat::Nifti,
        ImageFormat::Nrrd,
        ImageFormat::Dicom,
        ImageFormat::Tiff,
        ImageFormat::Isq,
        ImageFormat::Aim,
    ];

    /// Detects the format of `path` from its file name.
    pub fn from_path(path: &Path) -> Result<Self, ConvertError> {
        path.file_name()
            .and_then(|name| name.to_str())
            .and_then(split_suffix)
            .map(|(_, format)| format)
            .ok_or_else(|| ConvertError::UnsupportedExtension(path.to_path_buf()))
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImageFormat::Mha => "MHA",
            ImageFormat::Mhd => "MHD/RAW",
            ImageFormat::Nifti => "NIfTI",
            ImageFormat::Nrrd => "NRRD",
            ImageFormat::Dicom => "DICOM",
            ImageFormat::Tiff => "TIFF",
            ImageFormat::Isq => "ISQ",
            ImageFormat::Aim => "AIM",
        };
        f.write_str(name)
    }
}

/// Drops a trailing `;<version>` as found on files copied off the scanner
/// (`C0001234.ISQ;1`).
pub fn strip_version(name: &str) -> &str {
    match name.rsplit_once(';') {
        Some((base, version)) if version.chars().all(|c| c.is_ascii_digit()) => base,
        _ => name,
    }
}

pub(crate) fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

/// Splits a file name into its base name and detected format.
fn split_suffix(name: &str) -> Option<(&str, ImageFormat)> {
    let name = strip_version(name);
    let lower = name.to_ascii_lowercase();
    SUFFIXES.iter().find_map(|&(suffix, format)| {
        (lower.len() > suffix.len() && lower.ends_with(suffix))
            .then(|| (&name[..name.len() - suffix.len()], format))
    })
}

/// What the converter was asked to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    File { path: PathBuf, format: ImageFormat },
    /// A directory of slices, sorted by file name.
    Series {
        dir: PathBuf,
        format: ImageFormat,
        files: Vec<PathBuf>,
    },
}

fn glob_files(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, ConvertError> {
    let pattern = format!(
        "{}/{}",
        Pattern::escape(&dir.to_string_lossy()),
        pattern
    );
    let mut paths: Vec<_> = glob(&pattern)?
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .collect();
    paths.sort();
    Ok(paths)
}

/// Classifies `path` as a single image file or a slice series directory.
///
/// A directory holding `*.tif`/`*.tiff` files is a TIFF series, any other
/// non-empty directory is taken as a DICOM series.
pub fn classify_input(path: &Path) -> Result<ImageSource, ConvertError> {
    if !path.exists() {
        return Err(ConvertError::MissingInput(path.to_path_buf()));
    }
    if !path.is_dir() {
        let format = ImageFormat::from_path(path)?;
        return Ok(ImageSource::File {
            path: path.to_path_buf(),
            format,
        });
    }

    let mut tiffs = glob_files(path, "*.tif")?;
    tiffs.extend(glob_files(path, "*.tiff")?);
    let (format, files) = if tiffs.is_empty() {
        (ImageFormat::Dicom, glob_files(path, "*")?)
    } else {
        tiffs.sort();
        (ImageFormat::Tiff, tiffs)
    };
    if files.is_empty() {
        return Err(ConvertError::EmptySeries(path.to_path_buf()));
    }
    debug!(dir = %path.display(), %format, slices = files.len(), "found image series");
    Ok(ImageSource::Series {
        dir: path.to_path_buf(),
        format,
        files,
    })
}

/// Output format and the path that will actually be written.
///
/// A `.raw` request writes `<base>.mhd` (plus `<base>.raw`), a `.dcm` request
/// writes a series into the directory `<base>` and ISQ output uses the
/// scanner's upper-case `.ISQ` suffix.
pub fn output_target(path: &Path) -> Result<(ImageFormat, PathBuf), ConvertError> {
    let (base, format) = path
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(split_suffix)
        .ok_or_else(|| ConvertError::UnsupportedExtension(path.to_path_buf()))?;
    let target = match format {
        ImageFormat::Mhd => path.with_file_name(format!("{base}.mhd")),
        ImageFormat::Dicom => path.with_file_name(base),
        ImageFormat::Isq => path.with_file_name(format!("{base}.ISQ")),
        _ => path.to_path_buf(),
    };
    Ok((format, target))
}

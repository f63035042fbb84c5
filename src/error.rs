//! Error types shared by the planner and the converter.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::convert::ImageFormat;

/// A manifest line that was skipped. Parsing carries on after recording it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestFormatError {
    #[error(
        "line {line}: skipped {study_id}, {count} measurement ids is not a multiple of 3 (DST MID PRX)"
    )]
    UnbalancedTriplets {
        line: usize,
        study_id: String,
        count: usize,
    },
    #[error("line {line}: skipped {study_id}, missing sample id")]
    MissingSampleId { line: usize, study_id: String },
    #[error("line {line}: skipped, not valid UTF-8 text")]
    InvalidText { line: usize },
}

impl ManifestFormatError {
    /// 1-based manifest line number.
    pub fn line(&self) -> usize {
        match self {
            Self::UnbalancedTriplets { line, .. }
            | Self::MissingSampleId { line, .. }
            | Self::InvalidText { line } => *line,
        }
    }
}

/// Errors from compiling a line template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("template `{template}`: unknown placeholder `{{{name}}}`")]
    UnknownPlaceholder { template: String, name: String },
    #[error("template `{template}`: placeholder opened at byte {offset} is never closed")]
    UnclosedPlaceholder { template: String, offset: usize },
    #[error("template `{template}`: unmatched `}}` at byte {offset}")]
    UnmatchedBrace { template: String, offset: usize },
}

/// Errors from loading the layered configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Figment(#[from] figment::Error),
    #[error("config file not found: {}", .0.display())]
    MissingFile(PathBuf),
}

/// Fatal errors of a planner run.
#[derive(Debug, Error)]
pub enum Error {
    #[error("argument error: {0}")]
    Argument(String),
    #[error("{}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Template(#[from] TemplateError),
}

impl Error {
    /// Adapter for `map_err` that tags an I/O error with the path it concerns.
    pub fn filesystem(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| Self::Filesystem {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Errors from reading, writing or dispatching image files.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error(
        "unsupported file extension for {}: expected MHA, MHD, RAW, NII, NII.GZ, NRRD, NHDR, DCM, TIF, ISQ or AIM",
        .0.display()
    )]
    UnsupportedExtension(PathBuf),
    #[error("no reader available for {0} images")]
    NoReader(ImageFormat),
    #[error("no writer available for {0} images")]
    NoWriter(ImageFormat),
    #[error("input does not exist: {}", .0.display())]
    MissingInput(PathBuf),
    #[error("no image files found in series directory {}", .0.display())]
    EmptySeries(PathBuf),
    #[error("{}: {message}", path.display())]
    Header { path: PathBuf, message: String },
    #[error("{}: {message}", path.display())]
    Dicom { path: PathBuf, message: String },
    #[error("{}: {source}", path.display())]
    Tiff {
        path: PathBuf,
        #[source]
        source: tiff::TiffError,
    },
    #[error(transparent)]
    Nifti(#[from] nifti::error::NiftiError),
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ConvertError {
    pub fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Adapter for `map_err` on the DICOM crates, whose errors are only
    /// carried as text.
    pub fn dicom<E: std::fmt::Display>(path: &Path) -> impl FnOnce(E) -> Self + '_ {
        move |e| Self::Dicom {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
    }

    pub fn tiff(path: &Path) -> impl FnOnce(tiff::TiffError) -> Self + '_ {
        move |source| Self::Tiff {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn header(path: &Path, message: impl Into<String>) -> Self {
        Self::Header {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }
}

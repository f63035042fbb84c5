//! Parsing of the flat study manifest.
//!
//! Each line reads `Study_ID Sample_# DST1 MID1 PRX1 ... DSTN MIDN PRXN`. The
//! measurement ids after the first two tokens are grouped into one
//! [`ImageTriplet`] per visit.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::common::{ImageTriplet, RecordKey};
use crate::error::{Error, ManifestFormatError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRecord {
    pub key: RecordKey,
    /// One triplet per visit, visit index = position.
    pub visits: Vec<ImageTriplet>,
}

/// Records in order of first appearance. Re-inserting a key replaces its
/// visits but keeps its position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    records: Vec<ManifestRecord>,
    index: HashMap<RecordKey, usize>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record and returns the visits it replaced, if any.
    pub fn insert(
        &mut self,
        key: RecordKey,
        visits: Vec<ImageTriplet>,
    ) -> Option<Vec<ImageTriplet>> {
        match self.index.get(&key) {
            Some(&pos) => Some(std::mem::replace(&mut self.records[pos].visits, visits)),
            None => {
                self.index.insert(key.clone(), self.records.len());
                self.records.push(ManifestRecord { key, visits });
                None
            }
        }
    }

    pub fn get(&self, key: &RecordKey) -> Option<&[ImageTriplet]> {
        self.index
            .get(key)
            .map(|&pos| self.records[pos].visits.as_slice())
    }

    pub fn contains_key(&self, key: &RecordKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn records(&self) -> &[ManifestRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Total number of visits across all records.
    pub fn triplet_count(&self) -> usize {
        self.records.iter().map(|r| r.visits.len()).sum()
    }
}

/// Result of parsing a manifest: the records kept and the lines skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOutcome {
    pub manifest: Manifest,
    pub diagnostics: Vec<ManifestFormatError>,
}

/// Parses manifest lines. Malformed lines are skipped and reported in
/// [`ParseOutcome::diagnostics`]; parsing never stops early.
pub fn parse<I, S>(lines: I) -> ParseOutcome
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut outcome = ParseOutcome::default();

    for (idx, line) in lines.into_iter().enumerate() {
        let line_no = idx + 1;
        let tokens: Vec<&str> = line.as_ref().split_whitespace().collect();

        let (study_id, sample_id, ids) = match tokens.as_slice() {
            [] => continue,
            [study_id] => {
                skip(
                    &mut outcome,
                    ManifestFormatError::MissingSampleId {
                        line: line_no,
                        study_id: (*study_id).to_owned(),
                    },
                );
                continue;
            }
            [study_id, sample_id, ids @ ..] => (*study_id, *sample_id, ids),
        };

        if ids.len() % 3 != 0 {
            skip(
                &mut outcome,
                ManifestFormatError::UnbalancedTriplets {
                    line: line_no,
                    study_id: study_id.to_owned(),
                    count: ids.len(),
                },
            );
            continue;
        }

        let visits: Vec<ImageTriplet> = ids
            .chunks_exact(3)
            .filter_map(ImageTriplet::from_slice)
            .collect();
        let key = RecordKey::new(study_id, sample_id);
        debug!(line = line_no, record = %key, visits = visits.len(), "parsed manifest line");
        if outcome.manifest.insert(key, visits).is_some() {
            debug!(
                line = line_no,
                study_id, sample_id, "duplicate record, keeping the later line"
            );
        }
    }

    outcome
}

fn skip(outcome: &mut ParseOutcome, diagnostic: ManifestFormatError) {
    warn!("{diagnostic}");
    outcome.diagnostics.push(diagnostic);
}

/// Reads and parses a manifest file. Lines that are not valid UTF-8 are
/// skipped with a diagnostic like any other malformed line.
pub fn read_manifest(path: &Path) -> Result<ParseOutcome, Error> {
    let bytes = fs::read(path).map_err(Error::filesystem(path))?;
    let mut invalid = Vec::new();
    let lines: Vec<&str> = bytes
        .split(|&b| b == b'\n')
        .enumerate()
        .map(|(idx, raw)| {
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            std::str::from_utf8(raw).unwrap_or_else(|_| {
                invalid.push(idx + 1);
                ""
            })
        })
        .collect();

    let mut outcome = parse(lines);
    for line in invalid {
        skip(&mut outcome, ManifestFormatError::InvalidText { line });
    }
    outcome.diagnostics.sort_by_key(ManifestFormatError::line);
    Ok(outcome)
}

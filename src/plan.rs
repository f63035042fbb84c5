//! Turns a parsed manifest into planned command lines.
//!
//! Lines come out record by record (manifest order), then visit by visit,
//! then `DST`, `MID`, `PRX`, and for each role one line per template in the
//! order the templates were given. Nothing here talks to the network.

use std::fs::{self, File};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::common::Role;
use crate::error::Error;
use crate::manifest::Manifest;
use crate::template::{LineContext, LineTemplate, PlanVars};

/// Append-only text log of planned commands, written one line at a time.
#[derive(Debug)]
pub struct TransferLog {
    path: PathBuf,
    writer: LineWriter<File>,
}

impl TransferLog {
    /// Creates the log, truncating any previous contents.
    pub fn create(path: &Path) -> Result<Self, Error> {
        let file = File::create(path).map_err(Error::filesystem(path))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: LineWriter::new(file),
        })
    }

    pub fn write_line(&mut self, line: &str) -> Result<(), Error> {
        writeln!(self.writer, "{line}").map_err(Error::filesystem(&self.path))
    }

    pub fn finish(mut self) -> Result<(), Error> {
        self.writer.flush().map_err(Error::filesystem(&self.path))
    }
}

#[derive(Debug, Clone)]
pub struct Planner {
    templates: Vec<LineTemplate>,
    vars: PlanVars,
    local_root: Option<PathBuf>,
}

impl Planner {
    pub fn new(templates: Vec<LineTemplate>, vars: PlanVars) -> Self {
        Self {
            templates,
            vars,
            local_root: None,
        }
    }

    /// Also create `<root>/<study>/<visit>` for every visit while planning.
    pub fn with_local_dirs(mut self, root: impl Into<PathBuf>) -> Self {
        self.local_root = Some(root.into());
        self
    }

    /// Renders every line without touching the filesystem.
    pub fn lines<'a>(&'a self, manifest: &'a Manifest) -> impl Iterator<Item = String> + 'a {
        manifest.records().iter().flat_map(move |record| {
            record
                .visits
                .iter()
                .enumerate()
                .flat_map(move |(visit, triplet)| {
                    Role::ALL.into_iter().flat_map(move |role| {
                        let line = LineContext {
                            key: &record.key,
                            visit,
                            role,
                            triplet,
                        };
                        self.templates
                            .iter()
                            .map(move |template| template.render(&line, &self.vars))
                    })
                })
        })
    }

    /// Writes the plan for `manifest` to `log` and returns the number of lines.
    pub fn plan(&self, manifest: &Manifest, log: &mut TransferLog) -> Result<usize, Error> {
        let mut written = 0;
        for record in manifest.records() {
            for (visit, triplet) in record.visits.iter().enumerate() {
                if let Some(root) = &self.local_root {
                    let visit_dir = root
                        .join(&record.key.study_id)
                        .join(visit.to_string());
                    fs::create_dir_all(&visit_dir).map_err(Error::filesystem(&visit_dir))?;
                    trace!(dir = %visit_dir.display(), "visit directory ready");
                }

                for role in Role::ALL {
                    let line = LineContext {
                        key: &record.key,
                        visit,
                        role,
                        triplet,
                    };
                    for template in &self.templates {
                        log.write_line(&template.render(&line, &self.vars))?;
                        written += 1;
                    }
                }
            }
            debug!(record = %record.key, visits = record.visits.len(), "planned record");
        }
        Ok(written)
    }
}

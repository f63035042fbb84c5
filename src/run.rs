//! The three planner commands.
//!
//! Every run clears and recreates the scratch directory under the output
//! directory, truncates its log, then plans the whole manifest.

use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::info;

use crate::config::{PlanConfig, TemplateFamily};
use crate::error::Error;
use crate::manifest::read_manifest;
use crate::plan::{Planner, TransferLog};
use crate::template::PlanVars;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Check that converted stacks exist on the compute cluster.
    CheckArc,
    /// Check that raw ISQ files exist on the scanner host.
    CheckXct { xt2_host: String },
    /// Fetch raw ISQ files and copy the converted stacks to the cluster.
    Fetch {
        xt2_host: String,
        arc_host: String,
        arc_out_dir: String,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::CheckArc => "check-arc",
            Command::CheckXct { .. } => "check-xct",
            Command::Fetch { .. } => "fetch",
        }
    }

    fn families(&self) -> &'static [TemplateFamily] {
        match self {
            Command::CheckArc => &[TemplateFamily::ArcCheck],
            Command::CheckXct { .. } => &[TemplateFamily::XctCheck],
            Command::Fetch { .. } => &[TemplateFamily::Fetch, TemplateFamily::Copy],
        }
    }

    fn log_name<'a>(&self, config: &'a PlanConfig) -> &'a str {
        match self {
            Command::CheckArc => &config.logs.arc_check,
            Command::CheckXct { .. } => &config.logs.xct_check,
            Command::Fetch { .. } => &config.logs.fetch,
        }
    }

    fn vars(&self, config: &PlanConfig, scratch: &Path) -> PlanVars {
        let mut vars = PlanVars {
            xt2_host: config.hosts.xt2_host.clone(),
            arc_host: config.hosts.arc_host.clone(),
            xt2_root: config.paths.xt2_data_root.clone(),
            arc_dir: config.paths.arc_stack_root.clone(),
            local_dir: scratch.display().to_string(),
        };
        match self {
            Command::CheckArc => {}
            Command::CheckXct { xt2_host } => vars.xt2_host = xt2_host.clone(),
            Command::Fetch {
                xt2_host,
                arc_host,
                arc_out_dir,
            } => {
                vars.xt2_host = xt2_host.clone();
                vars.arc_host = arc_host.clone();
                vars.arc_dir = arc_out_dir.clone();
            }
        }
        vars
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub manifest: PathBuf,
    pub out_dir: PathBuf,
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub log_path: PathBuf,
    pub scratch_dir: PathBuf,
    /// Records kept from the manifest.
    pub records: usize,
    /// Manifest lines skipped as malformed.
    pub skipped: usize,
    /// Lines written to the log.
    pub lines: usize,
}

/// Removes `<out_dir>/<name>` if present and creates it empty.
pub fn prepare_scratch(out_dir: &Path, name: &str) -> Result<PathBuf, Error> {
    let mut components = Path::new(name).components();
    if !matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) {
        return Err(Error::Argument(format!(
            "scratch directory name must be a single path component, got `{name}`"
        )));
    }

    let scratch = out_dir.join(name);
    if scratch.exists() {
        info!(dir = %scratch.display(), "clearing previous scratch directory");
        fs::remove_dir_all(&scratch).map_err(Error::filesystem(&scratch))?;
    }
    fs::create_dir(&scratch).map_err(Error::filesystem(&scratch))?;
    Ok(scratch)
}

pub fn run(request: &RunRequest, config: &PlanConfig) -> Result<RunSummary, Error> {
    if !request.manifest.is_file() {
        return Err(Error::Argument(format!(
            "manifest file not found: {}",
            request.manifest.display()
        )));
    }
    if !request.out_dir.is_dir() {
        return Err(Error::Argument(format!(
            "output directory not found: {}",
            request.out_dir.display()
        )));
    }

    let command = &request.command;
    let templates = command
        .families()
        .iter()
        .map(|&family| config.templates.compile(family))
        .collect::<Result<Vec<_>, _>>()?;

    let outcome = read_manifest(&request.manifest)?;
    info!(
        command = command.name(),
        manifest = %request.manifest.display(),
        records = outcome.manifest.len(),
        visits = outcome.manifest.triplet_count(),
        skipped = outcome.diagnostics.len(),
        "parsed manifest"
    );

    let scratch_dir = prepare_scratch(&request.out_dir, &config.paths.scratch_dir_name)?;
    let log_path = request.out_dir.join(command.log_name(config));
    let mut log = TransferLog::create(&log_path)?;

    let mut planner = Planner::new(templates, command.vars(config, &scratch_dir));
    if matches!(command, Command::Fetch { .. }) {
        planner = planner.with_local_dirs(&scratch_dir);
    }
    let lines = planner.plan(&outcome.manifest, &mut log)?;
    log.finish()?;

    info!(log = %log_path.display(), lines, "wrote transfer plan");
    Ok(RunSummary {
        log_path,
        scratch_dir,
        records: outcome.manifest.len(),
        skipped: outcome.diagnostics.len(),
        lines,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn scratch_is_cleared_between_runs() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = prepare_scratch(dir.path(), "temp").unwrap();
        fs::write(scratch.join("leftover.isq"), b"old").unwrap();

        let again = prepare_scratch(dir.path(), "temp").unwrap();
        assert_eq!(again, scratch);
        assert_eq!(fs::read_dir(&again).unwrap().count(), 0);
    }

    #[rstest]
    #[case("")]
    #[case("..")]
    #[case("a/b")]
    #[case("/tmp")]
    fn scratch_name_must_be_plain(#[case] name: &str) {
        let dir = tempfile::tempdir().unwrap();
        let err = prepare_scratch(dir.path(), name).unwrap_err();
        assert!(matches!(err, Error::Argument(_)));
    }

    #[test]
    fn missing_inputs_are_argument_errors() {
        let dir = tempfile::tempdir().unwrap();
        let request = RunRequest {
            manifest: dir.path().join("missing.txt"),
            out_dir: dir.path().to_path_buf(),
            command: Command::CheckArc,
        };
        let err = run(&request, &PlanConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Argument(_)));
        // nothing was created before the arguments were rejected
        assert!(!dir.path().join("temp").exists());

        let manifest = dir.path().join("manifest.txt");
        fs::write(&manifest, "S01 007 1 2 3\n").unwrap();
        let request = RunRequest {
            manifest,
            out_dir: dir.path().join("nowhere"),
            command: Command::CheckArc,
        };
        assert!(matches!(
            run(&request, &PlanConfig::default()),
            Err(Error::Argument(_))
        ));
    }

    #[test]
    fn bad_template_fails_before_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("manifest.txt");
        fs::write(&manifest, "S01 007 1 2 3\n").unwrap();
        let mut config = PlanConfig::default();
        config.templates.arc_check = "{nope}".into();

        let request = RunRequest {
            manifest,
            out_dir: dir.path().to_path_buf(),
            command: Command::CheckArc,
        };
        assert!(matches!(run(&request, &config), Err(Error::Template(_))));
        assert!(!dir.path().join("arc_check_log.txt").exists());
    }

    #[test]
    fn host_arguments_override_config() {
        let config = PlanConfig::default();
        let command = Command::Fetch {
            xt2_host: "scanner".into(),
            arc_host: "cluster".into(),
            arc_out_dir: "/work/out".into(),
        };
        let vars = command.vars(&config, Path::new("/tmp/temp"));
        assert_eq!(vars.xt2_host, "scanner");
        assert_eq!(vars.arc_host, "cluster");
        assert_eq!(vars.arc_dir, "/work/out");
        assert_eq!(vars.local_dir, "/tmp/temp");

        let vars = Command::CheckArc.vars(&config, Path::new("/tmp/temp"));
        assert_eq!(vars.arc_dir, config.paths.arc_stack_root);
        assert_eq!(vars.arc_host, "arc");
    }
}

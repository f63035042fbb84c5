//! Layered configuration for the planner.
//!
//! Sources, lowest to highest priority:
//! 1. Built-in defaults (the lab's hosts, remote roots and command formats)
//! 2. A TOML file passed with `--config`
//! 3. Environment variables with the `XCTPLAN_` prefix, `__` separating
//!    sections (`XCTPLAN_HOSTS__ARC_HOST=arc2` -> `hosts.arc_host`)

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, TemplateError};
use crate::template::LineTemplate;

/// Which command format a template produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateFamily {
    /// Remote existence check of a converted stack on the compute cluster.
    ArcCheck,
    /// Remote listing of a raw ISQ on the scanner host.
    XctCheck,
    /// SFTP download from the scanner host.
    Fetch,
    /// Copy of a converted stack to the compute cluster.
    Copy,
}

impl TemplateFamily {
    pub fn name(&self) -> &'static str {
        match self {
            TemplateFamily::ArcCheck => "arc_check",
            TemplateFamily::XctCheck => "xct_check",
            TemplateFamily::Fetch => "fetch",
            TemplateFamily::Copy => "copy",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HostConfig {
    /// Scanner (XtremeCT II) host.
    pub xt2_host: String,
    /// Compute cluster host.
    pub arc_host: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            xt2_host: "xt2".into(),
            arc_host: "arc".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PathConfig {
    /// Raw data root on the scanner host.
    pub xt2_data_root: String,
    /// Converted stack root on the compute cluster.
    pub arc_stack_root: String,
    /// Scratch directory created under the output directory on each run.
    pub scratch_dir_name: String,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            xt2_data_root: "/DISK6/xtremect2/data".into(),
            arc_stack_root: "/work/manske_lab/images/hrpqct/mcp/actus_raw_stacks".into(),
            scratch_dir_name: "temp".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TemplateConfig {
    pub arc_check: String,
    pub xct_check: String,
    pub fetch: String,
    pub copy: String,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            arc_check: r#"{study}_{role}: ssh -qnx {arc_host} "test -f {arc_dir}/{study}/{visit}/{study}_{role}.nii.gz && echo 1 || echo 0""#.into(),
            xct_check: r#"{study}_{role}: echo "dir {xt2_root}/0000{sample}/000{measurement}/*ISQ*" | sftp -b - {xt2_host}"#.into(),
            fetch: "sftp {xt2_host}:{xt2_root}/0000{sample}/000{measurement}/*ISQ* {local_dir}/{study}/{visit}/{study}_{role}.isq".into(),
            copy: "scp {local_dir}/{study}/{visit}/{study}_{role}.nii.gz {arc_host}:{arc_dir}/{study}/{visit}".into(),
        }
    }
}

impl TemplateConfig {
    pub fn source(&self, family: TemplateFamily) -> &str {
        match family {
            TemplateFamily::ArcCheck => &self.arc_check,
            TemplateFamily::XctCheck => &self.xct_check,
            TemplateFamily::Fetch => &self.fetch,
            TemplateFamily::Copy => &self.copy,
        }
    }

    pub fn compile(&self, family: TemplateFamily) -> Result<LineTemplate, TemplateError> {
        LineTemplate::parse(family.name(), self.source(family))
    }
}

/// File names of the logs written into the output directory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LogConfig {
    pub arc_check: String,
    pub xct_check: String,
    pub fetch: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            arc_check: "arc_check_log.txt".into(),
            xct_check: "sftp_check_log.txt".into(),
            fetch: "sftp_fetch_log.txt".into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PlanConfig {
    #[serde(default)]
    pub hosts: HostConfig,
    #[serde(default)]
    pub paths: PathConfig,
    #[serde(default)]
    pub templates: TemplateConfig,
    #[serde(default)]
    pub logs: LogConfig,
}

impl PlanConfig {
    /// Loads defaults, then `config_file` if given, then `XCTPLAN_*` variables.
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = config_file {
            if !path.is_file() {
                return Err(ConfigError::MissingFile(path.to_path_buf()));
            }
        }
        Ok(Self::figment(config_file).extract()?)
    }

    /// The provider chain behind [`PlanConfig::load`].
    pub fn figment(config_file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = config_file {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed("XCTPLAN_").split("__"))
    }
}

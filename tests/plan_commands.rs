use std::fs;
use std::path::Path;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use xctplan::config::PlanConfig;
use xctplan::run::{run, Command, RunRequest};

const MANIFEST: &str = "\
S01 007 10001 10002 10003
S03 009 1 2 3 4

S02 003 1 2 3 4 5 6
";

fn setup() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("manifest.txt"), MANIFEST).unwrap();
    fs::create_dir(dir.path().join("out")).unwrap();
    dir
}

fn request(dir: &Path, command: Command) -> RunRequest {
    RunRequest {
        manifest: dir.join("manifest.txt"),
        out_dir: dir.join("out"),
        command,
    }
}

#[test]
fn check_arc_log() {
    let dir = setup();
    let summary = run(&request(dir.path(), Command::CheckArc), &PlanConfig::default()).unwrap();

    assert_eq!(summary.records, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.lines, 9);
    assert_eq!(summary.log_path, dir.path().join("out").join("arc_check_log.txt"));
    assert!(summary.scratch_dir.is_dir());

    let log = fs::read_to_string(&summary.log_path).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 9);
    assert_eq!(
        lines[0],
        r#"S01_DST: ssh -qnx arc "test -f /work/manske_lab/images/hrpqct/mcp/actus_raw_stacks/S01/0/S01_DST.nii.gz && echo 1 || echo 0""#
    );
    assert!(lines[8].starts_with("S02_PRX: "));
    assert!(lines[8].contains("/S02/1/S02_PRX.nii.gz"));
    assert!(!log.contains("S03"));
}

#[test]
fn check_xct_log_uses_host_argument() {
    let dir = setup();
    let command = Command::CheckXct {
        xt2_host: "xt2.lab".into(),
    };
    let summary = run(&request(dir.path(), command), &PlanConfig::default()).unwrap();

    let log = fs::read_to_string(&summary.log_path).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(
        &lines[..3],
        &[
            r#"S01_DST: echo "dir /DISK6/xtremect2/data/0000007/00010001/*ISQ*" | sftp -b - xt2.lab"#,
            r#"S01_MID: echo "dir /DISK6/xtremect2/data/0000007/00010002/*ISQ*" | sftp -b - xt2.lab"#,
            r#"S01_PRX: echo "dir /DISK6/xtremect2/data/0000007/00010003/*ISQ*" | sftp -b - xt2.lab"#,
        ]
    );
    assert_eq!(summary.log_path.file_name().unwrap(), "sftp_check_log.txt");
}

#[test]
fn fetch_log_and_visit_directories() {
    let dir = setup();
    let command = Command::Fetch {
        xt2_host: "xt2.lab".into(),
        arc_host: "arc.cluster".into(),
        arc_out_dir: "/work/out".into(),
    };
    let summary = run(&request(dir.path(), command), &PlanConfig::default()).unwrap();
    let scratch = summary.scratch_dir.display().to_string();

    assert_eq!(summary.lines, 18);
    let log = fs::read_to_string(&summary.log_path).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(
        lines[0],
        format!("sftp xt2.lab:/DISK6/xtremect2/data/0000007/00010001/*ISQ* {scratch}/S01/0/S01_DST.isq")
    );
    assert_eq!(
        lines[1],
        format!("scp {scratch}/S01/0/S01_DST.nii.gz arc.cluster:/work/out/S01/0")
    );

    for visit_dir in ["S01/0", "S02/0", "S02/1"] {
        assert!(summary.scratch_dir.join(visit_dir).is_dir(), "{visit_dir}");
    }
    assert!(!summary.scratch_dir.join("S03").exists());
}

#[test]
fn reruns_are_byte_identical() {
    let dir = setup();
    let command = Command::Fetch {
        xt2_host: "xt2".into(),
        arc_host: "arc".into(),
        arc_out_dir: "/work/out".into(),
    };

    let first = run(&request(dir.path(), command.clone()), &PlanConfig::default()).unwrap();
    let first_log = fs::read(&first.log_path).unwrap();
    fs::write(first.scratch_dir.join("stale.isq"), b"old").unwrap();

    let second = run(&request(dir.path(), command), &PlanConfig::default()).unwrap();
    assert_eq!(fs::read(&second.log_path).unwrap(), first_log);
    assert!(!second.scratch_dir.join("stale.isq").exists());
}

#[test]
fn empty_manifest_writes_empty_log() {
    let dir = setup();
    fs::write(dir.path().join("manifest.txt"), "\n  \n").unwrap();
    let summary = run(&request(dir.path(), Command::CheckArc), &PlanConfig::default()).unwrap();
    assert_eq!(summary.lines, 0);
    assert_eq!(fs::read_to_string(&summary.log_path).unwrap(), "");
}

#[test]
fn custom_templates_and_log_names() {
    let dir = setup();
    let mut config = PlanConfig::default();
    config.templates.arc_check = "{study}/{sample}/{visit}/{role}={measurement}".into();
    config.logs.arc_check = "plan.txt".into();
    config.paths.scratch_dir_name = "scratch".into();

    let summary = run(&request(dir.path(), Command::CheckArc), &config).unwrap();
    assert_eq!(summary.log_path, dir.path().join("out").join("plan.txt"));
    assert_eq!(summary.scratch_dir, dir.path().join("out").join("scratch"));

    let log = fs::read_to_string(&summary.log_path).unwrap();
    assert_eq!(
        log.lines().take(4).collect::<Vec<_>>(),
        vec![
            "S01/007/0/DST=10001",
            "S01/007/0/MID=10002",
            "S01/007/0/PRX=10003",
            "S02/003/0/DST=1",
        ]
    );
}

#[test]
fn non_utf8_manifest_line_is_skipped() {
    let dir = setup();
    let mut bytes = MANIFEST.as_bytes().to_vec();
    bytes.extend_from_slice(b"S\xe904 001 7 8 9\n");
    fs::write(dir.path().join("manifest.txt"), bytes).unwrap();

    let summary = run(&request(dir.path(), Command::CheckArc), &PlanConfig::default()).unwrap();
    assert_eq!(summary.records, 2);
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.lines, 9);
}

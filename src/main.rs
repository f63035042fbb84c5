//! Commandline utility to plan scan transfers from a study manifest.
//!
//! For every DST/MID/PRX scan listed in the manifest, writes the shell/SFTP
//! command that checks or moves it into a log in the output directory. The
//! commands are only written, never run.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::warn;

use xctplan::config::PlanConfig;
use xctplan::logging::init_tracing;
use xctplan::run::{run, Command, RunRequest};

// use clap to create commandline interface
#[derive(Parser, Debug)]
#[command(author, about, version, long_about)]
struct Args {
    /// a TOML file overriding hosts, remote paths, log names and command templates
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// log every parsed line and planned record
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Plan checks that converted stacks exist on the compute cluster
    CheckArc {
        /// text file with `Study_ID Sample_# DST1 MID1 PRX1 ... DSTN MIDN PRXN` per line
        manifest: PathBuf,
        /// directory receiving the log and the scratch directory
        out_dir: PathBuf,
    },
    /// Plan listings of the raw ISQ files on the scanner host
    CheckXct {
        /// text file with `Study_ID Sample_# DST1 MID1 PRX1 ... DSTN MIDN PRXN` per line
        manifest: PathBuf,
        /// host address of the xt2 server
        xt2_host: String,
        /// directory receiving the log and the scratch directory
        out_dir: PathBuf,
    },
    /// Plan SFTP downloads from the scanner and copies to the compute cluster
    Fetch {
        /// text file with `Study_ID Sample_# DST1 MID1 PRX1 ... DSTN MIDN PRXN` per line
        manifest: PathBuf,
        /// host address of the xt2 server
        xt2_host: String,
        /// directory receiving the log and the per-visit download directories
        out_dir: PathBuf,
        /// host address of the arc cluster
        arc_host: String,
        /// output directory on arc
        arc_out_dir: String,
    },
}

impl Commands {
    fn into_request(self) -> RunRequest {
        match self {
            Commands::CheckArc { manifest, out_dir } => RunRequest {
                manifest,
                out_dir,
                command: Command::CheckArc,
            },
            Commands::CheckXct {
                manifest,
                xt2_host,
                out_dir,
            } => RunRequest {
                manifest,
                out_dir,
                command: Command::CheckXct { xt2_host },
            },
            Commands::Fetch {
                manifest,
                xt2_host,
                out_dir,
                arc_host,
                arc_out_dir,
            } => RunRequest {
                manifest,
                out_dir,
                command: Command::Fetch {
                    xt2_host,
                    arc_host,
                    arc_out_dir,
                },
            },
        }
    }
}

// main function parses commandline arguments and runs the program
fn main() {
    let cli = Args::parse();
    init_tracing(cli.quiet, cli.verbose).unwrap_or_else(|e| {
        eprintln!("Error! {}", e);
        std::process::exit(-2);
    });

    let config = PlanConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        eprintln!("Error! {}", e);
        std::process::exit(-2);
    });

    let request = cli.command.into_request();
    let summary = run(&request, &config).unwrap_or_else(|e| {
        eprintln!("Error! {}", e);
        std::process::exit(-2);
    });
    if summary.skipped > 0 {
        warn!(
            skipped = summary.skipped,
            "some manifest lines were skipped, see the warnings above"
        );
    }
    println!("{}", summary.log_path.display());
}

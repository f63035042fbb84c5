//! Quick commandline utility to convert between 3D image file formats.
//!
//! The output format is chosen from the output file extension (MHA, MHD/RAW,
//! NII, NII.GZ, NRRD/NHDR, TIF or DCM). The input may be any of those files
//! or a DICOM/TIFF series directory. A `.dcm` output is written as a series
//! into a directory named after the file. Scanco ISQ/AIM files are
//! recognised but cannot be read or written by this tool.

use clap::Parser;
use std::path::PathBuf;

use xctplan::convert::convert;
use xctplan::logging::init_tracing;

// use clap to create commandline interface
#[derive(Parser, Debug)]
#[command(author, about, version, long_about)]
struct Args {
    /// the input image (path + filename), or a series directory
    input: PathBuf,

    /// the output image (path + filename)
    output: PathBuf,

    /// only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// log debug output
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Args::parse();
    init_tracing(cli.quiet, cli.verbose).unwrap_or_else(|e| {
        eprintln!("Error! {}", e);
        std::process::exit(-2);
    });

    if cli.output.exists() {
        tracing::warn!(output = %cli.output.display(), "overwriting existing file");
    }
    let written = convert(&cli.input, &cli.output).unwrap_or_else(|e| {
        eprintln!("Error! {}", e);
        std::process::exit(-2);
    });
    println!("{}", written.display());
}

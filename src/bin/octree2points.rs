use clap::Parser;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use mortree::prelude::*;

/// Reconstruct oriented point sets from serialized octrees.
#[derive(Parser, Debug)]
#[command(name = "octree2points")]
struct Args {
    /// Input .octree files
    #[arg(required = true)]
    filenames: Vec<PathBuf>,

    /// Output directory
    #[arg(long, default_value = ".")]
    output_path: PathBuf,

    /// First level to export
    #[arg(long, default_value_t = 0)]
    depth_start: i32,

    /// Last level to export
    #[arg(long, default_value_t = 10)]
    depth_end: i32,

    /// Also export an ASCII PLY next to each .points file
    #[arg(long)]
    ply: bool,
}

fn process(file: &Path, args: &Args) -> Result<(), Box<dyn Error>> {
    let octree = Octree::read_file(file)?;
    let points = octree.extract_points(args.depth_start, args.depth_end)?;

    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "points".to_string());
    let output = args.output_path.join(format!("{stem}.points"));
    points.write_file(&output)?;
    if args.ply {
        points.write_ply(args.output_path.join(format!("{stem}.ply")))?;
    }

    tracing::info!(
        input = %file.display(),
        output = %output.display(),
        points = points.num_points(),
        "point set written"
    );
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut failed = false;
    for file in &args.filenames {
        if let Err(err) = process(file, &args) {
            tracing::error!(input = %file.display(), "{err}");
            failed = true;
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

use clap::Parser;
use serde::Deserialize;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use mortree::prelude::*;

/// Build serialized octrees from .points files.
#[derive(Parser, Debug)]
#[command(name = "octree")]
struct Args {
    /// Input .points files
    #[arg(required_unless_present = "job")]
    filenames: Vec<PathBuf>,

    /// JSON job file listing inputs and build parameters
    #[arg(long)]
    job: Option<PathBuf>,

    /// Output directory
    #[arg(long, default_value = ".")]
    output_path: PathBuf,

    /// Octree depth
    #[arg(long, default_value_t = 6)]
    depth: i32,

    /// Depth up to which the tree is stored dense
    #[arg(long, default_value_t = 2)]
    full_depth: i32,

    /// Trim well-approximated subtrees
    #[arg(long)]
    adaptive: bool,

    /// Shallowest depth at which trimming may start
    #[arg(long, default_value_t = 4)]
    adp_depth: i32,

    /// Distance error threshold for trimming
    #[arg(long, default_value_t = 0.866)]
    th_distance: f32,

    /// Normal error threshold for trimming
    #[arg(long, default_value_t = 0.2)]
    th_normal: f32,

    /// Store per-node displacements
    #[arg(long)]
    node_dis: bool,

    /// Store features on every level, not only the finest
    #[arg(long)]
    node_feature: bool,

    /// Store split labels
    #[arg(long)]
    split_label: bool,

    /// Store keys as packed (x, y, z, depth) bytes
    #[arg(long)]
    key2xyz: bool,
}

#[derive(Deserialize)]
struct Job {
    filenames: Vec<PathBuf>,
    #[serde(default)]
    params: BuildParams,
}

impl Args {
    fn params(&self) -> BuildParams {
        BuildParams {
            depth: self.depth,
            full_depth: self.full_depth,
            adaptive: self.adaptive,
            adaptive_depth: self.adp_depth,
            threshold_distance: self.th_distance,
            threshold_normal: self.th_normal,
            node_displacement: self.node_dis,
            node_feature: self.node_feature,
            split_label: self.split_label,
            key2xyz: self.key2xyz,
        }
    }
}

fn process(file: &Path, params: &BuildParams, output_path: &Path) -> Result<(), Box<dyn Error>> {
    let points = Points::read_file(file)?;

    let mut info = OctreeInfo::initialize(params, &points);
    info.set_bbox(&points.bounds().cube());

    let octree = Octree::build(info, &points)?;

    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "octree".to_string());
    let output = output_path.join(format!("{stem}.octree"));
    octree.write_file(&output)?;

    tracing::info!(
        input = %file.display(),
        output = %output.display(),
        nodes = octree.info().total_node_num(),
        "octree written"
    );
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let (filenames, params) = match &args.job {
        Some(path) => {
            let job: Job = match std::fs::read_to_string(path)
                .map_err(|e| e.to_string())
                .and_then(|s| serde_json::from_str(&s).map_err(|e| e.to_string()))
            {
                Ok(job) => job,
                Err(err) => {
                    tracing::error!(job = %path.display(), "cannot parse job file: {err}");
                    return ExitCode::FAILURE;
                }
            };
            (job.filenames, job.params)
        }
        None => (args.filenames.clone(), args.params()),
    };

    let mut failed = false;
    for file in &filenames {
        if let Err(err) = process(file, &params, &args.output_path) {
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

//! Argument definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "strata",
    version,
    about = "Index massive point clouds into a chunked spatial tree"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build (or continue) an index from packed point sources
    Build {
        /// Input files, relative to the current directory
        #[arg(short = 'i', long = "input", required = true, num_args = 1..)]
        inputs: Vec<String>,

        /// Output directory
        #[arg(short = 'o', long = "output")]
        output: PathBuf,

        /// Index bounds as [xmin,ymin,zmin,xmax,ymax,zmax]; inferred from
        /// the inputs when omitted
        #[arg(short = 'b', long)]
        bounds: Option<String>,

        /// Worker threads (0 = derive from the machine)
        #[arg(short = 't', long, default_value_t = 0)]
        threads: usize,

        /// Overwrite any existing build instead of continuing it
        #[arg(short = 'f', long)]
        force: bool,

        /// Prefix stored chunk ids with a SHA shard
        #[arg(short = 'p', long)]
        prefix_ids: bool,

        /// Disable chunk compression
        #[arg(short = 'c', long)]
        no_compress: bool,

        /// Store absolute f64 coordinates (no quantization)
        #[arg(short = 'n', long)]
        absolute: bool,

        /// Uniform coordinate scale for integer storage
        #[arg(short = 's', long)]
        scale: Option<f64>,

        /// Build one spatial partition: subset id and count
        #[arg(long, num_args = 2, value_names = ["ID", "OF"])]
        subset: Option<Vec<u64>>,

        /// Stop after this many source files (0 = all)
        #[arg(short = 'g', long, default_value_t = 0)]
        max_files: usize,

        /// Depths [0, NULL_DEPTH) are discarded
        #[arg(long)]
        null_depth: Option<u64>,

        /// Depths [NULL_DEPTH, BASE_DEPTH) stay resident
        #[arg(long)]
        base_depth: Option<u64>,

        /// Deepest stored depth (0 = lossless)
        #[arg(long)]
        cold_depth: Option<u64>,

        /// Nominal point span per cold chunk (a power of the factor)
        #[arg(long)]
        points_per_chunk: Option<u64>,

        /// Branching factor: 8 (octree) or 4 (hybrid)
        #[arg(long)]
        factor: Option<u64>,
    },

    /// Link completed subset builds at the same output path
    Merge {
        /// The builds' shared output directory
        path: PathBuf,

        /// Number of subsets
        of: u64,
    },

    /// Scan sources for bounds, counts, and schema without indexing
    Infer {
        /// Input files
        #[arg(required = true)]
        inputs: Vec<String>,
    },
}

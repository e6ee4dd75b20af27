//! `strata build`

use anyhow::{bail, Context};
use std::path::PathBuf;
use std::sync::Arc;
use strata_build::{infer, BuildConfig, Builder, FileSourceProvider, Subset};
use strata_core::{Bounds, Delta, FileStore};

/// Default coordinate scale when quantization is on and no scale was given.
const DEFAULT_SCALE: f64 = 0.01;

pub struct BuildArgs {
    pub inputs: Vec<String>,
    pub output: PathBuf,
    pub bounds: Option<String>,
    pub threads: usize,
    pub force: bool,
    pub prefix_ids: bool,
    pub no_compress: bool,
    pub absolute: bool,
    pub scale: Option<f64>,
    pub subset: Option<Vec<u64>>,
    pub max_files: usize,
    pub null_depth: Option<u64>,
    pub base_depth: Option<u64>,
    pub cold_depth: Option<u64>,
    pub points_per_chunk: Option<u64>,
    pub factor: Option<u64>,
}

pub fn run(args: BuildArgs) -> anyhow::Result<()> {
    let store = Arc::new(FileStore::new(&args.output));
    let provider = FileSourceProvider::new(std::env::current_dir()?);

    let mut config = BuildConfig::default();
    config.force = args.force;
    config.compress = !args.no_compress;
    config.structure.prefix_ids = args.prefix_ids;
    if let Some(v) = args.null_depth {
        config.structure.null_depth = v;
    }
    if let Some(v) = args.base_depth {
        config.structure.base_depth = v;
    }
    if let Some(v) = args.cold_depth {
        config.structure.cold_depth = v;
    }
    if let Some(v) = args.points_per_chunk {
        config.structure.points_per_chunk = v;
    }
    if let Some(v) = args.factor {
        config.structure.factor = v;
    }
    if args.threads > 0 {
        config.work_threads = (args.threads - args.threads / 3).max(1);
        config.clip_threads = (args.threads / 3).max(1);
    }
    if let Some(pair) = &args.subset {
        let subset = Subset::new(pair[0], pair[1]).map_err(anyhow::Error::from)?;
        // Subset partitioning consumes null-tier levels; make sure the tree
        // has them.
        config.structure.null_depth = config.structure.null_depth.max(subset.levels());
        config.subset = Some((pair[0], pair[1]));
    }
    config.delta = if args.absolute {
        None
    } else {
        Some(Delta::uniform(args.scale.unwrap_or(DEFAULT_SCALE)))
    };

    // Resolve bounds and schema: explicit bounds, or a pre-scan.
    match &args.bounds {
        Some(text) => {
            config.bounds = Some(parse_bounds(text)?);
            for path in &args.inputs {
                config.push_input(path.clone());
            }
        }
        None => {
            tracing::info!("no bounds given; scanning inputs");
            let inference = infer(&provider, &args.inputs)?;
            tracing::info!(
                points = inference.num_points,
                bounds = %inference.bounds,
                "inference complete"
            );
            config.bounds = Some(inference.bounds);
            config.schema = Some(inference.schema.clone());
            config.inputs = inference.files;
        }
    }
    config.structure.num_points_hint = config
        .inputs
        .iter()
        .filter_map(|f| f.num_points)
        .sum::<u64>();

    let builder = Builder::create(config, store).context("creating builder")?;
    if builder.is_continuation() {
        tracing::info!("continuing build at {}", args.output.display());
    }
    builder.go(&provider, args.max_files)?;

    let stats = builder.point_stats();
    println!(
        "inserted {} points ({} out of bounds, {} overflowed)",
        stats.inserts, stats.out_of_bounds, stats.overflows
    );
    Ok(())
}

fn parse_bounds(text: &str) -> anyhow::Result<Bounds> {
    let parsed: Bounds = serde_json::from_str(text)
        .with_context(|| format!("bounds must be [xmin,ymin,zmin,xmax,ymax,zmax], got {text}"))?;
    if parsed.width() <= 0.0 || parsed.depth() <= 0.0 || parsed.height() <= 0.0 {
        bail!("bounds must have positive extent on every axis");
    }
    Ok(parsed)
}

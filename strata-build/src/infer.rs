//! Pre-scan: bounds, counts, and schema without indexing anything.
//!
//! Used before a fresh build when no bounds were configured, and by the
//! `infer` command. Every source is streamed once; per-file failures are
//! recorded and scanning continues.

use crate::error::{BuildError, Result};
use crate::manifest::{FileInfo, FileStatus};
use crate::source::SourceProvider;
use strata_core::{Bounds, DimType, Schema};
use strata_index::POOL_BLOCK;

/// The result of a pre-scan.
#[derive(Debug)]
pub struct Inference {
    pub bounds: Bounds,
    pub num_points: u64,
    pub schema: Schema,
    /// One entry per input, carrying per-file bounds and counts for the
    /// manifest.
    pub files: Vec<FileInfo>,
}

/// Stream every input once, accumulating bounds and counts.
pub fn infer(provider: &dyn SourceProvider, inputs: &[String]) -> Result<Inference> {
    let mut schema: Option<Schema> = None;
    let mut bounds = Bounds::empty();
    let mut num_points = 0u64;
    let mut files = Vec::with_capacity(inputs.len());

    for path in inputs {
        let mut info = FileInfo::new(path.clone());
        match scan_one(provider, path, &mut schema) {
            Ok((file_bounds, count)) => {
                if let Some(b) = &file_bounds {
                    bounds.grow_to(b.min());
                    bounds.grow_to(b.max());
                }
                num_points += count;
                info.bounds = file_bounds;
                info.num_points = Some(count);
            }
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "inference failed for source");
                info.status = FileStatus::Error;
                info.error = Some(e.to_string());
            }
        }
        files.push(info);
    }

    let schema = schema.ok_or_else(|| {
        BuildError::Source("no readable sources; cannot infer a schema".into())
    })?;
    if bounds.is_empty() {
        return Err(BuildError::Source(
            "no points found; cannot infer bounds".into(),
        ));
    }

    Ok(Inference {
        bounds,
        num_points,
        schema,
        files,
    })
}

fn scan_one(
    provider: &dyn SourceProvider,
    path: &str,
    schema: &mut Option<Schema>,
) -> Result<(Option<Bounds>, u64)> {
    let mut source = provider.open(path)?;
    let source_schema = source.schema().clone();
    if !source_schema.is_normal() {
        return Err(BuildError::SchemaMismatch(format!(
            "{path} does not store X, Y, Z first"
        )));
    }
    // Native records carry double-precision coordinates; quantized layouts
    // only exist on the storage side. The builder holds sources to the same
    // contract, so reject here rather than at insert time.
    if source_schema.xyz_type() != DimType::F64 {
        return Err(BuildError::SchemaMismatch(format!(
            "{path} stores {:?} coordinates; sources must produce f64 XYZ",
            source_schema.xyz_type()
        )));
    }
    match schema {
        None => *schema = Some(source_schema.clone()),
        Some(expected) if *expected == source_schema => {}
        Some(expected) => {
            return Err(BuildError::SchemaMismatch(format!(
                "{path} produces {source_schema:?}, expected {expected:?}"
            )))
        }
    }

    let ps = source_schema.point_size();
    let mut staging: Vec<Box<[u8]>> = (0..POOL_BLOCK)
        .map(|_| vec![0u8; ps].into_boxed_slice())
        .collect();

    let mut file_bounds = Bounds::empty();
    let mut count = 0u64;
    loop {
        let n = {
            let mut slots: Vec<&mut [u8]> = staging.iter_mut().map(|b| &mut **b).collect();
            source.read(&mut slots)?
        };
        if n == 0 {
            break;
        }
        for record in staging.iter().take(n) {
            file_bounds.grow_to(&source_schema.read_point(record));
        }
        count += n as u64;
    }

    let file_bounds = (!file_bounds.is_empty()).then_some(file_bounds);
    Ok((file_bounds, count))
}

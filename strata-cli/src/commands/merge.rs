//! `strata merge`

use std::path::Path;
use std::sync::Arc;
use strata_core::FileStore;

pub fn run(path: &Path, of: u64) -> anyhow::Result<()> {
    let store = Arc::new(FileStore::new(path));
    let summary = strata_build::merge(store, of)?;
    println!(
        "linked {} subsets: {} points across {} chunks",
        summary.of, summary.inserts, summary.chunks
    );
    Ok(())
}

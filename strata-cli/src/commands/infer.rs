//! `strata infer`

use strata_build::{infer, FileSourceProvider};

pub fn run(inputs: &[String]) -> anyhow::Result<()> {
    let provider = FileSourceProvider::new(std::env::current_dir()?);
    let inference = infer(&provider, inputs)?;

    let summary = serde_json::json!({
        "bounds": inference.bounds,
        "numPoints": inference.num_points,
        "schema": inference.schema,
        "files": inference.files,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

//! Build metadata: the single JSON document a reader needs to interpret
//! everything else in the output.
//!
//! ## Object-store layout (paths relative to the output root)
//!
//! ```text
//! strata[-<subset>]            this document
//! strata-manifest[-<subset>]   source files and per-file stats
//! strata-hierarchy[-<subset>]  compressed chunk-id -> count map
//! <id>[-<subset>]              the base chunk
//! [prefix/]<id>                cold chunks (never subset-postfixed)
//! ```

use crate::error::{BuildError, Result};
use crate::subset::Subset;
use serde::{Deserialize, Serialize};
use strata_core::{
    ensure_get, ensure_put, Bounds, Delta, DimType, ObjectStore, Schema, DIM_X, DIM_Y, DIM_Z,
    EPSILON_RATIO,
};
use strata_index::{Format, Structure, StructureParams};

pub const METADATA_PATH: &str = "strata";
pub const MANIFEST_PATH: &str = "strata-manifest";
pub const HIERARCHY_PATH: &str = "strata-hierarchy";

/// Everything immutable about a build, plus accumulated fatal errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Native bounds, as inferred or configured.
    pub bounds: Bounds,
    /// Native bounds rescaled into quantized space when a delta is present.
    pub bounds_conforming: Bounds,
    /// Conforming bounds expanded to the cube the tree subdivides.
    pub bounds_cube: Bounds,
    /// Cube grown to admit boundary points.
    pub bounds_epsilon: Bounds,
    /// The storage schema: normalized, with XYZ in their stored type.
    pub schema: Schema,
    pub structure: StructureParams,
    pub format: Format,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<Delta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subset: Option<Subset>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl Metadata {
    /// Assemble metadata for a fresh build from native inputs.
    pub fn new(
        native_bounds: Bounds,
        native_schema: &Schema,
        structure: StructureParams,
        format: Format,
        delta: Option<Delta>,
        subset: Option<Subset>,
    ) -> Result<Self> {
        format.validate()?;
        // The native contract is double-precision coordinates; the storage
        // schema derived below is the only place integers appear.
        for name in [DIM_X, DIM_Y, DIM_Z] {
            match native_schema.find(name) {
                Some((i, _)) if native_schema.dims()[i].dtype == DimType::F64 => {}
                Some((i, _)) => {
                    return Err(BuildError::Config(format!(
                        "native {name} must be f64, got {:?}",
                        native_schema.dims()[i].dtype
                    )))
                }
                None => {
                    return Err(BuildError::Config(format!(
                        "native schema is missing {name}"
                    )))
                }
            }
        }
        let bounds_conforming = match &delta {
            Some(d) => d.quantize_bounds(&native_bounds),
            None => native_bounds,
        };
        let bounds_cube = bounds_conforming.cube();
        let bounds_epsilon = bounds_cube.grow(EPSILON_RATIO);
        let schema = native_schema.storage(delta.as_ref(), &bounds_cube);

        let metadata = Self {
            bounds: native_bounds,
            bounds_conforming,
            bounds_cube,
            bounds_epsilon,
            schema,
            structure,
            format,
            delta,
            subset,
            errors: Vec::new(),
        };

        // Fail bad configurations at startup, not mid-build.
        let built = metadata.build_structure()?;
        if let Some(subset) = &metadata.subset {
            subset.validate_structure(&built)?;
        }
        Ok(metadata)
    }

    /// Resolve the tree shape.
    pub fn build_structure(&self) -> Result<Structure> {
        Ok(Structure::new(self.structure.clone())?)
    }

    /// The pre-quantization schema sources produce: same dimensions, f64
    /// coordinates.
    pub fn native_schema(&self) -> Schema {
        self.schema.with_xyz(DimType::F64)
    }

    /// Postfix applied to metadata artifacts (not to cold data chunks).
    pub fn postfix(&self) -> String {
        match &self.subset {
            Some(s) => s.postfix(),
            None => String::new(),
        }
    }

    fn path_for(subset_id: Option<u64>) -> String {
        match subset_id {
            Some(id) => format!("{METADATA_PATH}-{id}"),
            None => METADATA_PATH.to_string(),
        }
    }

    pub fn manifest_path(&self) -> String {
        format!("{MANIFEST_PATH}{}", self.postfix())
    }

    pub fn hierarchy_path(&self) -> String {
        format!("{HIERARCHY_PATH}{}", self.postfix())
    }

    /// The base chunk's storage path: its id plus the postfix.
    pub fn base_path(&self, structure: &Structure) -> String {
        format!("{}{}", structure.base_index_begin(), self.postfix())
    }

    pub fn exists(store: &dyn ObjectStore, subset_id: Option<u64>) -> Result<bool> {
        Ok(store.exists(&Self::path_for(subset_id))?)
    }

    pub fn save(&self, store: &dyn ObjectStore) -> Result<()> {
        let path = format!("{METADATA_PATH}{}", self.postfix());
        let json = serde_json::to_vec_pretty(self)?;
        ensure_put(store, &path, &json)?;
        Ok(())
    }

    pub fn load(store: &dyn ObjectStore, subset_id: Option<u64>) -> Result<Self> {
        let bytes = ensure_get(store, &Self::path_for(subset_id))?;
        let metadata: Metadata = serde_json::from_slice(&bytes)?;
        // Deserialization bypasses the constructors; re-validate.
        metadata.format.validate()?;
        metadata.schema.validate_coordinates()?;
        Ok(metadata)
    }

    /// Whether another build's metadata describes the same tree (everything
    /// but the subset and errors must match for continuation or merge).
    pub fn compatible_with(&self, other: &Metadata) -> Result<()> {
        if self.schema != other.schema {
            return Err(BuildError::Merge("schemas differ".into()));
        }
        if self.structure != other.structure {
            return Err(BuildError::Merge("structures differ".into()));
        }
        if self.format != other.format {
            return Err(BuildError::Merge("formats differ".into()));
        }
        if self.bounds_cube != other.bounds_cube || self.delta != other.delta {
            return Err(BuildError::Merge("bounds or delta differ".into()));
        }
        Ok(())
    }
}

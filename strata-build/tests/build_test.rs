//! End-to-end build scenarios against an in-memory store.

use rand::{Rng, SeedableRng};
use std::sync::Arc;
use strata_build::{merge, BuildConfig, Builder, FileStatus, MemorySourceProvider, Metadata};
use strata_core::{Bounds, Delta, MemoryStore, Point, Schema, StorageRead};
use strata_index::{ChunkType, Format, HierarchyCodec, Hierarchy, StructureParams, TailField};

fn bounds(min: f64, max: f64) -> Bounds {
    Bounds::new(Point::new(min, min, min), Point::new(max, max, max)).unwrap()
}

fn octree_params() -> StructureParams {
    StructureParams {
        null_depth: 0,
        base_depth: 4,
        cold_depth: 0,
        points_per_chunk: 4096,
        factor: 8,
        ..Default::default()
    }
}

fn quadtree_params() -> StructureParams {
    StructureParams {
        null_depth: 1,
        base_depth: 4,
        cold_depth: 0,
        points_per_chunk: 64,
        factor: 4,
        mapped_depth: 6,
        ..Default::default()
    }
}

fn config_with(params: StructureParams, b: Bounds) -> BuildConfig {
    let mut config = BuildConfig::default();
    config.structure = params;
    config.bounds = Some(b);
    config.work_threads = 1;
    config.clip_threads = 1;
    config
}

fn run_build(
    config: BuildConfig,
    store: &Arc<MemoryStore>,
    provider: &MemorySourceProvider,
) -> Builder {
    let builder = Builder::create(config, store.clone()).unwrap();
    builder.go(provider, 0).unwrap();
    builder
}

#[test]
fn test_identical_points_stack_in_one_cell() {
    // Two identical points, lossless, no delta, cube [0, 8)^3.
    let store = Arc::new(MemoryStore::new());
    let provider = MemorySourceProvider::new();
    let p = Point::new(1.5, 2.5, 3.5);
    provider.insert_points("pts", Schema::xyz(), &[p, p]);

    let mut config = config_with(octree_params(), bounds(0.0, 8.0));
    config.push_input("pts");
    let builder = run_build(config, &store, &provider);

    let stats = builder.point_stats();
    assert_eq!(stats.inserts, 2);
    assert_eq!(stats.out_of_bounds, 0);
    assert_eq!(stats.overflows, 0);

    // Exactly one chunk exists: the base, holding both points at the
    // shallowest depth.
    let metadata = Metadata::load(store.as_ref(), None).unwrap();
    let structure = metadata.build_structure().unwrap();
    let hierarchy =
        Hierarchy::from_bytes(&store.get(&metadata.hierarchy_path()).unwrap()).unwrap();
    assert_eq!(hierarchy.len(), 1);
    assert_eq!(hierarchy.count(structure.base_index_begin()), Some(2));

    // The stored base round-trips exactly through the packer.
    let base_bytes = store.get(&metadata.base_path(&structure)).unwrap();
    let celled_size = metadata.schema.point_size() + 8;
    let unpacker = metadata
        .format
        .unpack(base_bytes.clone(), celled_size)
        .unwrap();
    assert_eq!(unpacker.num_points(), 2);
    assert_eq!(unpacker.chunk_type(), Some(ChunkType::Base));
    let repacked = metadata
        .format
        .pack_raw(unpacker.into_payload(), 2, ChunkType::Base)
        .unwrap();
    assert_eq!(repacked, base_bytes);
}

#[test]
fn test_point_outside_epsilon_is_dropped() {
    let store = Arc::new(MemoryStore::new());
    let provider = MemorySourceProvider::new();
    provider.insert_points("pts", Schema::xyz(), &[Point::new(1.006, 0.5, 0.5)]);

    let mut config = config_with(octree_params(), bounds(0.0, 1.0));
    config.push_input("pts");
    let builder = run_build(config, &store, &provider);

    let stats = builder.point_stats();
    assert_eq!(stats.inserts, 0);
    assert_eq!(stats.out_of_bounds, 1);

    // Nothing but the metadata artifacts and the (empty) base was written.
    let metadata = Metadata::load(store.as_ref(), None).unwrap();
    let structure = metadata.build_structure().unwrap();
    let mut paths = store.paths();
    paths.sort();
    let mut expected = vec![
        "strata".to_string(),
        "strata-manifest".to_string(),
        "strata-hierarchy".to_string(),
        metadata.base_path(&structure),
    ];
    expected.sort();
    assert_eq!(paths, expected);
}

#[test]
fn test_boundary_point_admitted_by_epsilon() {
    let store = Arc::new(MemoryStore::new());
    let provider = MemorySourceProvider::new();
    provider.insert_points("pts", Schema::xyz(), &[Point::new(1.0, 0.5, 0.5)]);

    let mut config = config_with(octree_params(), bounds(0.0, 1.0));
    config.push_input("pts");
    let builder = run_build(config, &store, &provider);
    assert_eq!(builder.point_stats().inserts, 1);
}

#[test]
fn test_delta_quantizes_to_i32_on_disk() {
    let store = Arc::new(MemoryStore::new());
    let provider = MemorySourceProvider::new();
    provider.insert_points("pts", Schema::xyz(), &[Point::new(123.456, 0.0, 0.0)]);

    let mut config = config_with(octree_params(), bounds(0.0, 200.0));
    config.delta = Some(Delta::uniform(0.01));
    config.push_input("pts");
    let builder = run_build(config, &store, &provider);
    assert_eq!(builder.point_stats().inserts, 1);

    let metadata = Metadata::load(store.as_ref(), None).unwrap();
    assert_eq!(metadata.schema.point_size(), 12); // 3 x i32
    let structure = metadata.build_structure().unwrap();
    let base_bytes = store.get(&metadata.base_path(&structure)).unwrap();
    let unpacker = metadata.format.unpack(base_bytes, 12 + 8).unwrap();
    let payload = unpacker.into_payload();
    // One celled record: tube id u64, then quantized XYZ.
    let stored = metadata.schema.read_point(&payload[8..]);
    assert_eq!(stored, Point::new(12346.0, 0.0, 0.0));
    let native = metadata.delta.unwrap().unquantize(&stored);
    assert!((native.x - 123.46).abs() < 1e-9);
}

#[test]
fn test_insert_then_read_accounting() {
    // Sum of stored chunk counts equals inserts == N - outOfBounds.
    let store = Arc::new(MemoryStore::new());
    let provider = MemorySourceProvider::new();
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    let points: Vec<Point> = (0..3000)
        .map(|_| {
            Point::new(
                rng.gen_range(-1.0..17.0),
                rng.gen_range(-1.0..17.0),
                rng.gen_range(-1.0..17.0),
            )
        })
        .collect();
    let n = points.len() as u64;
    provider.insert_points("pts", Schema::xyz(), &points);

    let mut config = config_with(quadtree_params(), bounds(0.0, 16.0));
    config.push_input("pts");
    let builder = run_build(config, &store, &provider);

    let stats = builder.point_stats();
    assert_eq!(stats.overflows, 0);
    assert!(stats.out_of_bounds > 0);
    assert_eq!(stats.inserts + stats.out_of_bounds, n);

    let metadata = Metadata::load(store.as_ref(), None).unwrap();
    let hierarchy =
        Hierarchy::from_bytes(&store.get(&metadata.hierarchy_path()).unwrap()).unwrap();
    assert_eq!(hierarchy.total_points(), stats.inserts);
    // Collisions pushed points past the base into cold chunks.
    assert!(hierarchy.len() > 1);
}

#[test]
fn test_lossy_build_counts_overflows() {
    // Cold tier capped right at the base: a shared descent path can hold
    // one point per base depth, and the next point overflows.
    let store = Arc::new(MemoryStore::new());
    let provider = MemorySourceProvider::new();
    // Five distinct points sharing every octant choice and tick.
    let points: Vec<Point> = (0..5)
        .map(|k| Point::new(4.0, 4.0, 4.0 + k as f64 * 1e-12))
        .collect();
    provider.insert_points("pts", Schema::xyz(), &points);

    let mut params = octree_params();
    params.cold_depth = 4; // no cold tier at all
    let mut config = config_with(params, bounds(0.0, 8.0));
    config.push_input("pts");
    let builder = run_build(config, &store, &provider);

    let stats = builder.point_stats();
    // Depths 0 through 3 each take one point; the fifth has nowhere to go.
    assert_eq!(stats.inserts, 4);
    assert_eq!(stats.overflows, 1);
}

#[test]
fn test_compression_without_num_points_fails_at_creation() {
    let store = Arc::new(MemoryStore::new());
    let mut config = config_with(octree_params(), bounds(0.0, 8.0));
    config.tail_fields = vec![TailField::ChunkType];
    config.compress = true;
    assert!(Builder::create(config, store).is_err());

    // The same tail layout is fine uncompressed.
    assert!(Format::new(false, vec![TailField::ChunkType], HierarchyCodec::None).is_ok());
}

#[test]
fn test_empty_source_completes() {
    let store = Arc::new(MemoryStore::new());
    let provider = MemorySourceProvider::new();
    provider.insert_points("empty", Schema::xyz(), &[]);

    let mut config = config_with(octree_params(), bounds(0.0, 8.0));
    config.push_input("empty");
    let builder = run_build(config, &store, &provider);

    let manifest = builder.manifest();
    assert_eq!(manifest.get(0).status, FileStatus::Inserted);
    assert_eq!(builder.point_stats().inserts, 0);
}

#[test]
fn test_schema_mismatch_is_contained() {
    let store = Arc::new(MemoryStore::new());
    let provider = MemorySourceProvider::new();
    let wrong = Schema::new(vec![
        strata_core::DimInfo::new("X", strata_core::DimType::F64),
        strata_core::DimInfo::new("Y", strata_core::DimType::F64),
        strata_core::DimInfo::new("Z", strata_core::DimType::F64),
        strata_core::DimInfo::new("Weird", strata_core::DimType::U8),
    ])
    .unwrap();
    provider.insert_points("bad", wrong, &[Point::new(1.0, 1.0, 1.0)]);
    provider.insert_points("good", Schema::xyz(), &[Point::new(1.0, 1.0, 1.0)]);

    let mut config = config_with(octree_params(), bounds(0.0, 8.0));
    config.push_input("bad");
    config.push_input("good");
    let builder = run_build(config, &store, &provider);

    let manifest = builder.manifest();
    assert_eq!(manifest.get(0).status, FileStatus::Error);
    assert!(manifest.get(0).error.as_deref().unwrap().contains("Schema"));
    assert_eq!(manifest.get(1).status, FileStatus::Inserted);
    assert_eq!(builder.point_stats().inserts, 1);
}

#[test]
fn test_all_sources_failing_is_not_success() {
    // A build where every file errors must not exit as a clean success,
    // even though per-file errors are contained.
    let store = Arc::new(MemoryStore::new());
    let provider = MemorySourceProvider::new();

    let mut config = config_with(octree_params(), bounds(0.0, 8.0));
    config.push_input("missing-a");
    config.push_input("missing-b");
    let builder = Builder::create(config, store.clone()).unwrap();
    let err = builder.go(&provider, 0).unwrap_err();
    assert!(err.to_string().contains("failed"));

    // The manifest was still saved with the per-file errors.
    let manifest = builder.manifest();
    assert!(manifest
        .files()
        .iter()
        .all(|f| f.status == FileStatus::Error));
    assert!(store.exists("strata-manifest").unwrap());
}

#[test]
fn test_resumed_build_matches_uninterrupted() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let mut files = Vec::new();
    for _ in 0..4 {
        let points: Vec<Point> = (0..400)
            .map(|_| {
                Point::new(
                    rng.gen_range(0.0..16.0),
                    rng.gen_range(0.0..16.0),
                    rng.gen_range(0.0..16.0),
                )
            })
            .collect();
        files.push(points);
    }

    let provider = MemorySourceProvider::new();
    for (i, points) in files.iter().enumerate() {
        provider.insert_points(format!("f{i}"), Schema::xyz(), points);
    }
    let inputs = ["f0", "f1", "f2", "f3"];

    let make_config = || {
        let mut config = config_with(quadtree_params(), bounds(0.0, 16.0));
        for path in inputs {
            config.push_input(path);
        }
        config.checkpoint_interval = 1;
        config
    };

    // Uninterrupted reference run.
    let whole_store = Arc::new(MemoryStore::new());
    let whole = run_build(make_config(), &whole_store, &provider);
    let expected = whole.point_stats();

    // Interrupted: stop after two files, then reinvoke at the same output.
    let store = Arc::new(MemoryStore::new());
    let first = Builder::create(make_config(), store.clone()).unwrap();
    first.go(&provider, 2).unwrap();
    assert_eq!(
        first
            .manifest()
            .files()
            .iter()
            .filter(|f| f.status == FileStatus::Inserted)
            .count(),
        2
    );
    drop(first);

    let second = Builder::create(make_config(), store.clone()).unwrap();
    assert!(second.is_continuation());
    second.go(&provider, 0).unwrap();

    assert_eq!(second.point_stats(), expected);

    let metadata = Metadata::load(store.as_ref(), None).unwrap();
    let resumed =
        Hierarchy::from_bytes(&store.get(&metadata.hierarchy_path()).unwrap()).unwrap();
    let reference =
        Hierarchy::from_bytes(&whole_store.get(&metadata.hierarchy_path()).unwrap()).unwrap();
    assert_eq!(resumed.total_points(), reference.total_points());
}

#[test]
fn test_subset_builds_merge_to_whole_build() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(99);
    let points: Vec<Point> = (0..2000)
        .map(|_| {
            Point::new(
                rng.gen_range(0.0..16.0),
                rng.gen_range(0.0..16.0),
                rng.gen_range(0.0..16.0),
            )
        })
        .collect();
    let provider = MemorySourceProvider::new();
    provider.insert_points("pts", Schema::xyz(), &points);

    let base_config = || {
        let mut config = config_with(quadtree_params(), bounds(0.0, 16.0));
        config.push_input("pts");
        config
    };

    // Reference: one whole build.
    let whole_store = Arc::new(MemoryStore::new());
    let whole = run_build(base_config(), &whole_store, &provider);
    let whole_stats = whole.point_stats();
    assert!(whole_stats.inserts > 0);

    // Four subset builds of the same input into one shared store.
    let store = Arc::new(MemoryStore::new());
    for id in 1..=4 {
        let mut config = base_config();
        config.subset = Some((id, 4));
        let builder = run_build(config, &store, &provider);
        // Every subset sees the whole input but keeps only its quadrant.
        assert!(builder.point_stats().inserts < whole_stats.inserts);
    }

    let summary = merge(store.clone(), 4).unwrap();
    assert_eq!(summary.inserts, whole_stats.inserts);

    // The merged output is byte-identical to the single build: every object
    // the whole build wrote exists in the merged store with the same bytes.
    for path in whole_store.paths() {
        let whole_bytes = whole_store.get(&path).unwrap();
        let merged_bytes = store
            .get(&path)
            .unwrap_or_else(|_| panic!("merged store missing {path}"));
        assert_eq!(merged_bytes, whole_bytes, "bytes differ at {path}");
    }
}

#[test]
fn test_packed_files_through_file_store() {
    // The CLI path: packed binary sources on disk, output to a directory.
    use strata_build::{encode_packed, FileSourceProvider};
    use strata_core::FileStore;

    let dir = tempfile::tempdir().unwrap();
    let schema = Schema::xyz();
    let ps = schema.point_size();
    let points = [
        Point::new(1.0, 2.0, 3.0),
        Point::new(6.5, 7.0, 0.5),
        Point::new(3.0, 3.0, 3.0),
    ];
    let mut records = vec![0u8; points.len() * ps];
    for (record, p) in records.chunks_exact_mut(ps).zip(&points) {
        schema.write_point(record, p);
    }
    let encoded = encode_packed(&schema, &records).unwrap();
    std::fs::write(dir.path().join("cloud.sbin"), encoded).unwrap();

    let provider = FileSourceProvider::new(dir.path());
    let store = Arc::new(FileStore::new(dir.path().join("out")));

    let mut config = config_with(octree_params(), bounds(0.0, 8.0));
    config.push_input("cloud.sbin");
    let builder = Builder::create(config, store.clone()).unwrap();
    builder.go(&provider, 0).unwrap();

    assert_eq!(builder.point_stats().inserts, 3);
    assert!(store.exists("strata").unwrap());
    assert!(store.exists("strata-manifest").unwrap());
    assert!(store.exists("strata-hierarchy").unwrap());
}

#[test]
fn test_subset_requires_null_levels() {
    let store = Arc::new(MemoryStore::new());
    let mut params = quadtree_params();
    params.null_depth = 0;
    let mut config = config_with(params, bounds(0.0, 16.0));
    config.subset = Some((1, 4));
    assert!(Builder::create(config, store).is_err());
}

//! Integration tests for extraction through the coordinator
//!
//! These tests cover the walk over structures, arrays of records, sequences,
//! string values and type conversion.

use dapfetch_client::{CacheCoordinator, CoordinatorBuilder, DataNode, DimDecl, MemoryDataset, MemoryRemote};
use dapfetch_core::convert::convert;
use dapfetch_core::{AtomicType, Dimension, Error, PolicyConfig, SchemaProvider, SchemaTree};

fn record(depth: i64, val: f64) -> Vec<DataNode> {
    vec![
        DataNode::ints("depth", AtomicType::Int, vec![], &[depth]),
        DataNode::floats("val", AtomicType::Double, vec![], &[val]),
    ]
}

fn dataset() -> MemoryDataset {
    MemoryDataset::new(
        "cruise",
        vec![
            DataNode::Structure {
                name: "station".into(),
                fields: vec![
                    DataNode::strings("name", vec![], &["abc"]),
                    DataNode::ints("ids", AtomicType::Int, vec![DimDecl::new("k", 3)], &[-2, 300, 70_000]),
                ],
            },
            DataNode::strings("names", vec![DimDecl::new("n", 2)], &["hello", "hi"]),
            DataNode::Sequence {
                name: "casts".into(),
                fields: record(0, 0.0),
                records: vec![record(5, 0.5), record(10, 1.5)],
            },
        ],
    )
}

fn coordinator(policy: PolicyConfig) -> CacheCoordinator<MemoryRemote> {
    let remote = MemoryRemote::with_policy(dataset(), &policy).unwrap();
    let schema = remote.schema().clone();
    CoordinatorBuilder::new(remote, schema).policy(policy).build().unwrap()
}

fn ints(out: &[u8]) -> Vec<i32> {
    out.chunks(4).map(|c| i32::from_ne_bytes(c.try_into().unwrap())).collect()
}

/// Characters past the end of a string are filled, not an error
#[test]
fn test_string_ragged_padding() {
    let mut c = coordinator(PolicyConfig::default().with_fill_char(b'_'));
    let mut out = vec![0u8; 6];
    c.get_vara_by_name("station.name", &[0], &[6], &[1], AtomicType::Char, &mut out).unwrap();
    assert_eq!(&out, b"abc___");
}

/// The character axis of a string array takes its own stride
#[test]
fn test_string_array_character_stride() {
    let mut c = coordinator(PolicyConfig::default().with_fill_char(b'_'));
    let mut out = vec![0u8; 6];
    c.get_vara_by_name("names", &[0, 0], &[2, 3], &[1, 2], AtomicType::Char, &mut out).unwrap();
    assert_eq!(&out, b"hloh__");
}

/// String length overrides change the declared character axis
#[test]
fn test_string_length_override() {
    let mut policy = PolicyConfig::default();
    policy.apply_client_params(&[("stringlength_station.name", "4")]);
    let mut c = coordinator(policy);
    let mut out = vec![0u8; 8];
    let err = c
        .get_vara_by_name("station.name", &[0], &[5], &[1], AtomicType::Char, &mut out)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidCoordinates { declared: 4, .. }));
}

/// Sequence records are read through the record axis
#[test]
fn test_sequence_records() {
    let mut c = coordinator(PolicyConfig::default());
    let mut out = vec![0u8; 8];
    c.get_vara_by_name("casts.depth", &[0], &[2], &[1], AtomicType::Int, &mut out).unwrap();
    assert_eq!(ints(&out), vec![5, 10]);

    let mut vals = vec![0u8; 8];
    c.get_vara_by_name("casts.val", &[1], &[1], &[1], AtomicType::Double, &mut vals).unwrap();
    assert_eq!(f64::from_ne_bytes(vals.try_into().unwrap()), 1.5);
}

/// Fewer records than requested ends the read early without an error
#[test]
fn test_sequence_short_read_is_recoverable() {
    let mut c = coordinator(PolicyConfig::default());
    let mut out = vec![0xffu8; 20];
    c.get_vara_by_name("casts.depth", &[0], &[5], &[1], AtomicType::Int, &mut out).unwrap();
    assert_eq!(ints(&out[..8]), vec![5, 10]);
    assert!(out[8..].iter().all(|b| *b == 0xff));
}

/// A request whose first record is missing fails and caches nothing
#[test]
fn test_sequence_missing_first_record() {
    let mut c = coordinator(PolicyConfig::default());
    let mut out = vec![0u8; 4];
    let err = c
        .get_vara_by_name("casts.depth", &[4], &[1], &[1], AtomicType::Int, &mut out)
        .unwrap_err();
    assert!(matches!(err, Error::ProtocolShortRead(_)));
    assert_eq!(c.cache_stats().nodes, 0);
}

/// Numeric values are converted to the requested type
#[test]
fn test_numeric_conversion() {
    let mut c = coordinator(PolicyConfig::default());
    let mut doubles = vec![0u8; 24];
    c.get_vara_by_name("station.ids", &[0], &[3], &[1], AtomicType::Double, &mut doubles).unwrap();
    let doubles: Vec<f64> = doubles.chunks(8).map(|b| f64::from_ne_bytes(b.try_into().unwrap())).collect();
    assert_eq!(doubles, vec![-2.0, 300.0, 70_000.0]);

    let mut wide = vec![0u8; 16];
    c.get_vara_by_name("station.ids", &[0], &[2], &[2], AtomicType::Int64, &mut wide).unwrap();
    let wide: Vec<i64> = wide.chunks(8).map(|b| i64::from_ne_bytes(b.try_into().unwrap())).collect();
    assert_eq!(wide, vec![-2, 70_000]);
    assert_eq!(c.remote().fetch_count(), 1);
}

/// A four-byte integer never converts to char
#[test]
fn test_disallowed_conversion_int_to_char() {
    let src = 65i32.to_ne_bytes();
    let mut dst = [0u8; 1];
    let err = convert(AtomicType::Int, AtomicType::Char, &src, 1, &mut dst).unwrap_err();
    assert!(matches!(
        err,
        Error::DisallowedConversion {
            from: AtomicType::Int,
            to: AtomicType::Char
        }
    ));
    assert_eq!(dst, [0]);
}

/// Map variables under a virtual wrapper are read as members of their grid
#[test]
fn test_grid_maps_behind_virtual_wrapper() {
    let ds = MemoryDataset::new(
        "sst",
        vec![DataNode::Grid {
            name: "sst".into(),
            members: vec![
                DataNode::floats("sst", AtomicType::Float, vec![DimDecl::new("lat", 3)], &[20.5, 21.5, 22.5]),
                DataNode::floats("lat", AtomicType::Double, vec![DimDecl::new("lat", 3)], &[-45.0, 0.0, 45.0]),
            ],
        }],
    );
    let mut schema = SchemaTree::new("sst");
    let root = schema.root();
    let grid = schema.add_grid(root, "sst");
    let array = schema.add_atomic(grid, "sst", AtomicType::Float, vec![Dimension::new("lat", 3)], 0);
    let maps = schema.add_virtual(grid, "maps");
    let lat = schema.add_atomic(maps, "lat", AtomicType::Double, vec![Dimension::new("lat", 3)], 0);
    assert_eq!(schema.full_name(lat), "sst.lat");

    let remote = MemoryRemote::with_schema(ds, schema.clone());
    let mut c = CoordinatorBuilder::new(remote, schema).build().unwrap();

    let mut out = vec![0u8; 16];
    c.get_vara(lat, &[1], &[2], &[1], AtomicType::Double, &mut out).unwrap();
    let lats: Vec<f64> = out.chunks(8).map(|b| f64::from_ne_bytes(b.try_into().unwrap())).collect();
    assert_eq!(lats, vec![0.0, 45.0]);

    let mut sst = vec![0u8; 4];
    c.get_vara(array, &[2], &[1], &[1], AtomicType::Float, &mut sst).unwrap();
    assert_eq!(f32::from_ne_bytes(sst.try_into().unwrap()), 22.5);
}

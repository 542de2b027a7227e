//! dapfetch: read variables from a dataset file through the caching engine
//!
//! Usage:
//!   dapfetch get dataset.json obs.temp --start 0,2 --count 3,1 --type double
//!   dapfetch schema dataset.json

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use dapfetch_client::metrics::init_prometheus_recorder;
use dapfetch_client::{CoordinatorBuilder, MemoryDataset, MemoryRemote};
use dapfetch_core::{AtomicType, PolicyConfig, SchemaNodeId, SchemaProvider};

#[derive(Parser)]
#[command(name = "dapfetch", about = "Cached hyperslab reads over a DAP dataset")]
struct Args {
    /// Policy configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Client parameter as key=value, e.g. --param cachelimit=20M
    #[arg(long = "param", value_parser = parse_param, global = true)]
    params: Vec<(String, String)>,

    /// Debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read a hyperslab of one variable
    Get {
        /// Dataset file (JSON)
        dataset: PathBuf,

        /// Dotted variable path
        var: String,

        /// Start index per dimension (default: all zero)
        #[arg(long, value_delimiter = ',')]
        start: Vec<usize>,

        /// Element count per dimension (default: to the end)
        #[arg(long, value_delimiter = ',')]
        count: Vec<usize>,

        /// Stride per dimension (default: 1)
        #[arg(long, value_delimiter = ',')]
        stride: Vec<usize>,

        /// Output element type (default: the variable's own)
        #[arg(long = "type")]
        dst_type: Option<AtomicType>,

        /// Serve the dataset as a server that rejects constraints
        #[arg(long)]
        unconstrainable: bool,

        /// Print raw output bytes as hex
        #[arg(long)]
        hex: bool,

        /// Print Prometheus metrics after the read
        #[arg(long)]
        metrics: bool,
    },
    /// Print the dataset schema
    Schema {
        /// Dataset file (JSON)
        dataset: PathBuf,
    },
}

fn parse_param(s: &str) -> Result<(String, String), String> {
    let (key, value) = s.split_once('=').unwrap_or((s, ""));
    if key.is_empty() {
        return Err(format!("invalid parameter: {}", s));
    }
    Ok((key.to_string(), value.to_string()))
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_writer(std::io::stderr)
        .init();

    let mut policy = match &args.config {
        Some(path) => PolicyConfig::load(path)?,
        None => PolicyConfig::default(),
    };
    policy.apply_client_params(&args.params);

    match args.command {
        Command::Get {
            dataset,
            var,
            start,
            count,
            stride,
            dst_type,
            unconstrainable,
            hex,
            metrics,
        } => {
            let handle = if metrics {
                Some(init_prometheus_recorder()?)
            } else {
                None
            };

            let mut remote = MemoryRemote::with_policy(MemoryDataset::load(&dataset)?, &policy)?;
            if unconstrainable {
                remote = remote.unconstrainable();
            }
            let schema = remote.schema().clone();
            let mut coordinator = CoordinatorBuilder::new(remote, schema).policy(policy).build()?;

            let target = coordinator.schema().find(&var)?;
            let src_type = coordinator
                .schema()
                .element_type(target)
                .ok_or_else(|| anyhow::anyhow!("{} is not a variable", var))?;
            let dst_type = dst_type.unwrap_or(if src_type.is_string() {
                AtomicType::Char
            } else {
                src_type
            });
            let (start, count, stride) = fill_coordinates(coordinator.schema(), target, start, count, stride);

            let elements: usize = count.iter().product();
            let mut out = vec![0u8; elements * dst_type.size_of()];
            coordinator.get_vara(target, &start, &count, &stride, dst_type, &mut out)?;

            tracing::info!(
                var = %var,
                elements,
                fetches = coordinator.remote().fetch_count(),
                "Read complete"
            );

            if hex {
                println!("{}", hex::encode(&out));
            } else {
                for value in format_values(dst_type, &out) {
                    println!("{}", value);
                }
            }
            if let Some(handle) = handle {
                println!("{}", handle.render());
            }
        }
        Command::Schema { dataset } => {
            let schema = MemoryDataset::load(&dataset)?.schema(&policy)?;
            print_schema(&schema, schema.root(), 0);
        }
    }

    Ok(())
}

/// Default missing coordinates to the whole extent of each dimension
fn fill_coordinates(
    schema: &dyn SchemaProvider,
    target: SchemaNodeId,
    mut start: Vec<usize>,
    mut count: Vec<usize>,
    mut stride: Vec<usize>,
) -> (Vec<usize>, Vec<usize>, Vec<usize>) {
    let dims = schema.all_dimensions(target);
    start.resize(dims.len(), 0);
    stride.resize(dims.len(), 1);
    for axis in count.len()..dims.len() {
        let remaining = dims[axis].declared_size.saturating_sub(start[axis]);
        count.push(remaining.div_ceil(stride[axis].max(1)));
    }
    (start, count, stride)
}

fn format_values(ty: AtomicType, bytes: &[u8]) -> Vec<String> {
    if ty == AtomicType::Char {
        return vec![String::from_utf8_lossy(bytes).into_owned()];
    }
    bytes
        .chunks_exact(ty.size_of())
        .map(|c| match ty {
            AtomicType::Byte => (c[0] as i8).to_string(),
            AtomicType::UByte => c[0].to_string(),
            AtomicType::Short => i16::from_ne_bytes([c[0], c[1]]).to_string(),
            AtomicType::UShort => u16::from_ne_bytes([c[0], c[1]]).to_string(),
            AtomicType::Int => i32::from_ne_bytes([c[0], c[1], c[2], c[3]]).to_string(),
            AtomicType::UInt => u32::from_ne_bytes([c[0], c[1], c[2], c[3]]).to_string(),
            AtomicType::Float => f32::from_ne_bytes([c[0], c[1], c[2], c[3]]).to_string(),
            AtomicType::Int64 => i64::from_ne_bytes(eight(c)).to_string(),
            AtomicType::UInt64 => u64::from_ne_bytes(eight(c)).to_string(),
            AtomicType::Double => f64::from_ne_bytes(eight(c)).to_string(),
            _ => hex::encode(c),
        })
        .collect()
}

fn eight(c: &[u8]) -> [u8; 8] {
    let mut b = [0u8; 8];
    b.copy_from_slice(&c[..8]);
    b
}

fn print_schema(schema: &dyn SchemaProvider, id: SchemaNodeId, depth: usize) {
    let node = schema.node(id);
    let dims: Vec<String> = node
        .dims
        .iter()
        .map(|d| format!("{}={}", d.name, d.declared_size))
        .collect();
    let ty = node.element_type.map(|t| format!(" {}", t)).unwrap_or_default();
    let virt = if node.is_virtual { " (virtual)" } else { "" };
    println!(
        "{}{} {:?}{}{} [{}]",
        "  ".repeat(depth),
        node.name,
        node.kind,
        ty,
        virt,
        dims.join(", ")
    );
    for child in schema.children(id) {
        print_schema(schema, *child, depth + 1);
    }
}

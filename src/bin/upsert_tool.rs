//! Upsert Tool Binary
//!
//! Offline inspection of validDocIds snapshots and preload selection.

use std::collections::HashMap;
use std::path::PathBuf;

use atlas_upsert::assignment::{SegmentAssignment, SegmentMetadata, SegmentState, SegmentStatus};
use atlas_upsert::segment::snapshot;
use atlas_upsert::upsert::plan_preload;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// Upsert metadata tooling
#[derive(Parser, Debug)]
#[command(name = "upsert-tool")]
#[command(about = "Inspect upsert snapshots and preview preload selection")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the contents summary of a validDocIds snapshot file
    Inspect {
        /// Snapshot file path
        file: PathBuf,
    },

    /// Show which segments a partition would preload
    Plan {
        /// Table data directory holding one directory per segment
        #[arg(short, long)]
        table_dir: PathBuf,

        /// Partition to plan for
        #[arg(short, long)]
        partition: u32,

        /// Instance the assignment refers to
        #[arg(short, long, default_value = "local")]
        instance: String,

        /// Segment states on this instance, e.g. `t__0__1__100=ONLINE,t__0__2__200=CONSUMING`
        #[arg(short, long, value_delimiter = ',')]
        segments: Vec<String>,
    },
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,atlas_upsert=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    let result = match args.command {
        Command::Inspect { file } => inspect(&file),
        Command::Plan {
            table_dir,
            partition,
            instance,
            segments,
        } => plan(&table_dir, partition, &instance, &segments),
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn inspect(file: &std::path::Path) -> atlas_upsert::Result<()> {
    match snapshot::inspect_snapshot(file) {
        Ok(info) => {
            println!("file:        {}", file.display());
            println!("size:        {} bytes", info.file_size);
            println!("cardinality: {}", info.cardinality);
            match (info.min_doc_id, info.max_doc_id) {
                (Some(min), Some(max)) => println!("doc ids:     {}..={}", min, max),
                _ => println!("doc ids:     (empty)"),
            }
            println!("checksum:    ok");
            Ok(())
        }
        Err(e) => {
            println!("checksum:    FAILED");
            Err(e)
        }
    }
}

fn plan(
    table_dir: &std::path::Path,
    partition: u32,
    instance: &str,
    segments: &[String],
) -> atlas_upsert::Result<()> {
    let mut assignment = SegmentAssignment::new();
    let mut metadata = HashMap::new();

    for entry in segments {
        let (name, state) = entry.split_once('=').ok_or_else(|| {
            atlas_upsert::UpsertError::Config(format!("Expected name=STATE, got {}", entry))
        })?;
        let state: SegmentState = state.parse()?;

        assignment
            .entry(name.to_string())
            .or_default()
            .insert(instance.to_string(), state);
        let status = match state {
            SegmentState::Consuming => SegmentStatus::InProgress,
            _ => SegmentStatus::Done,
        };
        metadata.insert(name.to_string(), SegmentMetadata::new(name, status));
    }

    let plan = plan_preload(&assignment, &metadata, instance, partition, table_dir);

    println!("partition {} on {}:", partition, instance);
    for request in &plan.selected {
        println!("  preload  {}  ({})", request.segment_name, request.snapshot_path().display());
    }
    for (name, reason) in &plan.skipped {
        println!("  skip     {}  ({})", name, reason);
    }
    Ok(())
}

//! Example: export every refinement of a slice on the caller's thread
//!
//! Uses the blocking iterator, so no executor or runtime is needed.
//!
//! Run with: cargo run --example batch_export -- [output-dir]

use multires_query::{
    iterate, Bitmask, DataType, Dataset, DatasetDescriptor, FieldDescriptor, FieldType,
    InMemoryDataset, LogicBox, QueryParams, Region, StatsCollector,
};
use std::fs;
use std::path::PathBuf;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "multires_query=info".into()),
        )
        .init();

    let out_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("multires-export"));
    fs::create_dir_all(&out_dir)?;

    let descriptor = DatasetDescriptor::new(
        Bitmask::new("V012012012012012012012")?,
        LogicBox::from_size(&[128, 128, 128])?,
        vec![FieldDescriptor::new("density", FieldType::scalar(DataType::U8))],
        vec![0, 1],
    )?;
    let dataset = InMemoryDataset::new(descriptor, |t, _, p| {
        let d2: i64 = p.iter().map(|&c| (c - 64) * (c - 64)).sum();
        if d2 < 40 * 40 { 200.0 + t as f64 } else { 10.0 }
    });

    let stats = StatsCollector::new();
    for timestep in dataset.timesteps().to_vec() {
        let params = QueryParams::new()
            .timestep(timestep)
            .region(Region::new(vec![0.0, 0.0, 64.0], vec![128.0, 128.0, 65.0]))
            .num_refinements(3);
        let Some(results) = iterate(&dataset, dataset.create_access()?, &params)? else {
            continue;
        };

        for result in results.with_stats(stats.clone()) {
            let result = result?;
            let path = out_dir.join(format!(
                "t{}_level{}_{}.raw",
                timestep,
                result.resolution,
                result
                    .data
                    .dims()
                    .iter()
                    .map(|d| d.to_string())
                    .collect::<Vec<_>>()
                    .join("x")
            ));
            fs::write(&path, result.data.bytes())?;
            println!("wrote {}", path.display());
        }
    }

    if let Some(report) = stats.last_report() {
        println!("\nStatistics:\n{}", report);
    }
    Ok(())
}

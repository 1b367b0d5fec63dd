//! Example: progressive rendering loop driven by a background executor
//!
//! A viewer pushes a query, draws each partial answer as it arrives, and
//! replaces the query when the user pans.
//!
//! Run with: cargo run --example progressive_render

use multires_query::{
    Bitmask, DataType, Dataset, DatasetDescriptor, ExecutorConfig, FieldDescriptor, FieldType,
    InMemoryDataset, LogicBox, QueryExecutor, QueryParams, Region, StatsCollector,
};
use std::sync::Arc;
use std::time::Duration;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "multires_query=info".into()),
        )
        .init();

    println!("Progressive Render Demo");
    println!("=======================\n");

    let descriptor = DatasetDescriptor::new(
        Bitmask::new("V0101010101010101010101")?,
        LogicBox::from_size(&[2048, 2048])?,
        vec![FieldDescriptor::new("elevation", FieldType::scalar(DataType::F32))],
        vec![0],
    )?;
    let dataset = Arc::new(
        InMemoryDataset::new(descriptor, |_, _, p| {
            let (x, y) = (p[0] as f64 / 256.0, p[1] as f64 / 256.0);
            (x.sin() * y.cos() * 1000.0).round()
        })
        .with_read_delay(Duration::from_millis(40)),
    );
    println!("Dataset: {}\n", dataset.descriptor().summary());

    let stats = StatsCollector::new();
    let mut executor = QueryExecutor::with_stats(ExecutorConfig::default(), Arc::clone(&stats))?;
    executor.start()?;

    let viewports = [
        Region::new(vec![0.0, 0.0], vec![2048.0, 2048.0]),
        Region::new(vec![512.0, 512.0], vec![1024.0, 1024.0]),
    ];

    for viewport in viewports {
        println!("Viewport {:?} .. {:?}", viewport.p1, viewport.p2);
        let params = QueryParams::new()
            .region(viewport)
            .max_pixels(512u64 * 512)
            .num_refinements(4);
        let Some(token) = executor.push_job(
            Arc::clone(&dataset),
            dataset.create_access()?,
            params,
        )?
        else {
            println!("  nothing to draw\n");
            continue;
        };

        while let Some(result) = executor.wait_result(Duration::from_secs(2)) {
            let range = result.data.value_range()?;
            println!(
                "  level {:2} dims {:?} range {:?} after {:?}",
                result.resolution,
                result.data.dims(),
                range,
                result.elapsed
            );
            if !result.more {
                break;
            }
        }
        println!();
        // A finished plan ignores the token; a live one would stop here
        token.set_true();
    }

    executor.wait_idle();
    executor.stop();

    if let Some(report) = stats.last_report() {
        println!("Statistics:\n{}", report);
    }
    Ok(())
}

// sweep.rs - Threshold sweep entry point

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use cgnomen::cli::{validate_sweep_args, SweepArgs};
use cgnomen::data::loaders::load_metadata;
use cgnomen::logging;
use cgnomen::output::SweepCsvWriter;
use cgnomen::pipeline::simulation::distance_matrix_for;
use cgnomen::pipeline::{arrival_order, run_sweep, SweepConfig};
use cgnomen::prelude::*;
use cgnomen::VERSION;
use std::result::Result;

fn main() {
    if let Err(e) = run_main() {
        eprintln!("❌ ERROR: {}", e);
        std::process::exit(1);
    }
}

fn run_main() -> Result<(), String> {
    let args: SweepArgs = argh::from_env();
    logging::init();

    let settings = validate_sweep_args(&args)?;
    println!("🚀 cgnomen-sweep v{}", VERSION);
    println!(
        "🧮 {} threshold combinations over {} levels, {} workers",
        settings.grid.len(),
        settings.grid.depth(),
        settings.workers
    );
    if let Some(deadline) = settings.deadline {
        println!("⏳ Time budget: {:.2}h", deadline.as_secs_f64() / 3600.0);
    }

    if let Some(n) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build_global()
            .map_err(|e| format!("Failed to configure thread pool: {}", e))?;
        println!("🧵 Threads: {}", n);
    }

    let total_start = Instant::now();

    let matrix = AllelicMatrix::from_file(Path::new(&args.profiles), &args.missing_char)
        .map_err(|e| format!("loading profiles: {}", e))?;
    matrix.print_matrix_statistics("Loaded");

    let metadata = match args.metadata.as_deref() {
        Some(path) => load_metadata(Path::new(path))?,
        None => BTreeMap::new(),
    };
    let store = MemoryEntryStore::from_matrix(&matrix, &metadata);
    let order = arrival_order(&store, &settings.qc);
    if order.is_empty() {
        return Err("no samples pass QC; nothing to simulate".to_string());
    }
    println!("📋 {} of {} samples pass QC", order.len(), store.len());

    let cache = args.matrix_cache.as_deref().map(Path::new);
    let distances = distance_matrix_for(&store, &order, cache).map_err(|e| e.to_string())?;

    let mut writer = SweepCsvWriter::create(Path::new(&args.output), settings.grid.depth())?;
    println!("📝 Streaming results to {}", args.output);

    let config = SweepConfig {
        workers: settings.workers,
        chunk_size: args.chunk_size,
        deadline: settings.deadline,
    };
    let summary = run_sweep(
        &settings.grid,
        Arc::new(distances),
        Arc::new(order),
        &config,
        move |result| writer.write(result).map_err(NomenError::Serialization),
    )
    .map_err(|e| e.to_string())?;

    println!("\n📊 === SWEEP SUMMARY ===");
    println!("  ✅ Completed: {}", summary.completed);
    if summary.failed > 0 {
        println!("  ❌ Failed: {}", summary.failed);
    }
    if summary.timed_out {
        println!("  ⏳ Time budget reached before all candidates ran");
    }
    if let Some(best) = &summary.best {
        let thresholds: Vec<String> = best.thresholds.iter().map(|t| t.to_string()).collect();
        println!(
            "  🏆 Most stable: {} ({} changes)",
            thresholds.join(","),
            best.total_changes
        );
    }
    println!(
        "\n⏱️  Total execution time: {:.2}s",
        total_start.elapsed().as_secs_f64()
    );
    Ok(())
}

// main.rs - CLI entry point

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use cgnomen::cli::Config;
use cgnomen::core::MergePolicyFactory;
use cgnomen::data::loaders::load_metadata;
use cgnomen::data::QcReason;
use cgnomen::logging;
use cgnomen::output;
use cgnomen::pipeline::calculator::StateLayout;
use cgnomen::pipeline::simulation::{distance_matrix_for, log_report};
use cgnomen::pipeline::{arrival_order, RunReport};
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
    let mut args: Args = argh::from_env();
    let command_line = std::env::args().collect::<Vec<String>>().join(" ");

    // Handle generate config first
    if args.generate_config {
        let sample_config = Config::generate_sample();
        println!("{}", sample_config);
        println!("\n💡 Save this content to a .toml file and use --config /path/to/config.toml");
        return Ok(());
    }

    // Load configuration file if specified
    if let Some(config_path) = args.config.clone() {
        args = args.with_config_file(&config_path)?;
    }

    let validation = validate_args(&args)?;
    let profiles = args.profiles.as_deref().ok_or("--profiles is required")?;

    // Runs that touch the state directory keep a log file next to it
    let writes_state = !(args.simulate || args.stats_only || args.dry_run);
    match validation.state_dir.as_deref() {
        Some(dir) if writes_state => {
            let log_path = logging::init_with_run_log(&StateLayout::new(dir).log_dir())?;
            println!("📝 Run log: {}", log_path.display());
        }
        _ => logging::init(),
    }

    println!("🚀 cgnomen v{}", VERSION);
    println!("📏 Thresholds: {}", validation.thresholds);

    // Configure thread pool
    if let Some(n) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build_global()
            .map_err(|e| format!("Failed to configure thread pool: {}", e))?;
        println!("🧵 Threads: {}", n);
    } else {
        println!("🧵 Threads: {} (auto-detected)", rayon::current_num_threads());
    }

    let total_start = Instant::now();

    // Load allelic profiles
    let mut matrix = AllelicMatrix::from_file(Path::new(profiles), &args.missing_char)
        .map_err(|e| format!("loading profiles: {}", e))?;
    matrix.apply_sample_filtering(
        validation.sample_include_regex.as_ref(),
        validation.sample_exclude_regex.as_ref(),
        validation.samples_include_set.as_ref(),
        validation.samples_exclude_set.as_ref(),
    )?;
    matrix.apply_loci_filtering(
        validation.loci_include_regex.as_ref(),
        validation.loci_exclude_regex.as_ref(),
    )?;
    matrix.print_matrix_statistics("Loaded");

    if args.stats_only {
        print_qc_overview(&matrix, &validation.qc);
        return Ok(());
    }

    let metadata = match args.metadata.as_deref() {
        Some(path) => load_metadata(Path::new(path))?,
        None => BTreeMap::new(),
    };
    let mut store = MemoryEntryStore::from_matrix(&matrix, &metadata);
    println!(
        "📋 {} samples ready ({} with metadata)",
        store.len(),
        metadata.len()
    );

    if args.dry_run {
        println!("✅ Dry run completed successfully");
        return Ok(());
    }

    if args.simulate {
        run_simulation(&args, &validation, &store, &command_line)?;
    } else {
        let state_dir = validation
            .state_dir
            .clone()
            .ok_or("--state-dir is required")?;
        run_calculator(&args, &validation, state_dir, &mut store, &command_line)?;
    }

    println!(
        "\n⏱️  Total execution time: {:.2}s",
        total_start.elapsed().as_secs_f64()
    );
    Ok(())
}

fn run_calculator(
    args: &Args,
    validation: &ValidationResult,
    state_dir: PathBuf,
    store: &mut MemoryEntryStore,
    command_line: &str,
) -> Result<(), String> {
    let config = CalculatorConfig {
        thresholds: validation.thresholds.clone(),
        qc: validation.qc.clone(),
        prefix: args.prefix.clone().unwrap_or_default(),
        policy_type: args.merge_policy.clone(),
        policy_config: args.policy_config.clone().unwrap_or_default(),
        state_dir,
    };
    let calculator = Calculator::new(config).map_err(|e| e.to_string())?;
    let layout = calculator.layout().clone();

    println!("\n🔄 Naming samples in {}...", layout.root().display());
    let report = calculator.run(store).map_err(|e| {
        log::error!("❌ Run failed, nothing was persisted: {}", e);
        e.to_string()
    })?;

    let output_dir = match args.output_dir.as_deref() {
        Some(dir) => PathBuf::from(dir),
        None => layout
            .root()
            .join("results")
            .join(chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()),
    };
    write_results(&output_dir, &report, store, command_line)?;
    print_summary(&report);

    #[cfg(feature = "debug-stats")]
    print_cluster_stats(&layout, validation.thresholds.depth())?;

    Ok(())
}

fn write_results(
    output_dir: &Path,
    report: &RunReport,
    store: &MemoryEntryStore,
    command_line: &str,
) -> Result<(), String> {
    output::write_codes_tsv(&output_dir.join("codes.tsv"), &report.codes, command_line)?;
    output::write_history_tsv(&output_dir.join("history.tsv"), &report.changes, command_line)?;
    output::write_qc_failures_tsv(
        &output_dir.join("qc_failures.tsv"),
        &report.failures,
        &report.provisional,
        command_line,
    )?;
    output::write_merge_events_tsv(&output_dir.join("merges.tsv"), &report.renames, command_line)?;
    output::write_metadata_tsv(&output_dir.join("metadata.tsv"), store, command_line)?;
    Ok(())
}

fn print_summary(report: &RunReport) {
    println!("\n📊 === RUN SUMMARY ===");
    println!("  🆕 Newly named: {}", report.newly_named);
    println!("  🔁 Code changes: {}", report.changes.len());
    println!("  🔗 Merges: {} ({} renamed samples)", report.merges, report.renames.len());
    println!("  ❌ QC failures: {}", report.failures.len());
    if report.repaired > 0 {
        println!("  🩹 Restored allele calls: {}", report.repaired);
    }
    if !report.removed.is_empty() {
        println!("  🗑️  Names withdrawn: {}", report.removed.len());
    }
    println!("  ✅ Complete codes: {}", report.names_given);
}

fn run_simulation(
    args: &Args,
    validation: &ValidationResult,
    store: &MemoryEntryStore,
    command_line: &str,
) -> Result<(), String> {
    let order = arrival_order(store, &validation.qc);
    println!(
        "\n🎬 Simulating arrival of {} samples passing QC (chunk size {})",
        order.len(),
        args.chunk_size
    );

    let cache = args.matrix_cache.as_deref().map(Path::new);
    let distances = distance_matrix_for(store, &order, cache).map_err(|e| e.to_string())?;

    let policy = MergePolicyFactory::create(
        &args.merge_policy,
        args.policy_config.as_deref().unwrap_or(""),
    )?;
    let namer = Namer::new(validation.thresholds.clone(), policy);
    let report = Simulation::new(&distances, namer)
        .with_chunk_size(args.chunk_size)
        .with_progress(true)
        .run(&order)
        .map_err(|e| e.to_string())?;
    log_report(&report);

    if let Some(dir) = args.output_dir.as_deref() {
        output::write_simulation_report(
            &Path::new(dir).join("simulation.tsv"),
            &report,
            command_line,
        )?;
    }
    println!("✅ Total code changes: {}", report.total_changes());
    Ok(())
}

fn print_qc_overview(matrix: &AllelicMatrix, qc: &QcSettings) {
    let failing = matrix
        .samples
        .iter()
        .filter(|s| qc.check(&s.calls, None).contains(&QcReason::Core))
        .count();
    println!(
        "🔬 QC: {} of {} samples below {:.0}% presence",
        failing,
        matrix.len(),
        qc.min_presence * 100.0
    );
}

#[cfg(feature = "debug-stats")]
fn print_cluster_stats(layout: &StateLayout, depth: usize) -> Result<(), String> {
    let tree = Tree::load(&layout.tree_file(), depth).map_err(|e| e.to_string())?;
    for (level, count) in tree.clusters_per_level().iter().enumerate() {
        let largest = tree
            .cluster_sizes(level + 1)
            .into_iter()
            .map(|(_, size)| size)
            .max()
            .unwrap_or(0);
        println!("  🌳 Level {}: {} clusters, largest {}", level + 1, count, largest);
    }
    Ok(())
}

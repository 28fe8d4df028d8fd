// inspector.rs - State directory inspector
// Features: tree overview, cluster sizes, profile store health, consistency checks

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use argh::FromArgs;
use cgnomen::core::{Name, Tree};
use cgnomen::data::{ProfileStore, StoreMetadata};
use cgnomen::pipeline::calculator::StateLayout;

// ============================================================================
// CLI ARGUMENTS
// ============================================================================

#[derive(FromArgs)]
/// Inspect a cgnomen state directory
struct Args {
    /// path to the state directory
    #[argh(option)]
    state_dir: String,

    /// number of levels (default: inferred from the saved names)
    #[argh(option)]
    depth: Option<usize>,

    /// show the N largest clusters per level (default: 5)
    #[argh(option, default = "5")]
    top_clusters: usize,

    /// show name and published code of one sample
    #[argh(option)]
    show_sample: Option<String>,

    /// prefix used for published codes (default: none)
    #[argh(option)]
    prefix: Option<String>,

    /// check that every named sample has stored allele calls
    #[argh(switch)]
    validate: bool,

    /// export per-level cluster summary to TSV file
    #[argh(option)]
    export_summary: Option<String>,

    /// quiet mode - minimal output
    #[argh(switch)]
    quiet: bool,
}

// ============================================================================
// STATE LOADING
// ============================================================================

/// Depth of the first stored name, or `None` for an empty tree.
fn infer_depth(tree_file: &Path) -> Result<Option<usize>, Box<dyn std::error::Error>> {
    let file = File::open(tree_file)?;
    let names: BTreeMap<String, Name> = serde_json::from_reader(BufReader::new(file))?;
    Ok(names.values().next().map(Name::len))
}

fn load_tree(layout: &StateLayout, args: &Args) -> Result<Tree, Box<dyn std::error::Error>> {
    let tree_file = layout.tree_file();
    if !tree_file.exists() {
        return Err(format!("No saved tree at {}", tree_file.display()).into());
    }
    let depth = match args.depth {
        Some(depth) => depth,
        None => infer_depth(&tree_file)?.ok_or("saved tree is empty; pass --depth")?,
    };
    if !args.quiet {
        println!("Loading tree: {} (depth {})", tree_file.display(), depth);
    }
    Ok(Tree::load(&tree_file, depth)?)
}

// ============================================================================
// ANALYSIS FUNCTIONS
// ============================================================================

fn analyze_state_overview(layout: &StateLayout, tree: &Tree, args: &Args) {
    if args.quiet {
        return;
    }

    println!("\n=== STATE SUMMARY ===");
    println!("Directory: {}", layout.root().display());
    println!("Depth: {}", tree.depth());
    println!("Named samples: {}", tree.len());
    println!(
        "Lock: {}",
        if layout.lock_file().exists() {
            "present (a run is active or ended abnormally)"
        } else {
            "free"
        }
    );

    let tree_backups = count_entries(&layout.tree_dir(), "tree_");
    let store_backups = count_entries(&layout.backup_dir(), "profiles_");
    println!("Tree backups: {}", tree_backups);
    println!("Profile store backups: {}", store_backups);
}

fn count_entries(dir: &Path, prefix: &str) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| e.file_name().to_string_lossy().starts_with(prefix))
                .count()
        })
        .unwrap_or(0)
}

fn analyze_levels(tree: &Tree, args: &Args) {
    if args.quiet {
        return;
    }

    println!("\n=== CLUSTERS PER LEVEL ===");
    println!("{:<8} {:>10} {:>10} {:>10}", "Level", "Clusters", "Largest", "Singletons");
    println!("{}", "=".repeat(42));
    for (i, count) in tree.clusters_per_level().iter().enumerate() {
        let sizes = tree.cluster_sizes(i + 1);
        let largest = sizes.first().map_or(0, |(_, size)| *size);
        let singletons = sizes.iter().filter(|(_, size)| *size == 1).count();
        println!("{:<8} {:>10} {:>10} {:>10}", i + 1, count, largest, singletons);
    }

    if args.top_clusters == 0 {
        return;
    }
    for level in 1..=tree.depth() {
        println!("\nLargest clusters at level {}:", level);
        for (name, size) in tree.cluster_sizes(level).iter().take(args.top_clusters) {
            println!("  {:<20} {:>8}", name.to_string(), size);
        }
    }
}

fn analyze_store(layout: &StateLayout, args: &Args) -> Option<StoreMetadata> {
    let metadata = match StoreMetadata::read(&layout.profiles_dir()) {
        Ok(Some(metadata)) => metadata,
        Ok(None) => {
            if !args.quiet {
                println!("\n⚠️  No profile store in {}", layout.profiles_dir().display());
            }
            return None;
        }
        Err(e) => {
            eprintln!("❌ ERROR reading profile store metadata: {}", e);
            return None;
        }
    };

    if !args.quiet {
        println!("\n=== PROFILE STORE ===");
        println!("Profiles: {}", metadata.size);
        println!("Capacity: {}", metadata.capacity);
        println!(
            "Load factor: {:.2}",
            if metadata.capacity > 0 {
                metadata.size as f64 / metadata.capacity as f64
            } else {
                0.0
            }
        );
        println!("Loci per profile: {}", metadata.loci);
        println!("Completed runs: {}", metadata.runs);
        println!("Free slots below high-water mark: {}", metadata.last.saturating_sub(metadata.size));
    }
    Some(metadata)
}

fn show_sample(tree: &Tree, key: &str, prefix: &str) {
    println!("\n=== SAMPLE {} ===", key);
    match tree.get_name(key) {
        Some(name) => {
            println!("Full name: {}", name);
            if let Some(code) = tree.published_codes(prefix).into_iter().find(|c| c.key == key) {
                println!("Published code: {}", code.code);
            }
        }
        None => println!("Not named"),
    }
}

fn validate_state(layout: &StateLayout, tree: &Tree, metadata: Option<&StoreMetadata>) -> bool {
    println!("\n=== VALIDATION ===");
    let Some(metadata) = metadata else {
        println!("❌ No profile store to validate against");
        return tree.is_empty();
    };

    let store = match ProfileStore::open(&layout.profiles_dir(), metadata.loci) {
        Ok(store) => store,
        Err(e) => {
            println!("❌ Profile store failed to open: {}", e);
            return false;
        }
    };

    let missing: Vec<&String> = tree.names().keys().filter(|k| !store.contains(k)).collect();
    if missing.is_empty() {
        println!("✅ All {} named samples have stored allele calls", tree.len());
        true
    } else {
        println!("❌ {} named samples have no stored allele calls", missing.len());
        for key in missing.iter().take(10) {
            println!("  {}", key);
        }
        if missing.len() > 10 {
            println!("  ... and {} more", missing.len() - 10);
        }
        false
    }
}

fn export_summary_to_tsv(tree: &Tree, output_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut file = BufWriter::new(File::create(output_path)?);
    writeln!(file, "level\tclusters\tlargest\tsingletons")?;
    for (i, count) in tree.clusters_per_level().iter().enumerate() {
        let sizes = tree.cluster_sizes(i + 1);
        let largest = sizes.first().map_or(0, |(_, size)| *size);
        let singletons = sizes.iter().filter(|(_, size)| *size == 1).count();
        writeln!(file, "{}\t{}\t{}\t{}", i + 1, count, largest, singletons)?;
    }
    file.flush()?;
    println!("✅ Summary exported to: {}", output_path);
    Ok(())
}

// ============================================================================
// MAIN FUNCTION
// ============================================================================

fn main() {
    let args: Args = argh::from_env();

    if !args.quiet {
        println!("🔍 cgnomen State Inspector");
        println!("==========================");
    }

    let layout = StateLayout::new(Path::new(&args.state_dir));
    let tree = match load_tree(&layout, &args) {
        Ok(tree) => tree,
        Err(e) => {
            eprintln!("❌ ERROR loading tree: {}", e);
            std::process::exit(1);
        }
    };

    analyze_state_overview(&layout, &tree, &args);
    analyze_levels(&tree, &args);
    let metadata = analyze_store(&layout, &args);

    if let Some(key) = &args.show_sample {
        show_sample(&tree, key, args.prefix.as_deref().unwrap_or(""));
    }

    if args.validate && !validate_state(&layout, &tree, metadata.as_ref()) {
        std::process::exit(1);
    }

    if let Some(export_path) = &args.export_summary {
        if let Err(e) = export_summary_to_tsv(&tree, export_path) {
            eprintln!("❌ ERROR exporting summary: {}", e);
            std::process::exit(1);
        }
    }

    if !args.quiet {
        println!("\n✅ State inspection completed successfully");
        println!("\nUsage examples:");
        println!("  --top-clusters 10                    Show the 10 largest clusters per level");
        println!("  --show-sample S1 --prefix LMO1       Show one sample's name and code");
        println!("  --validate                           Check tree against the profile store");
        println!("  --export-summary out.tsv             Export per-level summary to TSV");
        println!("  --quiet                              Minimal output mode");
    }
}

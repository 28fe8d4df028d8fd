// args.rs - Command line arguments definition

use argh::FromArgs;

#[derive(FromArgs)]
/// cgnomen - Incremental hierarchical cgMLST nomenclature
pub struct Args {
    /// path to allelic profile matrix (.tsv or .csv)
    #[argh(option)]
    pub profiles: Option<String>,

    /// path to sample metadata table (TSV: key, length, upload_date, code, history)
    #[argh(option)]
    pub metadata: Option<String>,

    /// state directory holding the tree, profile store, lock and logs
    #[argh(option)]
    pub state_dir: Option<String>,

    /// directory for result tables (default: <state-dir>/results)
    #[argh(option)]
    pub output_dir: Option<String>,

    /// comma separated distance thresholds in percent, one per level (e.g. 40,20,10,5)
    #[argh(option)]
    pub thresholds: Option<String>,

    /// prefix of published codes, e.g. LMO1 gives "LMO1 - 1.2" (default: none)
    #[argh(option)]
    pub prefix: Option<String>,

    /// minimum fraction of called loci for a sample to be named (default: 0.95)
    #[argh(option, default = "0.95")]
    pub min_presence: f64,

    /// minimum accepted assembly length in bases
    #[argh(option)]
    pub min_length: Option<u64>,

    /// maximum accepted assembly length in bases
    #[argh(option)]
    pub max_length: Option<u64>,

    /// merge policy: permissive, margin (default: permissive)
    #[argh(option, default = "String::from(\"permissive\")")]
    pub merge_policy: String,

    /// merge policy parameters as key=value pairs (e.g. "margin=0.25,squared=true")
    #[argh(option)]
    pub policy_config: Option<String>,

    /// missing data character (default: -)
    #[argh(option, default = "String::from(\"-\")")]
    pub missing_char: String,

    /// number of threads (default: auto-detect)
    #[argh(option)]
    pub threads: Option<usize>,

    /// include only samples matching regex pattern
    #[argh(option)]
    pub include_samples: Option<String>,

    /// exclude samples matching regex pattern
    #[argh(option)]
    pub exclude_samples: Option<String>,

    /// include only loci matching regex pattern
    #[argh(option)]
    pub include_loci: Option<String>,

    /// exclude loci matching regex pattern
    #[argh(option)]
    pub exclude_loci: Option<String>,

    /// include only samples listed in a file (one sample per line)
    #[argh(option)]
    pub include_samples_list: Option<String>,

    /// exclude samples listed in a file (one sample per line)
    #[argh(option)]
    pub exclude_samples_list: Option<String>,

    /// replay sample arrival by upload date instead of naming (stability simulation)
    #[argh(switch)]
    pub simulate: bool,

    /// samples added per simulated run (default: 30)
    #[argh(option, default = "30")]
    pub chunk_size: usize,

    /// distance matrix cache for simulations (.lz4), built when missing
    #[argh(option)]
    pub matrix_cache: Option<String>,

    /// show matrix statistics only, then exit
    #[argh(switch)]
    pub stats_only: bool,

    /// validate inputs without computation (dry run)
    #[argh(switch)]
    pub dry_run: bool,

    /// path to TOML configuration file
    #[argh(option)]
    pub config: Option<String>,

    /// generate sample configuration file and exit
    #[argh(switch)]
    pub generate_config: bool,
}

#[derive(FromArgs)]
/// cgnomen-sweep - Search threshold combinations for the most stable codes
pub struct SweepArgs {
    /// path to allelic profile matrix (.tsv or .csv)
    #[argh(option)]
    pub profiles: String,

    /// path to sample metadata table with upload dates
    #[argh(option)]
    pub metadata: Option<String>,

    /// per-level candidates separated by ';', each a list "20,25" or a range "20:30"
    #[argh(option)]
    pub levels: String,

    /// step used to walk ranges (default: 1.0)
    #[argh(option, default = "1.0")]
    pub step: f64,

    /// results CSV, appended row by row
    #[argh(option)]
    pub output: String,

    /// number of simulation workers (default: available cores minus one)
    #[argh(option)]
    pub workers: Option<usize>,

    /// wall-clock budget in hours; no new candidates start after it
    #[argh(option)]
    pub max_hours: Option<f64>,

    /// samples added per simulated run (default: 30)
    #[argh(option, default = "30")]
    pub chunk_size: usize,

    /// minimum fraction of called loci for a sample to take part (default: 0.95)
    #[argh(option, default = "0.95")]
    pub min_presence: f64,

    /// minimum accepted assembly length in bases
    #[argh(option)]
    pub min_length: Option<u64>,

    /// maximum accepted assembly length in bases
    #[argh(option)]
    pub max_length: Option<u64>,

    /// missing data character (default: -)
    #[argh(option, default = "String::from(\"-\")")]
    pub missing_char: String,

    /// distance matrix cache (.lz4), built when missing
    #[argh(option)]
    pub matrix_cache: Option<String>,

    /// number of threads for the matrix build (default: auto-detect)
    #[argh(option)]
    pub threads: Option<usize>,
}

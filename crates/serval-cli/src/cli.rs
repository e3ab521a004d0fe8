//! CLI argument definitions: the top-level `Cli` struct and the value
//! enums for oracle and method selection.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use serval_engine::Strategy;

#[derive(Parser, Debug)]
#[command(name = "serval")]
#[command(about = "Serializability checker for network systems")]
#[command(version)]
pub(crate) struct Cli {
    /// Network system to check: a `.ser` source or NS JSON.
    pub file: PathBuf,

    /// Oracle timeout per query in seconds (0 for none).
    #[arg(long, default_value_t = 300)]
    pub timeout: u64,

    /// Wall-clock limit for the whole check in seconds (0 for none).
    #[arg(long, default_value_t = 0)]
    pub overall_timeout: u64,

    /// Skip bidirectional pruning of the per-disjunct nets.
    #[arg(long)]
    pub without_bidirectional: bool,

    /// Keep redundant linear-set components and conjuncts.
    #[arg(long)]
    pub without_remove_redundant: bool,

    /// Build the complement of Ser without the generate-less optimisation.
    #[arg(long)]
    pub without_generate_less: bool,

    /// Process Kleene stars in syntactic order.
    #[arg(long)]
    pub without_smart_kleene_order: bool,

    /// Reuse cached SMPT answers across runs.
    #[arg(long)]
    pub use_cache: bool,

    /// Directory for cached SMPT answers.
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Reachability oracle.
    #[arg(long, value_enum, default_value_t = OracleKind::Explicit)]
    pub oracle: OracleKind,

    /// Command running SMPT, split on whitespace
    /// (e.g. "python3 -m smpt").
    #[arg(long, value_name = "CMD")]
    pub smpt_command: Option<String>,

    /// SMPT methods, comma-separated.
    #[arg(long, value_delimiter = ',', value_name = "METHODS")]
    pub smpt_methods: Vec<String>,

    /// Decision methods to run.
    #[arg(long, value_enum, default_value_t = MethodChoice::Both)]
    pub method: MethodChoice,

    /// Disjuncts decided in parallel.
    #[arg(long, default_value_t = 1)]
    pub jobs: usize,

    /// Node budget of the semilinear reachability builder.
    #[arg(long)]
    pub max_nodes: Option<usize>,

    /// Longest firing sequence the explicit oracle explores.
    #[arg(long)]
    pub max_trace_len: Option<usize>,

    /// Print the statistics report as JSON instead of text.
    #[arg(long)]
    pub json: bool,

    /// Also write the statistics report to this file.
    #[arg(long, value_name = "PATH")]
    pub stats_out: Option<PathBuf>,

    /// Write the proof or trace certificate into this directory.
    #[arg(long, value_name = "DIR", conflicts_with = "check_certificate")]
    pub create_certificate: Option<PathBuf>,

    /// Check the certificate in this directory against FILE instead of
    /// running a check.
    #[arg(long, value_name = "DIR")]
    pub check_certificate: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OracleKind {
    /// In-process bounded exploration.
    Explicit,
    /// External SMPT process.
    Smpt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum MethodChoice {
    Oracle,
    Proof,
    Both,
}

impl From<MethodChoice> for Strategy {
    fn from(choice: MethodChoice) -> Self {
        match choice {
            MethodChoice::Oracle => Strategy::Oracle,
            MethodChoice::Proof => Strategy::Proof,
            MethodChoice::Both => Strategy::Both,
        }
    }
}

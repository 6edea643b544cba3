use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use coord_core::model::NetworkKind;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Opts {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub cmd: OptsCmd,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Path to the corpus's `.redb` file.
    #[arg(long, global = true)]
    pub db: PathBuf,
}

#[derive(Debug, Subcommand)]
#[command(rename_all = "snake_case")]
pub enum OptsCmd {
    /// Ingest one or more files into the corpus.
    #[command(rename_all = "snake_case")]
    Preprocess {
        #[arg(long, value_enum)]
        format: IngestFormat,
        /// Abort with exit code 3 if more than this many rows are rejected
        /// as malformed across the whole invocation. Unset means unlimited.
        #[arg(long)]
        max_malformed_rows: Option<u64>,
        files: Vec<PathBuf>,
    },
    /// Resolve pending URLs, or clear resolver markers for retry.
    #[command(rename_all = "snake_case")]
    ResolveUrls {
        #[arg(long)]
        n_cpus: Option<usize>,
        #[arg(long, value_enum)]
        clear_markers: Option<ClearMarkersArg>,
    },
    /// Materialize one network's edge table.
    #[command(rename_all = "snake_case")]
    Compute {
        #[arg(value_enum)]
        network: NetworkArg,
        #[arg(long)]
        time_window: f64,
        #[arg(long)]
        n_cpus: Option<usize>,
        #[arg(long, default_value_t = 1)]
        min_edge_weight: u64,
        #[arg(long, default_value_t = 0.8)]
        similarity_threshold: f64,
        #[arg(long)]
        resolved: bool,
    },
    /// Write a computed network out as GraphML or CSV.
    #[command(rename_all = "snake_case")]
    ExportNetwork {
        out_path: PathBuf,
        #[arg(value_enum)]
        network: NetworkArg,
        #[arg(long, value_enum)]
        output_format: OutputFormatArg,
        #[arg(long, default_value_t = 10)]
        n_messages: usize,
        #[arg(long)]
        include_self_loops: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum IngestFormat {
    TwitterJson,
    Csv,
}

impl From<IngestFormat> for crate::ingest::IngestFormat {
    fn from(arg: IngestFormat) -> Self {
        match arg {
            IngestFormat::TwitterJson => crate::ingest::IngestFormat::TwitterJson,
            IngestFormat::Csv => crate::ingest::IngestFormat::Csv,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum ClearMarkersArg {
    Transient,
    All,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum OutputFormatArg {
    Graphml,
    Csv,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum NetworkArg {
    CoRetweet,
    CoTweet,
    CoSimilarTweet,
    CoLink,
    CoReply,
    CoPost,
}

impl From<NetworkArg> for NetworkKind {
    fn from(arg: NetworkArg) -> Self {
        match arg {
            NetworkArg::CoRetweet => NetworkKind::CoRetweet,
            NetworkArg::CoTweet => NetworkKind::CoTweet,
            NetworkArg::CoSimilarTweet => NetworkKind::CoSimilarTweet,
            NetworkArg::CoLink => NetworkKind::CoLink,
            NetworkArg::CoReply => NetworkKind::CoReply,
            NetworkArg::CoPost => NetworkKind::CoPost,
        }
    }
}

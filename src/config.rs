use std::path::PathBuf;

use clap::{Args, Parser};

use crate::engine::{EngineConfig, ScoreWeights};

pub const WAL_FILE_NAME: &str = "resalloc.wal";

/// Process settings. Every field can come from the environment or a flag.
#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Directory holding the WAL.
    #[arg(long, global = true, env = "RESALLOC_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Serve Prometheus metrics on this port.
    #[arg(long, global = true, env = "RESALLOC_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// WAL appends since the last compaction before compacting again.
    #[arg(long, global = true, env = "RESALLOC_COMPACT_THRESHOLD", default_value_t = 1000)]
    pub compact_threshold: u64,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true, env = "RESALLOC_LOG", default_value = "info")]
    pub log: String,

    #[command(flatten)]
    pub weights: WeightArgs,
}

#[derive(Debug, Clone, Copy, Args)]
pub struct WeightArgs {
    #[arg(long = "weight-exact", global = true, env = "RESALLOC_WEIGHT_EXACT", default_value_t = 2)]
    pub exact_resource: u32,

    #[arg(
        long = "weight-shared-group",
        global = true,
        env = "RESALLOC_WEIGHT_SHARED_GROUP",
        default_value_t = 10
    )]
    pub shared_group: u32,

    #[arg(
        long = "weight-group-member",
        global = true,
        env = "RESALLOC_WEIGHT_GROUP_MEMBER",
        default_value_t = 10
    )]
    pub group_member: u32,

    #[arg(long = "weight-top-group", global = true, env = "RESALLOC_WEIGHT_TOP_GROUP", default_value_t = 5)]
    pub same_top_group: u32,
}

#[derive(Parser)]
#[command(no_binary_name = true)]
struct EnvOnly {
    #[command(flatten)]
    config: Config,
}

impl Config {
    /// Settings from `RESALLOC_*` variables and defaults alone.
    pub fn from_env() -> Result<Self, clap::Error> {
        EnvOnly::try_parse_from(std::iter::empty::<String>()).map(|p| p.config)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE_NAME)
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            weights: self.weights.into(),
        }
    }
}

impl From<WeightArgs> for ScoreWeights {
    fn from(w: WeightArgs) -> Self {
        ScoreWeights {
            exact_resource: w.exact_resource,
            shared_group: w.shared_group,
            group_member: w.group_member,
            same_top_group: w.same_top_group,
        }
    }
}

//! Server configuration (§4.10): CLI flags via `clap`, with environment
//! overrides matching the teacher's `RUST_LOG` convention (`layer-app`).

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "sb-broker", about = "splone broker — plugin RPC server", version)]
pub struct Config {
    /// Address to listen for plugin connections on.
    #[arg(long, env = "SB_LISTEN", default_value = "127.0.0.1:7772")]
    pub listen: String,

    /// Directory holding the server's long-term key material (§6),
    /// produced by `sb-makekey add`.
    #[arg(long, env = "SB_KEYS_DIR", default_value = ".keys")]
    pub keys_dir: PathBuf,

    /// Max events drained from a connection's queue per scheduling turn (§4.7).
    #[arg(long, env = "SB_QUEUE_DRAIN_BATCH", default_value_t = sb_broker_core::DEFAULT_QUEUE_DRAIN_BATCH)]
    pub queue_drain_batch: usize,
}

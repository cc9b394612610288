use std::path::PathBuf;

use clap::{Args, Parser};

pub const DEFAULT_PORT: u16 = 6379;

/// One gibibyte, the largest size the memory map may grow to unless configured otherwise.
pub const DEFAULT_MAP_SIZE: usize = 1024 * 1024 * 1024;

#[derive(Parser, Debug, Clone)]
#[command(version, about = "A Redis-compatible server persisting its keyspace in LMDB")]
pub struct Config {
    /// The address to bind to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// The port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    #[command(flatten)]
    pub store: StoreConfig,
}

#[derive(Args, Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the LMDB data and lock files
    #[arg(long = "data-dir", env = "LMDIS_DATA_DIR", default_value = "data")]
    pub path: PathBuf,

    /// Maximum size in bytes of the memory map, which bounds the database size
    #[arg(long, env = "LMDIS_MAP_SIZE", default_value_t = DEFAULT_MAP_SIZE)]
    pub map_size: usize,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> StoreConfig {
        StoreConfig {
            path: path.into(),
            map_size: DEFAULT_MAP_SIZE,
        }
    }
}

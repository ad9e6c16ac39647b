use clap::Parser;
use std::path::PathBuf;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "tsdb-console-server",
    version,
    about = "TSDB admin console backend (proxy, key config, energy aggregation)"
)]
pub struct Args {
    /// Interface to listen on
    #[arg(long, env = "TSDB_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    #[arg(long, env = "TSDB_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// UI build directory; falls back to `TSDB_STATIC_ROOT`, then a placeholder page
    #[arg(long)]
    pub static_root: Option<PathBuf>,

    /// Print the OpenAPI document and exit
    #[arg(long, default_value_t = false)]
    pub print_openapi: bool,
}

impl Args {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

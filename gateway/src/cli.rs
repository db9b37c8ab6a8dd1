use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser)]
pub struct Opts {
    /// The address to listen on for the HTTP API; overrides `HTTP_PORT`.
    #[clap(long)]
    pub http_address: Option<SocketAddr>,

    /// Where to permanently store data; overrides `DATA_DIR`.
    #[clap(long)]
    pub data_dir: Option<PathBuf>,

    /// If enabled logs will be in json format
    #[clap(short, long)]
    pub json: bool,
}

impl Opts {
    pub fn read() -> Opts {
        Opts::parse()
    }
}

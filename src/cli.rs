use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "stevedore",
    version,
    about = "Container image registry server speaking the Docker v1 protocol",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    Serve {
        #[arg(long, help = "Address to bind")]
        host: Option<String>,

        #[arg(long, help = "Port to listen on")]
        port: Option<u16>,

        #[arg(long, help = "Directory holding registry blobs")]
        data_dir: Option<PathBuf>,
    },
}

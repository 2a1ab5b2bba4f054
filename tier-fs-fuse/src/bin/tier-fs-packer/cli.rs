use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Pack the built executables into a fresh image
    Pack {
        /// Executable source directory
        #[arg(long, short)]
        source: PathBuf,

        /// Executable target directory
        #[arg(long, short)]
        target: PathBuf,

        /// Output directory
        #[arg(long, short = 'O')]
        out_dir: PathBuf,

        /// Image size in MiB
        #[arg(long, default_value_t = 16)]
        size: u64,
    },

    /// List a directory of an image
    Ls {
        /// Image file
        image: PathBuf,

        #[arg(default_value = "/")]
        path: String,
    },

    /// Print a file of an image to stdout
    Cat {
        /// Image file
        image: PathBuf,

        path: String,
    },
}

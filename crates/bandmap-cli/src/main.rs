//! bandmap command line
//!
//! Maps a sparse disk-image bundle onto a read-only device-mapper device
//! and keeps it there until interrupted.

mod mount;
mod output;

use clap::{ArgAction, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "bandmap")]
#[command(about = "Expose a sparse disk-image bundle as a read-only block device", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the `.sparsebundle` directory
    bundle: PathBuf,

    /// Name of the mapped device (default: derived from the bundle name)
    #[arg(short = 'd', long = "name")]
    name: Option<String>,

    /// More output; repeat for per-band detail
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Simulate attach/detach without touching the kernel
    #[arg(short = 'N', long)]
    dry_run: bool,
}

impl From<Cli> for mount::MountOptions {
    fn from(cli: Cli) -> Self {
        mount::MountOptions {
            bundle: cli.bundle,
            name: cli.name,
            verbose: cli.verbose,
            dry_run: cli.dry_run,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    output::init_logging(cli.verbose);

    let code = match mount::execute(cli.into()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}

//! 🚀 tbx-cli: the front door. Loads config, sets up logging, and lets the library do
//! the heavy lifting. Like a manager. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "tbx",
    version,
    about = "Transform tabular extracts and load them into a remote record store"
)]
struct Cli {
    /// Path to the run's TOML config. Without it, only TBX_* environment variables are read.
    #[arg(short, long, default_value = "tbx.toml")]
    config: PathBuf,
}

/// 🚀 main(): where it all begins.
///
/// 1. Init tracing (RUST_LOG decides how chatty)
/// 2. Parse args
/// 3. Load config
/// 4. Run the steps and print the summary table
/// 5. On a fatal error, peel the cause chain and exit 1
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // 🔒 A missing file is not an error: env vars alone can describe a run
    let config_file = cli.config.as_path();
    let config_file = match config_file.try_exists().with_context(|| {
        format!(
            "💀 Could not check whether '{}' exists. Permissions, or a relative path \
             resolving somewhere unexpected? Try an absolute path.",
            config_file.display()
        )
    })? {
        true => Some(config_file),
        false => None,
    };

    let app_config = tbx::app_config::load_config(config_file).context(
        "💀 In tbx-cli, main, we couldn't load the config. Check the step names and the \
         section headers, someone may have put a tab where a space should be.",
    )?;

    match tbx::run(app_config).await {
        Ok(report) => {
            println!("{}", tbx::progress::run_summary(&report));
            Ok(())
        }
        Err(err) => {
            error!("💀 error: {}", err);
            // -- 🧅 peel the onion, one layer at a time
            let mut smells_like_the_network = false;
            for cause in err.chain().skip(1) {
                error!("⚠️  cause: {}", cause);
                let cause_str = cause.to_string();
                if cause_str.contains("error sending request")
                    || cause_str.contains("Connection refused")
                    || cause_str.contains("connection refused")
                    || cause_str.contains("dns error")
                {
                    smells_like_the_network = true;
                }
            }
            if smells_like_the_network {
                error!(
                    "🔧 hint: the record store or the webhook isn't reachable. Check the \
                     instance URL, the login URL (sandbox?), and your network. ☕"
                );
            }
            std::process::exit(1);
        }
    }
}

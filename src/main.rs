mod audio;
mod cli;
mod clock;
mod config;
mod console;
mod controller;
mod error;
mod input;
mod mpv;
mod session;
mod store;
mod subtitle;
mod synthesis;
#[cfg(test)]
mod test_support;
mod timeline;
mod tts;

use clap::Parser;
use cli::Cli;
use colored::*;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Diagnostics only when asked for; the console lines are the normal output.
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .try_init();
    }

    if let Err(e) = session::run(cli).await {
        eprintln!("{} {}", "error:".red().bold(), e);
        if let Some(hint) = e.hint() {
            eprintln!("{} {}", "hint:".yellow().bold(), hint);
        }
        std::process::exit(1);
    }
}

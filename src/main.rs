mod app;
mod cli;
mod collaborators;
mod daemon;
mod logging;
mod model;
mod paths;
mod registry;
mod runner;
mod scheduler;
mod settings;
mod store;
mod template;

use clap::Parser;

#[tokio::main]
async fn main() {
    if let Err(err) = app::run(cli::Cli::parse()).await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

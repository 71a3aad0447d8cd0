mod cli;
mod config;
mod logging;
mod process;
mod relocate;
mod runner;

fn main() -> anyhow::Result<()> {
    let app = cli::parse();
    logging::init(app.verbose);
    runner::run(app)
}

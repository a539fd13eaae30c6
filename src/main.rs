mod app;
mod cli;

fn main() {
    let cli = cli::parse();

    if let Err(e) = vidopt::logging::init(cli.verbose, cli.log_file.as_deref()) {
        eprintln!("Warning: {:#}", e);
    }

    app::run(cli);
}

use std::process::ExitCode;
use taskmon::commands::{self, Cli};
use taskmon::utils::logger::init_logger;

fn main() -> ExitCode {
    let cli = Cli::parse_args();

    if let Err(err) = init_logger(cli.registry.log_level.as_deref()) {
        eprintln!("invalid log level: {err}");
        return ExitCode::from(1);
    }

    match commands::execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(1)
        }
    }
}

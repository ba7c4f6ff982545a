use clap::{builder::ValueParser, Arg, Command};

pub const ARG_VERBOSITY: &str = "verbosity";
pub const ARG_LOG_FORMAT: &str = "log-format";

const VERBOSITY_HELP: &str =
    "Increase verbosity: -v WARN, -vv INFO, -vvv DEBUG, -vvvv TRACE (errors only without -v)";

/// Accepts a `-v` count or a level name; names map onto the same count that
/// `start` turns into a tracing level (no `-v` keeps errors only).
#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(|level: &str| -> std::result::Result<u8, String> {
        let count = match level.parse::<u8>() {
            Ok(count) if count <= 4 => count,
            Ok(_) => return Err(format!("verbosity out of range (0-4): {level}")),
            Err(_) => match level.to_ascii_lowercase().as_str() {
                "error" => 0,
                "warn" => 1,
                "info" => 2,
                "debug" => 3,
                "trace" => 4,
                _ => return Err(format!("invalid log level: {level}")),
            },
        };
        Ok(count)
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VERBOSITY)
                .short('v')
                .long("verbose")
                .help(VERBOSITY_HELP)
                .env("FITSESSION_LOG_LEVEL")
                .global(true)
                .action(clap::ArgAction::Count)
                .value_parser(validator_log_level()),
        )
        .arg(
            Arg::new(ARG_LOG_FORMAT)
                .long("log-format")
                .help("Log output format")
                .env("FITSESSION_LOG_FORMAT")
                .global(true)
                .default_value("text")
                .value_parser(["text", "json"]),
        )
}

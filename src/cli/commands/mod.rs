pub mod logging;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ColorChoice, Command,
};

pub const ARG_API_URL: &str = "api-url";
pub const ARG_CREDENTIALS: &str = "credentials";
pub const ARG_TIMEOUT: &str = "timeout";

pub const DEFAULT_CREDENTIALS_FILE: &str = "fitsession-credentials.json";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let command = Command::new("fitsession")
        .about("Session client for the fitness platform API")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new(ARG_API_URL)
                .short('u')
                .long("api-url")
                .help("API base URL, example: https://api.fitness.tld")
                .env("FITSESSION_API_URL")
                .global(true),
        )
        .arg(
            Arg::new(ARG_CREDENTIALS)
                .short('c')
                .long("credentials")
                .help("Path of the file holding the stored token pair")
                .env("FITSESSION_CREDENTIALS")
                .default_value(DEFAULT_CREDENTIALS_FILE)
                .global(true),
        )
        .arg(
            Arg::new(ARG_TIMEOUT)
                .long("timeout")
                .help("Request timeout in seconds")
                .env("FITSESSION_TIMEOUT")
                .default_value("10")
                .global(true)
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .subcommand(
            Command::new("login")
                .about("Log in and store the returned token pair")
                .arg(
                    Arg::new("email")
                        .short('e')
                        .long("email")
                        .help("Account email")
                        .env("FITSESSION_EMAIL")
                        .required(true),
                )
                .arg(
                    Arg::new("password")
                        .short('p')
                        .long("password")
                        .help("Account password")
                        .env("FITSESSION_PASSWORD")
                        .hide_env_values(true)
                        .required(true),
                ),
        )
        .subcommand(Command::new("logout").about("Revoke the session and clear stored tokens"))
        .subcommand(Command::new("whoami").about("Show the profile of the stored session"))
        .subcommand(
            Command::new("request")
                .about("Send a request through the session-aware client")
                .arg(
                    Arg::new("method")
                        .help("HTTP method, example: GET")
                        .required(true),
                )
                .arg(
                    Arg::new("path")
                        .help("Request path, example: /workouts")
                        .required(true),
                )
                .arg(
                    Arg::new("data")
                        .short('d')
                        .long("data")
                        .help("JSON request body"),
                ),
        );

    logging::with_args(command)
}

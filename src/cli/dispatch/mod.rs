use crate::cli::{
    actions::{login, request, Action},
    commands::{self, ARG_API_URL, ARG_CREDENTIALS, ARG_TIMEOUT},
    globals::GlobalArgs,
};
use anyhow::{anyhow, Context, Result};
use secrecy::SecretString;
use std::{path::PathBuf, time::Duration};

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let (name, sub) = matches
        .subcommand()
        .context("missing subcommand, see --help")?;

    let globals = globals(sub)?;

    match name {
        "login" => Ok(Action::Login(login::Args {
            globals,
            email: sub
                .get_one::<String>("email")
                .cloned()
                .context("missing required argument: --email")?,
            password: sub
                .get_one::<String>("password")
                .cloned()
                .map(SecretString::from)
                .context("missing required argument: --password")?,
        })),
        "logout" => Ok(Action::Logout(globals)),
        "whoami" => Ok(Action::Whoami(globals)),
        "request" => {
            let method = sub
                .get_one::<String>("method")
                .context("missing required argument: METHOD")?;
            let method = reqwest::Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .with_context(|| format!("invalid HTTP method: {method}"))?;
            let path = sub
                .get_one::<String>("path")
                .cloned()
                .context("missing required argument: PATH")?;
            let body = sub
                .get_one::<String>("data")
                .map(|raw| serde_json::from_str(raw))
                .transpose()
                .context("--data must be valid JSON")?;

            Ok(Action::Request(request::Args {
                globals,
                method,
                path,
                body,
            }))
        }
        other => Err(anyhow!("unknown subcommand: {other}")),
    }
}

fn globals(matches: &clap::ArgMatches) -> Result<GlobalArgs> {
    let api_url = matches
        .get_one::<String>(ARG_API_URL)
        .cloned()
        .context("missing required argument: --api-url")?;
    let credentials_path = matches
        .get_one::<String>(ARG_CREDENTIALS)
        .map_or_else(|| PathBuf::from(commands::DEFAULT_CREDENTIALS_FILE), PathBuf::from);

    let mut globals = GlobalArgs::new(api_url, credentials_path);
    if let Some(timeout) = matches.get_one::<u64>(ARG_TIMEOUT).copied() {
        globals.set_timeout(Duration::from_secs(timeout));
    }

    Ok(globals)
}

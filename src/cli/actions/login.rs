use crate::{cli::globals::GlobalArgs, LoginRequest, SessionContext};
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use tracing::instrument;

#[derive(Debug)]
pub struct Args {
    pub globals: GlobalArgs,
    pub email: String,
    pub password: SecretString,
}

/// Logs in and leaves the token pair in the credentials file.
/// # Errors
/// Returns an error if the credentials are rejected or the profile cannot be loaded.
#[instrument(skip_all, fields(email = %args.email))]
pub async fn execute(args: Args) -> Result<()> {
    let client = args.globals.client()?;
    let session = SessionContext::new(client);
    session.listen();

    session
        .login(LoginRequest::new(args.email, args.password.expose_secret()))
        .await
        .context("login failed")?;

    let user = session.user().context("login did not yield a profile")?;
    println!("{}", serde_json::to_string_pretty(&user)?);

    Ok(())
}

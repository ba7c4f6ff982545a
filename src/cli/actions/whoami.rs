use crate::{cli::globals::GlobalArgs, SessionContext};
use anyhow::{bail, Result};

/// Runs the mount probe and prints the resolved profile.
/// # Errors
/// Returns an error if there is no usable session.
pub async fn execute(globals: &GlobalArgs) -> Result<()> {
    let session = SessionContext::start(globals.client()?).await;

    let Some(user) = session.user() else {
        bail!("not logged in");
    };

    println!("{}", serde_json::to_string_pretty(&user)?);
    Ok(())
}

use crate::{cli::globals::GlobalArgs, SessionContext};
use anyhow::Result;

/// Revokes the stored session. Always succeeds locally.
/// # Errors
/// Returns an error if the client cannot be built.
pub async fn execute(globals: &GlobalArgs) -> Result<()> {
    let session = SessionContext::new(globals.client()?);
    session.logout().await;

    println!("Logged out");
    Ok(())
}

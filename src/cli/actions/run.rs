use crate::cli::actions::{login, logout, request, whoami, Action};
use anyhow::Result;

/// Execute the provided action.
// Single dispatch point for all CLI actions.
/// # Errors
/// Returns an error if the action fails.
pub async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Login(args) => login::execute(args).await,
        Action::Logout(globals) => logout::execute(&globals).await,
        Action::Whoami(globals) => whoami::execute(&globals).await,
        Action::Request(args) => request::execute(args).await,
    }
}

use crate::{cli::globals::GlobalArgs, ApiRequest};
use anyhow::{bail, Context, Result};
use reqwest::Method;
use serde_json::Value;
use tracing::instrument;

#[derive(Debug)]
pub struct Args {
    pub globals: GlobalArgs,
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

/// Sends one request through the session-aware client and prints the body.
/// # Errors
/// Returns an error if the session has ended or the server answers with a failure status.
#[instrument(skip_all, fields(method = %args.method, path = %args.path))]
pub async fn execute(args: Args) -> Result<()> {
    let client = args.globals.client()?;

    let mut request = ApiRequest::new(args.method, args.path);
    if let Some(body) = args.body {
        request = request.with_body(body);
    }

    let response = client.send(request).await?;
    let status = response.status();
    let text = response.text().await.context("failed to read response body")?;

    if !status.is_success() {
        bail!("{}", crate::Error::from_status(status.as_u16(), &text));
    }

    println!("{status}");
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) if text.is_empty() => {}
        Err(_) => println!("{text}"),
    }

    Ok(())
}

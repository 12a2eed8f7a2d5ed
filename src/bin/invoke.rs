//! Thin client for a running synth service.
//!
//!   invoke [full|incremental] [1d|4h|1w] [--wipe PREFIX]
//!
//! Posts the event to `$API_URL/invoke` and prints the decoded body.

#[path = "../error.rs"]
mod error;

use std::time::Duration;

use serde_json::{json, Map, Value};

use error::{AppError, Result};

const USAGE: &str = "usage: invoke [full|incremental] [1d|4h|1w] [--wipe PREFIX]";

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Err(e) = run(&args).await {
        eprintln!("{e}");
        if e.is_config() {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
        std::process::exit(1);
    }
}

async fn run(args: &[String]) -> Result<()> {
    let event = parse_args(args)?;
    let base_url = std::env::var("API_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

    // Full backfills generate tens of thousands of points per dataset.
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(300))
        .build()?;

    let resp = client
        .post(format!("{}/invoke", base_url.trim_end_matches('/')))
        .json(&event)
        .send()
        .await?;
    let status = resp.status();
    let status_check = resp.error_for_status_ref().map(|_| ());
    let envelope: Value = resp.json().await?;
    let body = decode_body(&envelope)?;

    println!("{}", serde_json::to_string_pretty(&body)?);

    if let Some(e) = rejected_request(status, &body) {
        return Err(e);
    }
    status_check?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_args(args: &[String]) -> Result<Value> {
    let mut event = Map::new();
    let mut positional = Vec::new();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--wipe" => {
                let prefix = iter
                    .next()
                    .ok_or_else(|| AppError::Config("--wipe needs a PREFIX".to_string()))?;
                event.insert("wipe_prefix".to_string(), json!(prefix));
            }
            "-h" | "--help" => return Err(AppError::Config("help requested".to_string())),
            other if other.starts_with("--") => {
                return Err(AppError::Config(format!("unknown flag '{other}'")));
            }
            other => positional.push(other),
        }
    }

    match positional.as_slice() {
        [] | ["full"] => {
            event.insert("mode".to_string(), json!("full"));
        }
        ["incremental", interval] => {
            event.insert("mode".to_string(), json!("incremental"));
            event.insert("interval".to_string(), json!(interval));
        }
        ["incremental"] => {
            return Err(AppError::Config("incremental mode needs an interval".to_string()));
        }
        other => {
            return Err(AppError::Config(format!("unexpected arguments {other:?}")));
        }
    }
    Ok(Value::Object(event))
}

/// A 4xx answer means the service refused the event itself.
fn rejected_request(status: reqwest::StatusCode, body: &Value) -> Option<AppError> {
    if !status.is_client_error() {
        return None;
    }
    let reason = body
        .get("error")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("service answered {status}"));
    Some(AppError::Config(reason))
}

/// Success envelopes carry `body` as a JSON string, errors as an object.
fn decode_body(envelope: &Value) -> Result<Value> {
    match envelope.get("body") {
        Some(Value::String(s)) => Ok(serde_json::from_str(s)?),
        Some(other) => Ok(other.clone()),
        None => Ok(envelope.clone()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

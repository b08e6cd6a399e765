//! Blocking HTTP client for the coordinator's `/api/git` routes.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Args;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

pub const DEFAULT_SERVER: &str = "http://127.0.0.1:5000";

/// Stays above the coordinator's own operation timeout so its 504 comes through.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(150);

/// Connection flags shared by every operator command.
#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Coordinator base URL.
    #[arg(long, env = "GITBRIDGE_SERVER", default_value = DEFAULT_SERVER)]
    pub server: String,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl ServerArgs {
    pub fn client(&self) -> CoordinatorClient {
        CoordinatorClient::new(&self.server)
    }
}

pub struct CoordinatorClient {
    base: String,
    agent: ureq::Agent,
}

impl CoordinatorClient {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            agent: ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build(),
        }
    }

    pub fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{path}", self.base);
        decode(&url, self.agent.get(&url).call())
    }

    pub fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{path}", self.base);
        decode(&url, self.agent.post(&url).send_json(body))
    }
}

fn decode<T: DeserializeOwned>(url: &str, result: Result<ureq::Response, ureq::Error>) -> Result<T> {
    match result {
        Ok(response) => response
            .into_json()
            .with_context(|| format!("unexpected response body from {url}")),
        Err(ureq::Error::Status(code, response)) => {
            let message = response
                .into_json::<Value>()
                .ok()
                .and_then(|body| body.get("error").and_then(Value::as_str).map(str::to_owned))
                .unwrap_or_else(|| "no error message".to_string());
            Err(anyhow!("coordinator returned HTTP {code}: {message}"))
        }
        Err(err) => Err(anyhow!(err)).with_context(|| format!("failed to reach coordinator at {url}")),
    }
}

/// Percent-encode one path segment. With `keep_slash`, each `/`-separated
/// part is encoded on its own so the separators survive.
pub fn encode_segment(segment: &str, keep_slash: bool) -> String {
    if !keep_slash {
        return urlencoding::encode(segment).into_owned();
    }
    segment
        .split('/')
        .map(|part| urlencoding::encode(part).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_segments_keep_slashes_but_escape_the_rest() {
        assert_eq!(encode_segment("feature/login", true), "feature/login");
        assert_eq!(encode_segment("a b#c", true), "a%20b%23c");
        assert_eq!(encode_segment("x/y", false), "x%2Fy");
        assert_eq!(encode_segment("release/1.0+hotfix", true), "release/1.0%2Bhotfix");
    }
}

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use reqwest::Client;
use tracing::{debug, warn};

/// Cookie fields the content server expects, in the order they are sent.
/// Anything else in the cookie file is ignored.
pub const COOKIE_ALLOWLIST: [&str; 8] = [
    "CloudFront-Policy",
    "CloudFront-Signature",
    "CloudFront-Key-Pair-Id",
    "kitaboo_metadata",
    "kitaboo_metadata_chain_0",
    "JSESSIONID",
    "AWSALB",
    "AWSALBCORS",
];

/// Authenticated HTTP session, reused across all requests of a run.
pub struct Session {
    client: Client,
}

impl Session {
    /// Reads the first line of a raw browser cookie dump and builds a client
    /// with the allowlisted cookies attached.
    ///
    /// Certificate verification is disabled; the content server's CDN chain
    /// does not validate in this environment and the operator accepts that.
    pub async fn from_cookie_file(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read cookie file {}", path.display()))?;
        let line = text.lines().next().unwrap_or("").trim();
        let header = cookie_header(line);
        if header.is_empty() {
            warn!("No allowlisted cookies found in {}", path.display());
        }
        Self::with_cookie_header(&header)
    }

    /// Builds a session from an already-assembled `Cookie` header value.
    pub fn with_cookie_header(header: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if !header.is_empty() {
            headers.insert(
                COOKIE,
                HeaderValue::from_str(header)
                    .map_err(|e| anyhow!("cookie value is not a valid header: {}", e))?,
            );
        }

        let client = Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(true)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// Extracts the allowlisted cookies from one line of `name=value; ...` text
/// and joins them into a single `Cookie` header value.
///
/// For each allowlisted name the first `name=value` occurrence wins; names
/// that do not appear are silently omitted. Output order is allowlist order,
/// not input order.
pub fn cookie_header(raw: &str) -> String {
    let mut found = Vec::new();
    for name in COOKIE_ALLOWLIST {
        let pattern =
            Regex::new(&format!("{}=([^;]*)", regex::escape(name))).expect("cookie pattern");
        if let Some(caps) = pattern.captures(raw) {
            found.push(format!("{}={}", name, &caps[1]));
        } else {
            debug!("Cookie field {} not present, omitting", name);
        }
    }
    found.join("; ")
}

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::time::Duration;
use url::Url;

#[derive(Parser, Debug)]
#[command(
    name = "stacktui",
    version,
    about = "Terminal console for CloudStack-style management servers"
)]
pub struct Cli {
    /// Management server API endpoint
    #[arg(
        short,
        long,
        env = "STACKTUI_ENDPOINT",
        default_value = "http://localhost:8080/client/api"
    )]
    pub endpoint: String,

    /// Log in as this user on startup
    #[arg(short, long, env = "STACKTUI_USERNAME")]
    pub username: Option<String>,

    /// Password for --username
    #[arg(long, env = "STACKTUI_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Domain path of the user
    #[arg(short, long, env = "STACKTUI_DOMAIN", default_value = "/")]
    pub domain: String,

    /// Seconds between polls of a running job
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_interval: u64,

    /// Rows fetched per page
    #[arg(long, default_value_t = 20, value_parser = clap::value_parser!(u32).range(1..=500))]
    pub page_size: u32,

    /// Seconds between list refreshes, 0 disables
    #[arg(long, default_value_t = 30)]
    pub refresh_interval: u64,

    /// HTTP request timeout in seconds
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub endpoint: Url,
    pub username: Option<String>,
    pub password: Option<String>,
    pub domain: String,
    pub poll_interval: Duration,
    pub page_size: u32,
    pub refresh_interval: Option<Duration>,
    pub request_timeout: Duration,
}

impl Cli {
    pub fn into_config(self) -> Result<Config> {
        let endpoint = validate_endpoint(&self.endpoint)?;
        Ok(Config {
            endpoint,
            username: self.username.filter(|u| !u.is_empty()),
            password: self.password,
            domain: self.domain,
            poll_interval: Duration::from_secs(self.poll_interval),
            page_size: self.page_size,
            refresh_interval: (self.refresh_interval > 0)
                .then(|| Duration::from_secs(self.refresh_interval)),
            request_timeout: Duration::from_secs(self.timeout),
        })
    }
}

/// The endpoint must be an absolute http(s) URL without a query string.
pub fn validate_endpoint(endpoint: &str) -> Result<Url> {
    let url = Url::parse(endpoint).with_context(|| format!("Invalid endpoint '{}'", endpoint))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!(
            "Invalid endpoint '{}'. Expected an http or https URL.",
            endpoint
        );
    }
    if url.query().is_some() {
        bail!(
            "Invalid endpoint '{}'. Leave out the query string.",
            endpoint
        );
    }
    Ok(url)
}

#[cfg(test)]
impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: Url::parse("http://cloud.test/client/api").unwrap(),
            username: None,
            password: None,
            domain: "/".to_string(),
            poll_interval: Duration::from_secs(3),
            page_size: 20,
            refresh_interval: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

//! Environment-driven runtime configuration.
//!
//! Settings come from the process environment (a `.env` file is loaded at
//! startup). Anything unset falls back to the defaults the upstream demo
//! repo uses.

use std::env;

pub const DEFAULT_GITHUB_OWNER: &str = "openai";
pub const DEFAULT_GITHUB_REPO: &str = "openai-node";

#[derive(Debug, Clone)]
pub struct Config {
    /// API key for the completion service. The generate endpoint refuses
    /// requests when this is missing.
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    /// Optional GitHub token; unauthenticated requests work against public
    /// repos at a lower rate limit.
    pub github_token: Option<String>,
    /// Default repo to list diffs from when the request does not name one.
    pub github_owner: String,
    pub github_repo: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            openai_api_key: env::var("OPENAI_API_KEY").ok().filter(|v| !v.is_empty()),
            openai_model: env::var("OPENAI_MODEL")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| crate::llm::DEFAULT_MODEL.to_string()),
            github_token: env::var("GITHUB_TOKEN").ok().filter(|v| !v.is_empty()),
            github_owner: env::var("GITHUB_OWNER")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_GITHUB_OWNER.to_string()),
            github_repo: env::var("GITHUB_REPO")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_GITHUB_REPO.to_string()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_model: crate::llm::DEFAULT_MODEL.to_string(),
            github_token: None,
            github_owner: DEFAULT_GITHUB_OWNER.to_string(),
            github_repo: DEFAULT_GITHUB_REPO.to_string(),
        }
    }
}

//! Environment configuration

use crate::llm::{TransportConfig, DEFAULT_ENDPOINT};
use crate::retry::RetryPolicy;
use crate::session::{SessionConfig, DEFAULT_MODEL, DEFAULT_TITLE_MODEL};
use crate::stream::Boundary;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub transport: TransportConfig,
    pub session: SessionConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = var("STREAMCHAT_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(8000);

        let db_path = var("STREAMCHAT_DB_PATH").map_or_else(
            || {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".streamchat").join("streamchat.db")
            },
            PathBuf::from,
        );

        let mut retry = RetryPolicy::default();
        if let Some(retries) = var("STREAMCHAT_RETRIES").and_then(|r| r.parse().ok()) {
            retry.max_retries = retries;
        }

        // Some local servers end each record with a single newline
        let framing = match var("STREAMCHAT_FRAMING").as_deref().map(str::trim) {
            Some("line") => Boundary::Line,
            _ => Boundary::BlankLine,
        };

        Self {
            port,
            db_path,
            transport: TransportConfig {
                endpoint: var("STREAMCHAT_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
                api_key: var("STREAMCHAT_API_KEY").or_else(|| var("API_KEY")),
                ..TransportConfig::default()
            },
            session: SessionConfig {
                default_model: var("DEFAULT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                default_system_prompt: var("SYSTEM_PROMPT").unwrap_or_default(),
                title_model: var("TITLE_MODEL").unwrap_or_else(|| DEFAULT_TITLE_MODEL.to_string()),
                auto_title: true,
                retry,
                framing,
            },
        }
    }
}

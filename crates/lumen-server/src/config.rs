//! Server configuration from the environment.

use std::path::PathBuf;

/// Everything the process reads from the environment. The agent endpoint
/// and key are required; the rest degrades (no archive dir means in-memory
/// history only, no sound URLs means silent sessions).
#[derive(Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub agent_endpoint: String,
    pub agent_api_key: String,
    pub agent_model: Option<String>,
    /// Directory for the durable chat archive; absent means in-memory only.
    pub archive_dir: Option<PathBuf>,
    pub welcome_sound_url: Option<String>,
    pub processing_sound_url: Option<String>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("port", &self.port)
            .field("agent_endpoint", &self.agent_endpoint)
            .field("agent_api_key", &"[REDACTED]")
            .field("agent_model", &self.agent_model)
            .field("archive_dir", &self.archive_dir)
            .field("welcome_sound_url", &self.welcome_sound_url)
            .field("processing_sound_url", &self.processing_sound_url)
            .finish()
    }
}

impl ServerConfig {
    /// Load from the environment. Errors name the missing variable; the
    /// process exits non-zero on any of them.
    pub fn from_env() -> Result<Self, String> {
        let port = match std::env::var("PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|_| format!("PORT is not a valid port number: {raw}"))?,
            Err(_) => 8069,
        };

        Ok(Self {
            port,
            agent_endpoint: required("LUMEN_AGENT_ENDPOINT")?,
            agent_api_key: required("LUMEN_AGENT_API_KEY")?,
            agent_model: optional("LUMEN_AGENT_MODEL"),
            archive_dir: optional("LUMEN_ARCHIVE_DIR").map(PathBuf::from),
            welcome_sound_url: optional("LUMEN_WELCOME_SOUND_URL"),
            processing_sound_url: optional("LUMEN_PROCESSING_SOUND_URL"),
        })
    }
}

fn required(name: &str) -> Result<String, String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| format!("missing required environment variable {name}"))
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

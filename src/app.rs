use clap::Subcommand;
use directories::BaseDirs;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::api::client::{ApiClient, EngagementSource, RemoteSource, SeedFile};
use crate::api::models::{Conversation, ConversationKey};
use crate::error::{InboxError, Result};
use crate::inbox::Inbox;
use crate::storage::SqliteStore;
use crate::utils::{normalize_url, preview};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub api_base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub viewer: Option<String>,
    #[serde(default)]
    pub seed_file: Option<PathBuf>,
    #[serde(default)]
    pub database: Option<PathBuf>,
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }
    // TOML is the primary format; a JSON file left by older builds is converted on first load
    pub fn toml_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        Some(base.config_dir().join("gigchat.toml"))
    }

    fn legacy_json_path() -> Option<PathBuf> {
        let proj = directories::ProjectDirs::from("com", "example", "GigChat")?;
        Some(proj.config_dir().join("state.json"))
    }

    /// Loads the user config, falling back to defaults when nothing usable exists.
    pub fn load() -> Self {
        if let Some(path) = Self::toml_path() {
            if path.exists() {
                match Self::load_from(&path) {
                    Ok(config) => return config,
                    Err(e) => warn!("ignoring {}: {e}", path.display()),
                }
            }
        }

        if let Some(legacy) = Self::legacy_json_path() {
            if let Ok(bytes) = fs::read(&legacy) {
                match serde_json::from_slice::<AppConfig>(&bytes) {
                    Ok(config) => {
                        if let Err(e) = config.save() {
                            warn!("could not migrate {}: {e}", legacy.display());
                        }
                        return config;
                    }
                    Err(e) => warn!("ignoring {}: {e}", legacy.display()),
                }
            }
        }

        Self::new()
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| InboxError::Config(e.to_string()))
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::toml_path().ok_or_else(|| InboxError::Config("no config dir".into()))?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let toml = toml::to_string_pretty(self).map_err(|e| InboxError::Config(e.to_string()))?;
        fs::write(path, toml)?;
        Ok(())
    }

    pub fn viewer(&self) -> Result<&str> {
        self.viewer
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| InboxError::Config("no viewer configured".into()))
    }

    /// A seed file wins over the API so offline sessions never hit the network.
    pub fn engagement_source(&self) -> Result<Box<dyn EngagementSource>> {
        if let Some(seed) = &self.seed_file {
            return Ok(Box::new(SeedFile::new(seed)));
        }
        let base_url = normalize_url(&self.api_base_url);
        if base_url.is_empty() {
            return Err(InboxError::Config("set api_base_url or seed_file".into()));
        }
        Ok(Box::new(RemoteSource {
            client: ApiClient::new(),
            base_url,
            token: self.token.clone(),
        }))
    }

    pub fn open_store(&self) -> Result<SqliteStore> {
        match &self.database {
            Some(path) => SqliteStore::open(path),
            None => SqliteStore::open_default(),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// List conversations, most recent first
    Inbox,
    /// Print one conversation thread
    Show { key: String },
    /// Send a message within an engagement
    Send {
        engagement: String,
        recipient: String,
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Mark a conversation as read
    Read { key: String },
    /// Print the total number of unread messages
    Unread,
    /// Print the resolved configuration
    Config {
        /// Persist the resolved configuration
        #[arg(long)]
        save: bool,
    },
}

fn write_summary(out: &mut dyn Write, c: &Conversation) -> Result<()> {
    let last = c
        .last_message
        .as_ref()
        .map(|m| preview(&m.text, 48))
        .unwrap_or_else(|| "(no messages)".to_string());
    writeln!(
        out,
        "{}\t{} ({})\t{} unread\t{}",
        c.key, c.counterpart.name, c.counterpart.id, c.unread_count, last
    )?;
    Ok(())
}

fn write_thread(out: &mut dyn Write, c: &Conversation) -> Result<()> {
    writeln!(out, "{} with {} [{}]", c.key, c.counterpart.name, c.engagement_ids.join(", "))?;
    for m in &c.messages {
        let mark = if m.read { ' ' } else { '*' };
        writeln!(out, "{mark} {} {}: {}", m.created_at.format("%Y-%m-%d %H:%M"), m.sender_id, m.text)?;
    }
    Ok(())
}

pub fn run(config: &AppConfig, command: Command, out: &mut dyn Write) -> Result<()> {
    match command {
        Command::Config { save } => {
            let text = toml::to_string_pretty(config).map_err(|e| InboxError::Config(e.to_string()))?;
            write!(out, "{text}")?;
            if save {
                config.save()?;
            }
            Ok(())
        }
        other => run_session(config, other, out),
    }
}

fn run_session(config: &AppConfig, command: Command, out: &mut dyn Write) -> Result<()> {
    let viewer = config.viewer()?;
    let engagements = config.engagement_source()?.list_visible_engagements(viewer)?;
    let mut inbox = Inbox::new(config.open_store()?);

    match command {
        Command::Inbox => {
            for c in inbox.build_conversations(viewer, &engagements)? {
                write_summary(out, &c)?;
            }
        }
        Command::Show { key } => {
            let key: ConversationKey = key.parse()?;
            match inbox.conversation(viewer, &key, &engagements)? {
                Some(c) => write_thread(out, &c)?,
                None => writeln!(out, "no conversation {key}")?,
            }
        }
        Command::Send { engagement, recipient, text } => {
            let message = inbox.append_message(&engagements, &engagement, viewer, &recipient, &text.join(" "))?;
            writeln!(out, "sent {}", message.id)?;
        }
        Command::Read { key } => {
            let key: ConversationKey = key.parse()?;
            let changed = inbox.mark_conversation_read(viewer, &key, &engagements)?;
            writeln!(out, "marked {changed} messages read")?;
        }
        Command::Unread => {
            writeln!(out, "{}", inbox.unread_total(viewer, &engagements)?)?;
        }
        Command::Config { .. } => {}
    }
    Ok(())
}

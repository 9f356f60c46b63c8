//! TOML configuration for the bot.
//!
//! Templates use sequential `{}` placeholders. Placeholder counts are checked
//! once at load time so that a malformed template fails startup instead of a
//! cycle.

use crate::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const PASSWORD_ENV: &str = "DELTABOT_PASSWORD";
pub const CLIENT_SECRET_ENV: &str = "DELTABOT_CLIENT_SECRET";

const PLACEHOLDER: &str = "{}";

/// Purpose of a bot response; each key has its own template pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKey {
    Confirmation,
    BrokenRule,
    AlreadyAwarded,
    TooLittleText,
}

impl MessageKey {
    pub const ALL: [MessageKey; 4] = [
        MessageKey::Confirmation,
        MessageKey::BrokenRule,
        MessageKey::AlreadyAwarded,
        MessageKey::TooLittleText,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKey::Confirmation => "confirmation",
            MessageKey::BrokenRule => "broken_rule",
            MessageKey::AlreadyAwarded => "already_awarded",
            MessageKey::TooLittleText => "too_little_text",
        }
    }

    /// Number of placeholders every template of this key must carry.
    pub fn arity(&self) -> usize {
        match self {
            MessageKey::Confirmation => 3,
            MessageKey::BrokenRule => 0,
            MessageKey::AlreadyAwarded => 1,
            MessageKey::TooLittleText => 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    pub subreddit: String,
    #[serde(default = "default_sleep_time")]
    pub sleep_time: u64,
    #[serde(default = "default_last_comment_filename")]
    pub last_comment_filename: PathBuf,
    pub tokens: Vec<String>,
    #[serde(default)]
    pub minimum_comment_length: usize,
    /// First-delta private message: (subreddit, awardee).
    pub private_message: String,
    pub account: AccountConfig,
    pub messages: MessagesConfig,
    #[serde(default)]
    pub flair: FlairConfig,
    pub scoreboard: ScoreboardConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagesConfig {
    #[serde(default)]
    pub append_to_all_messages: String,
    #[serde(default)]
    pub confirmation: Vec<String>,
    #[serde(default)]
    pub broken_rule: Vec<String>,
    #[serde(default)]
    pub already_awarded: Vec<String>,
    #[serde(default)]
    pub too_little_text: Vec<String>,
}

impl MessagesConfig {
    pub fn pool(&self, key: MessageKey) -> &[String] {
        match key {
            MessageKey::Confirmation => &self.confirmation,
            MessageKey::BrokenRule => &self.broken_rule,
            MessageKey::AlreadyAwarded => &self.already_awarded,
            MessageKey::TooLittleText => &self.too_little_text,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlairConfig {
    /// Display text for a point total: (points).
    #[serde(default = "default_point_text")]
    pub point_text: String,
    #[serde(default = "default_css_class")]
    pub css_class: String,
    #[serde(default = "default_point_increment")]
    pub point_increment: u32,
}

impl Default for FlairConfig {
    fn default() -> Self {
        Self {
            point_text: default_point_text(),
            css_class: default_css_class(),
            point_increment: default_point_increment(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoreboardConfig {
    pub table_head: String,
    /// (user, points text, subreddit, user)
    pub table_leader_entry: String,
    /// (rank, user, points text, subreddit, user)
    pub table_entry: String,
}

fn default_sleep_time() -> u64 {
    60
}

fn default_last_comment_filename() -> PathBuf {
    PathBuf::from("last_comment.txt")
}

fn default_user_agent() -> String {
    format!("deltabot/{}", env!("CARGO_PKG_VERSION"))
}

fn default_point_text() -> String {
    "{}∆".to_string()
}

fn default_css_class() -> String {
    "points".to_string()
}

fn default_point_increment() -> u32 {
    1
}

impl BotConfig {
    /// Reads, applies environment overrides, and validates.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::FileNotFound {
                path: shown.clone(),
            },
            std::io::ErrorKind::PermissionDenied => ConfigError::PermissionDenied {
                path: shown.clone(),
            },
            _ => ConfigError::InvalidFormat {
                details: format!("{}: {}", shown, e),
            },
        })?;

        let mut config = Self::from_toml_str(&text)?;
        config.apply_env_overrides();
        config.validate()?;
        info!("Loaded configuration for r/{} from {}", config.subreddit, shown);
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            debug!("Using account password from {}", PASSWORD_ENV);
            self.account.password = password;
        }
        if let Ok(secret) = std::env::var(CLIENT_SECRET_ENV) {
            debug!("Using client secret from {}", CLIENT_SECRET_ENV);
            self.account.client_secret = secret;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.subreddit.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "subreddit".to_string(),
            });
        }
        if self.account.username.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "account.username".to_string(),
            });
        }
        if self.account.password.is_empty() {
            return Err(ConfigError::MissingEnvironmentVariable {
                var_name: PASSWORD_ENV.to_string(),
            });
        }
        if self.tokens.is_empty() || self.tokens.iter().any(|t| t.is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "tokens".to_string(),
                value: format!("{:?}", self.tokens),
            });
        }

        for key in MessageKey::ALL {
            let pool = self.messages.pool(key);
            if pool.is_empty() {
                return Err(ConfigError::MissingField {
                    field: format!("messages.{}", key.as_str()),
                });
            }
            for template in pool {
                check_arity(&format!("messages.{}", key.as_str()), template, key.arity())?;
            }
        }

        check_arity("private_message", &self.private_message, 2)?;
        check_arity("flair.point_text", &self.flair.point_text, 1)?;
        check_arity(
            "scoreboard.table_leader_entry",
            &self.scoreboard.table_leader_entry,
            4,
        )?;
        check_arity("scoreboard.table_entry", &self.scoreboard.table_entry, 5)?;
        Ok(())
    }

    /// Longest token length plus the configured minimum, in characters.
    pub fn minimum_body_length(&self) -> usize {
        let longest = self
            .tokens
            .iter()
            .map(|token| token.chars().count())
            .max()
            .unwrap_or(0);
        longest + self.minimum_comment_length
    }
}

fn check_arity(field: &str, template: &str, expected: usize) -> Result<(), ConfigError> {
    let found = placeholder_count(template);
    if found != expected {
        return Err(ConfigError::ValidationFailed {
            reason: format!(
                "{} expects {} placeholder(s), found {} in {:?}",
                field, expected, found, template
            ),
        });
    }
    Ok(())
}

pub fn placeholder_count(template: &str) -> usize {
    template.matches(PLACEHOLDER).count()
}

/// Substitutes `args` into the `{}` placeholders of `template`, in order.
/// Surplus placeholders are left untouched.
pub fn fill_placeholders<S: AsRef<str>>(template: &str, args: &[S]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut args = args.iter();
    while let Some(pos) = rest.find(PLACEHOLDER) {
        out.push_str(&rest[..pos]);
        match args.next() {
            Some(arg) => out.push_str(arg.as_ref()),
            None => out.push_str(PLACEHOLDER),
        }
        rest = &rest[pos + PLACEHOLDER.len()..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_placeholders_in_order() {
        assert_eq!(
            fill_placeholders("Confirmed: 1 delta awarded to /u/{} in /r/{} ({})", &["bob", "cmv", "bob"]),
            "Confirmed: 1 delta awarded to /u/bob in /r/cmv (bob)"
        );
        assert_eq!(fill_placeholders("{}∆", &["12"]), "12∆");
        assert_eq!(fill_placeholders::<&str>("no args {}", &[]), "no args {}");
    }

    #[test]
    fn test_placeholder_count() {
        assert_eq!(placeholder_count("{} and {} and {}"), 3);
        assert_eq!(placeholder_count("none"), 0);
    }
}

//! Randomized response templates and matching of previously rendered ones.

use deltabot_core::{fill_placeholders, MessageKey, MessagesConfig};

/// Characters of a confirmation template that identify a bot reply as one.
const CONFIRMATION_PREFIX_LEN: usize = 15;

#[derive(Debug, Clone)]
pub struct MessageTemplates {
    messages: MessagesConfig,
}

impl MessageTemplates {
    pub fn new(messages: MessagesConfig) -> Self {
        Self { messages }
    }

    pub fn suffix(&self) -> &str {
        &self.messages.append_to_all_messages
    }

    /// Picks a template for `key` at random, fills it, and appends the suffix.
    pub fn render<S: AsRef<str>>(&self, key: MessageKey, args: &[S]) -> String {
        let pool = self.messages.pool(key);
        let template = if pool.is_empty() {
            ""
        } else {
            pool[fastrand::usize(..pool.len())].as_str()
        };
        self.finish(template, args)
    }

    /// Every possible rendering of `key` with `args`.
    pub fn renderings<S: AsRef<str>>(&self, key: MessageKey, args: &[S]) -> Vec<String> {
        self.messages
            .pool(key)
            .iter()
            .map(|template| self.finish(template, args))
            .collect()
    }

    /// True when `text` equals some rendering of `key` with `args`.
    pub fn matches<S: AsRef<str>>(&self, text: &str, key: MessageKey, args: &[S]) -> bool {
        self.renderings(key, args).iter().any(|full| full == text)
    }

    /// True when `text` carries the opening of any confirmation template.
    pub fn looks_like_confirmation(&self, text: &str) -> bool {
        self.messages
            .pool(MessageKey::Confirmation)
            .iter()
            .map(|template| {
                let prefix: String = template.chars().take(CONFIRMATION_PREFIX_LEN).collect();
                prefix
            })
            .any(|prefix| text.contains(&prefix))
    }

    fn finish<S: AsRef<str>>(&self, template: &str, args: &[S]) -> String {
        let mut text = fill_placeholders(template, args);
        text.push_str(&self.messages.append_to_all_messages);
        text
    }
}

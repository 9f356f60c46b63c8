//! The award decision: an ordered predicate chain over a reply and its parent.
//!
//! Order matters. Cheap, authoritative denials run before the subtree scan,
//! which costs one fetch per ancestor plus a walk over the root's replies.

use crate::ancestors::AncestorResolver;
use crate::scanner::{contains_token, unescape_entities};
use crate::templates::MessageTemplates;
use deltabot_core::{BotConfig, Comment, CoreError, MessageKey, Platform, ReplyHandle};
use std::fmt;
use tracing::debug;

/// The parts of the configuration the predicates read.
#[derive(Debug, Clone)]
pub struct EligibilityRules {
    pub bot_name: String,
    pub subreddit: String,
    pub tokens: Vec<String>,
    pub minimum_body_length: usize,
}

impl EligibilityRules {
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            bot_name: config.account.username.clone(),
            subreddit: config.subreddit.clone(),
            tokens: config.tokens.clone(),
            minimum_body_length: config.minimum_body_length(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    SelfReply,
    AwardeeDeleted,
    AlreadyReplied,
    ParentIsOp,
    AlreadyAwarded,
    TooShort,
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DenialReason::SelfReply => "self-reply",
            DenialReason::AwardeeDeleted => "awardee deleted",
            DenialReason::AlreadyReplied => "already replied",
            DenialReason::ParentIsOp => "parent is OP",
            DenialReason::AlreadyAwarded => "already awarded",
            DenialReason::TooShort => "too short",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoToken,
    RepliesToSubmission,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoToken => f.write_str("no token"),
            SkipReason::RepliesToSubmission => f.write_str("replies to submission"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Granted { awardee: String },
    Denied(DenialReason),
    Skipped(SkipReason),
}

/// Which template pool to answer from, and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMessage {
    pub key: MessageKey,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwardDecision {
    pub verdict: Verdict,
    pub response: Option<ResponseMessage>,
    /// An earlier non-confirmation reply by the bot, to be replaced.
    pub superseded_reply: Option<ReplyHandle>,
}

impl AwardDecision {
    fn new(verdict: Verdict) -> Self {
        Self {
            verdict,
            response: None,
            superseded_reply: None,
        }
    }

    fn respond(mut self, key: MessageKey, args: Vec<String>) -> Self {
        self.response = Some(ResponseMessage { key, args });
        self
    }

    pub fn is_granted(&self) -> bool {
        matches!(self.verdict, Verdict::Granted { .. })
    }

    pub fn log_line(&self) -> String {
        match &self.verdict {
            Verdict::Granted { awardee } => format!("Awarding point to {}", awardee),
            Verdict::Denied(reason) => format!("No points awarded, {}", reason),
            Verdict::Skipped(reason) => format!("No points awarded, {}", reason),
        }
    }
}

enum ReplyState {
    Confirmed,
    Stale(ReplyHandle),
    None,
}

pub struct EligibilityEngine<'a, P: Platform + ?Sized> {
    platform: &'a P,
    rules: &'a EligibilityRules,
    templates: &'a MessageTemplates,
}

impl<'a, P: Platform + ?Sized> EligibilityEngine<'a, P> {
    pub fn new(platform: &'a P, rules: &'a EligibilityRules, templates: &'a MessageTemplates) -> Self {
        Self {
            platform,
            rules,
            templates,
        }
    }

    pub fn has_token(&self, comment: &Comment) -> bool {
        contains_token(&comment.body, &self.rules.tokens)
    }

    /// Decides whether `parent`'s author earns a point for `comment`.
    /// `comment` must carry its replies. Non-strict mode only keeps the
    /// self-reply and duplicate-reply checks.
    pub async fn evaluate(
        &self,
        comment: &Comment,
        parent: &Comment,
        strict: bool,
    ) -> Result<AwardDecision, CoreError> {
        if strict && !self.has_token(comment) {
            return Ok(AwardDecision::new(Verdict::Skipped(SkipReason::NoToken)));
        }

        if parent.is_authored_by(&self.rules.bot_name) {
            return Ok(AwardDecision::new(Verdict::Denied(DenialReason::SelfReply)));
        }

        let superseded_reply = match self.existing_reply(comment) {
            ReplyState::Confirmed => {
                return Ok(AwardDecision::new(Verdict::Denied(
                    DenialReason::AlreadyReplied,
                )));
            }
            ReplyState::Stale(handle) => Some(handle),
            ReplyState::None => None,
        };

        let Some(awardee) = parent.author.clone() else {
            return Ok(AwardDecision {
                superseded_reply,
                ..AwardDecision::new(Verdict::Denied(DenialReason::AwardeeDeleted))
            });
        };

        let decision = if strict && self.is_parent_commenter_op(comment, parent) {
            AwardDecision::new(Verdict::Denied(DenialReason::ParentIsOp))
                .respond(MessageKey::BrokenRule, Vec::new())
        } else if strict && self.already_awarded(parent, &awardee).await? {
            AwardDecision::new(Verdict::Denied(DenialReason::AlreadyAwarded))
                .respond(MessageKey::AlreadyAwarded, vec![awardee])
        } else if strict && self.is_too_short(comment) {
            AwardDecision::new(Verdict::Denied(DenialReason::TooShort))
                .respond(MessageKey::TooLittleText, vec![awardee])
        } else {
            let args = vec![awardee.clone(), self.rules.subreddit.clone(), awardee.clone()];
            AwardDecision::new(Verdict::Granted { awardee }).respond(MessageKey::Confirmation, args)
        };

        Ok(AwardDecision {
            superseded_reply,
            ..decision
        })
    }

    /// Whether a bot reply rejecting `original` as too short can now be
    /// turned into an award: the reply must be an exact "too little text"
    /// rendering for the awardee, and the remaining strict predicates must
    /// all pass.
    pub async fn can_upgrade_short_reply(
        &self,
        bots_reply: &Comment,
        original: &Comment,
        awardee_comment: &Comment,
    ) -> Result<bool, CoreError> {
        let Some(awardee) = awardee_comment.author.as_deref() else {
            return Ok(false);
        };
        let body = unescape_entities(&bots_reply.body);
        if !self
            .templates
            .matches(&body, MessageKey::TooLittleText, &[awardee])
        {
            return Ok(false);
        }
        Ok(!self.is_too_short(original)
            && !self.is_parent_commenter_op(original, awardee_comment)
            && !self.already_awarded(awardee_comment, awardee).await?)
    }

    /// The first reply by the bot decides: confirmation-shaped means the
    /// comment was handled, anything else is stale and gets replaced.
    fn existing_reply(&self, comment: &Comment) -> ReplyState {
        let Some(reply) = comment
            .replies
            .iter()
            .find(|reply| reply.is_authored_by(&self.rules.bot_name))
        else {
            return ReplyState::None;
        };
        if self.templates.looks_like_confirmation(&unescape_entities(&reply.body)) {
            ReplyState::Confirmed
        } else {
            ReplyState::Stale(ReplyHandle::new(reply.fullname()))
        }
    }

    pub fn is_parent_commenter_op(&self, comment: &Comment, parent: &Comment) -> bool {
        match (&parent.author, &comment.submission.author) {
            (Some(parent_author), Some(op)) => parent_author.eq_ignore_ascii_case(op),
            _ => false,
        }
    }

    pub fn is_too_short(&self, comment: &Comment) -> bool {
        comment.body.chars().count() < self.rules.minimum_body_length
    }

    /// Scans the whole reply tree under `parent`'s root comment for a bot
    /// confirmation addressed to `awardee`. Depth-first, first match wins.
    pub async fn already_awarded(&self, parent: &Comment, awardee: &str) -> Result<bool, CoreError> {
        let root = AncestorResolver::new(self.platform).root_of(parent).await?;
        let args = [awardee, self.rules.subreddit.as_str(), awardee];
        let confirmations = self.templates.renderings(MessageKey::Confirmation, &args);

        let mut worklist = vec![&root];
        let mut visited = 0usize;
        while let Some(node) = worklist.pop() {
            visited += 1;
            if node.is_authored_by(&self.rules.bot_name) {
                let body = unescape_entities(&node.body);
                if confirmations.iter().any(|confirm| body.contains(confirm.as_str())) {
                    debug!("Found prior award to {} in {}", awardee, node.fullname());
                    return Ok(true);
                }
            }
            worklist.extend(node.replies.iter().rev());
        }
        debug!("No prior award to {} among {} comment(s)", awardee, visited);
        Ok(false)
    }
}

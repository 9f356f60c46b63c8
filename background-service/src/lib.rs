//! The bot's poll loop.
//!
//! One cycle scans the inbox (moderator commands and replies to the bot),
//! then mod mail, then the subreddit comment stream, and finally refreshes
//! the sidebar scoreboard when anything was awarded. Cycles never overlap.

use chrono::Utc;
use delta_engine::{
    compare_fullnames, refresh_sidebar, AncestorResolver, AwardLedger, AwardReceipt, CycleTracker,
    EligibilityEngine, EligibilityRules, MessageTemplates, Parent, SkipReason, Verdict,
};
use deltabot_core::{
    BotConfig, Comment, CoreError, ErrorReporter, InboxItem, Message, MessageKey, Platform,
    ReplyHandle, Thing, COMMENT_PREFIX, SUBMISSION_PREFIX,
};
use regex::Regex;
use std::cmp::Ordering;
use std::ops::ControlFlow;
use std::time::Duration;
use tracing::{debug, info, warn};

#[cfg(test)]
mod tests;

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Continue { awards: usize },
    /// A moderator issued the stop command.
    Stop,
}

/// Moderator commands, selected by the message subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Add,
    ForceAdd,
    Remove,
    Rescan,
    Reset,
    Stop,
}

impl Command {
    pub fn parse(subject: &str) -> Option<Self> {
        match subject.trim().to_lowercase().as_str() {
            "add" => Some(Command::Add),
            "force add" => Some(Command::ForceAdd),
            "remove" => Some(Command::Remove),
            "rescan" => Some(Command::Rescan),
            "reset" => Some(Command::Reset),
            "stop" => Some(Command::Stop),
            _ => None,
        }
    }
}

/// Matches comment permalinks on `subreddit` and captures the comment id.
pub fn comment_link_pattern(subreddit: &str) -> Result<Regex, CoreError> {
    let pattern = format!(
        r"(?:https?://)?(?:www\.)?reddit\.com/r(?:eddit)?/{}/comments/\w+(?:/[^/\s]+)/?(\w+)",
        regex::escape(subreddit)
    );
    Regex::new(&pattern).map_err(|e| CoreError::Internal {
        message: format!("invalid comment link pattern: {}", e),
    })
}

pub struct BackgroundService<P: Platform> {
    platform: P,
    config: BotConfig,
    rules: EligibilityRules,
    templates: MessageTemplates,
    tracker: CycleTracker,
    comment_link: Regex,
    reporter: ErrorReporter,
    polling_interval: Duration,
    /// Set by any award, cleared once the sidebar has been rebuilt.
    scoreboard_stale: bool,
}

impl<P: Platform> BackgroundService<P> {
    pub fn new(platform: P, config: BotConfig, tracker: CycleTracker) -> Result<Self, CoreError> {
        let comment_link = comment_link_pattern(&config.subreddit)?;
        Ok(Self {
            rules: EligibilityRules::from_config(&config),
            templates: MessageTemplates::new(config.messages.clone()),
            polling_interval: Duration::from_secs(config.sleep_time),
            platform,
            config,
            tracker,
            comment_link,
            reporter: ErrorReporter::new(),
            scoreboard_stale: false,
        })
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn tracker(&self) -> &CycleTracker {
        &self.tracker
    }

    /// Runs cycles until a moderator sends the stop command.
    pub async fn start(&mut self) -> Result<(), CoreError> {
        info!(
            "Starting DeltaBot on /r/{} as {}",
            self.config.subreddit, self.config.account.username
        );
        loop {
            if self.run_cycle().await == CycleOutcome::Stop {
                return Ok(());
            }
            info!("Sleeping for {} seconds", self.polling_interval.as_secs());
            tokio::time::sleep(self.polling_interval).await;
        }
    }

    /// One full cycle. Failures are logged and the cycle is abandoned; the
    /// cursor is still persisted for whatever was processed.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let started_at = self.tracker.latest();
        info!(
            "Starting iteration at {}",
            started_at.as_deref().unwrap_or("None")
        );

        let mut awards = 0usize;
        match self.scan_everything(&mut awards).await {
            Ok(ControlFlow::Break(())) => return CycleOutcome::Stop,
            Ok(ControlFlow::Continue(())) => {}
            Err(e) => {
                warn!("Cycle abandoned after {} award(s)", awards);
                self.reporter.report_error(&e);
            }
        }

        if let Err(e) = self.tracker.finish_cycle(started_at.as_deref()).await {
            self.reporter.report_error(&e);
        }
        info!(
            "Iteration complete at {}",
            self.tracker.latest().as_deref().unwrap_or("None")
        );
        CycleOutcome::Continue { awards }
    }

    async fn scan_everything(&mut self, awards: &mut usize) -> Result<ControlFlow<()>, CoreError> {
        if self.scan_inbox(awards).await?.is_break() {
            return Ok(ControlFlow::Break(()));
        }
        self.scan_mod_mail().await?;
        self.scan_comments(awards).await?;

        if self.scoreboard_stale {
            refresh_sidebar(&self.platform, &self.config, Utc::now()).await?;
            self.scoreboard_stale = false;
        }
        Ok(ControlFlow::Continue(()))
    }

    fn note_awards(&mut self, receipts: &[AwardReceipt], awards: &mut usize) {
        if !receipts.is_empty() {
            *awards += receipts.len();
            self.scoreboard_stale = true;
        }
    }

    pub async fn scan_inbox(&mut self, awards: &mut usize) -> Result<ControlFlow<()>, CoreError> {
        info!("Scanning inbox");
        let items = self.platform.fetch_unread().await?;

        for item in items {
            let handled = match &item {
                InboxItem::CommentReply(comment) => self
                    .scan_comment_reply(comment)
                    .await
                    .map(ControlFlow::Continue),
                InboxItem::DirectMessage(message) => self.scan_message(message).await,
            };

            match handled {
                Ok(ControlFlow::Continue(receipts)) => self.note_awards(&receipts, awards),
                Ok(ControlFlow::Break(())) => {
                    self.platform.mark_read(&item).await?;
                    return Ok(ControlFlow::Break(()));
                }
                Err(e) if e.is_not_found() => {
                    info!("Skipping {}: {}", item.fullname(), e);
                }
                Err(e) => return Err(e),
            }
            self.platform.mark_read(&item).await?;
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Mod mail is read through the regular inbox; nothing else to do here.
    pub async fn scan_mod_mail(&self) -> Result<(), CoreError> {
        debug!("Mod mail scan has nothing to do");
        Ok(())
    }

    /// Scans the subreddit stream for comments newer than the cursor.
    pub async fn scan_comments(&mut self, awards: &mut usize) -> Result<(), CoreError> {
        info!("Scanning new comments");
        let latest = self.tracker.latest();
        let comments = self.platform.fetch_new_comments(latest.as_deref()).await?;

        for comment in comments {
            let fullname = comment.fullname();
            let stale = latest
                .as_deref()
                .is_some_and(|latest| compare_fullnames(&fullname, latest) != Ordering::Greater);
            if self.tracker.has_seen(&fullname) || stale {
                debug!("Already processed {}", fullname);
                continue;
            }
            if comment.is_authored_by(&self.rules.bot_name) {
                debug!("Skipping own comment {}", fullname);
                self.tracker.record(&fullname);
                continue;
            }

            let engine = EligibilityEngine::new(&self.platform, &self.rules, &self.templates);
            if engine.has_token(&comment) {
                match self.scan_comment(&fullname, true).await {
                    Ok(Some(receipt)) => self.note_awards(&[receipt], awards),
                    Ok(None) => {}
                    Err(e) if e.is_not_found() => {
                        info!("Skipping {}: {}", fullname, e);
                    }
                    Err(e) => return Err(e),
                }
            } else {
                debug!("No points awarded, {} ({})", SkipReason::NoToken, fullname);
            }
            self.tracker.record(&fullname);
        }
        Ok(())
    }

    /// Fetches `fullname` with its replies, evaluates it, and acts on the
    /// decision: replaces a stale bot reply, posts the response, and applies
    /// the award.
    pub async fn scan_comment(
        &self,
        fullname: &str,
        strict: bool,
    ) -> Result<Option<AwardReceipt>, CoreError> {
        let resolver = AncestorResolver::new(&self.platform);
        let comment = resolver.fetch_comment(fullname).await?;
        info!(
            "Scanning comment reddit.com/r/{}/comments/{}/c/{} by {}",
            self.config.subreddit,
            comment.submission.id.trim_start_matches(SUBMISSION_PREFIX),
            comment.id,
            comment.author_name()
        );

        let parent = match resolver.parent_of(&comment).await? {
            Parent::Comment(parent) => parent,
            Parent::Submission => {
                info!("No points awarded, {}", SkipReason::RepliesToSubmission);
                return Ok(None);
            }
        };

        let engine = EligibilityEngine::new(&self.platform, &self.rules, &self.templates);
        let decision = engine.evaluate(&comment, &parent, strict).await?;
        info!("{}", decision.log_line());

        if let Some(stale) = &decision.superseded_reply {
            info!("Replacing earlier reply {}", stale.fullname);
            self.platform.delete_reply(stale).await?;
        }
        if let Some(response) = &decision.response {
            let text = self.templates.render(response.key, &response.args);
            let handle = self.platform.post_reply(&comment.fullname(), &text).await?;
            self.platform.distinguish(&handle).await?;
        }

        match decision.verdict {
            Verdict::Granted { awardee } => {
                let receipt = AwardLedger::new(&self.platform, &self.config)
                    .award(&awardee, &comment)
                    .await?;
                Ok(Some(receipt))
            }
            _ => Ok(None),
        }
    }

    /// A reply to one of the bot's comments. The original commenter (or a
    /// moderator) replying is the cue to re-check a "too short" rejection.
    async fn scan_comment_reply(&self, comment: &Comment) -> Result<Vec<AwardReceipt>, CoreError> {
        info!("Scanning comment reply from {}", comment.author_name());
        let Some(author) = comment.author.as_deref() else {
            return Ok(Vec::new());
        };
        if comment.is_root() {
            return Ok(Vec::new());
        }

        let resolver = AncestorResolver::new(&self.platform);
        let bots_comment = resolver.fetch_comment(&comment.parent_id).await?;
        if !bots_comment.is_authored_by(&self.rules.bot_name) {
            debug!("{} does not reply to the bot", comment.fullname());
            return Ok(Vec::new());
        }
        let Parent::Comment(original) = resolver.parent_of(&bots_comment).await? else {
            return Ok(Vec::new());
        };

        let valid_commenter = original.is_authored_by(author) || self.is_moderator(author).await?;
        if !valid_commenter {
            debug!("{} may not trigger a rescan", author);
            return Ok(Vec::new());
        }
        Ok(self.rescan_bot_reply(bots_comment).await?.into_iter().collect())
    }

    /// Upgrades a "too short" bot reply into an award when the original
    /// comment now qualifies.
    pub async fn rescan_bot_reply(
        &self,
        bots_comment: Comment,
    ) -> Result<Option<AwardReceipt>, CoreError> {
        let resolver = AncestorResolver::new(&self.platform);
        let Parent::Comment(original) = resolver.parent_of(&bots_comment).await? else {
            return Ok(None);
        };
        let Parent::Comment(awardee_comment) = resolver.parent_of(&original).await? else {
            return Ok(None);
        };

        let engine = EligibilityEngine::new(&self.platform, &self.rules, &self.templates);
        if !engine
            .can_upgrade_short_reply(&bots_comment, &original, &awardee_comment)
            .await?
        {
            debug!("{} stays as it is", bots_comment.fullname());
            return Ok(None);
        }
        let Some(awardee) = awardee_comment.author.as_deref() else {
            return Ok(None);
        };

        info!("Rescan awards {} for {}", awardee, original.fullname());
        let receipt = AwardLedger::new(&self.platform, &self.config)
            .award(awardee, &original)
            .await?;
        let args = [awardee, self.config.subreddit.as_str(), awardee];
        let text = self.templates.render(MessageKey::Confirmation, &args);
        let handle = ReplyHandle::new(bots_comment.fullname());
        self.platform.edit_reply(&handle, &text).await?;
        self.platform.distinguish(&handle).await?;
        Ok(Some(receipt))
    }

    async fn is_moderator(&self, username: &str) -> Result<bool, CoreError> {
        let moderators = self.platform.list_moderators().await?;
        Ok(moderators
            .iter()
            .any(|moderator| moderator.eq_ignore_ascii_case(username)))
    }

    fn linked_comment_ids(&self, body: &str) -> Vec<String> {
        self.comment_link
            .captures_iter(body)
            .filter_map(|captures| captures.get(1))
            .map(|id| format!("{}{}", COMMENT_PREFIX, id.as_str()))
            .collect()
    }

    async fn scan_message(
        &mut self,
        message: &Message,
    ) -> Result<ControlFlow<(), Vec<AwardReceipt>>, CoreError> {
        let sender = message.author.as_deref().unwrap_or("[deleted]");
        info!("Scanning message {} from {}", message.fullname(), sender);

        if message.author.is_none() || !self.is_moderator(sender).await? {
            debug!("Ignoring message from non-moderator {}", sender);
            return Ok(ControlFlow::Continue(Vec::new()));
        }
        let Some(command) = Command::parse(&message.subject) else {
            debug!("Unknown command '{}'", message.subject);
            return Ok(ControlFlow::Continue(Vec::new()));
        };

        let mod_mail = format!("/r/{}", self.config.subreddit);
        let receipts = match command {
            Command::Add | Command::ForceAdd => {
                let strict = command == Command::Add;
                if !strict {
                    self.platform
                        .send_direct_message(
                            &mod_mail,
                            "Force Add Detected",
                            &format!(
                                "The Force Add command has been used on the following link(s):\n\n{}",
                                message.body
                            ),
                        )
                        .await?;
                }
                let receipts = self.command_add(&message.body, strict).await?;
                self.platform
                    .send_direct_message(
                        sender,
                        "Add complete",
                        &format!("The add command has been completed on: {}", message.body),
                    )
                    .await?;
                receipts
            }
            Command::Remove => {
                warn!("The remove command is not supported");
                Vec::new()
            }
            Command::Rescan => self.command_rescan(&message.body).await?,
            Command::Reset => {
                self.tracker.reset();
                Vec::new()
            }
            Command::Stop => {
                self.platform
                    .send_direct_message(
                        &mod_mail,
                        "Stop Message Confirmed",
                        "NOTICE: The stop message has been issued and I have stopped running.",
                    )
                    .await?;
                warn!(
                    "The stop command has been issued by {}. If this was not sent by you, \
                     please check as to why before restarting.",
                    sender
                );
                return Ok(ControlFlow::Break(()));
            }
        };
        Ok(ControlFlow::Continue(receipts))
    }

    async fn command_add(&self, body: &str, strict: bool) -> Result<Vec<AwardReceipt>, CoreError> {
        let mut receipts = Vec::new();
        for fullname in self.linked_comment_ids(body) {
            match self.scan_comment(&fullname, strict).await {
                Ok(receipt) => receipts.extend(receipt),
                Err(e) if e.is_not_found() => info!("Skipping {}: {}", fullname, e),
                Err(e) => return Err(e),
            }
        }
        Ok(receipts)
    }

    async fn command_rescan(&self, body: &str) -> Result<Vec<AwardReceipt>, CoreError> {
        let mut receipts = Vec::new();
        for fullname in self.linked_comment_ids(body) {
            let bots_comment = match self.platform.fetch_by_id(&fullname).await {
                Ok(Thing::Comment(comment)) => comment,
                Ok(_) => continue,
                Err(e) if e.is_not_found() => {
                    info!("Skipping {}: {}", fullname, e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            receipts.extend(self.rescan_bot_reply(bots_comment).await?);
        }
        Ok(receipts)
    }
}

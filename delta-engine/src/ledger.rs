//! Applies a granted award to the platform's persistent records.
//!
//! The three updates (point display, monthly scoreboard, history page) are
//! independent writes with no transaction around them. The ledger does no
//! duplicate detection of its own; it relies on the eligibility engine's
//! subtree scan, so two cycles racing on stale state can double-award.

use crate::history::{record_history, HistoryEntry};
use crate::scoreboard::{load_scoreboard, month_page_for, render_scoreboard};
use chrono::{NaiveDate, Utc};
use deltabot_core::{fill_placeholders, BotConfig, Comment, CoreError, Platform};
use tracing::{debug, info, warn};

/// What an award changed. Any receipt means the sidebar scoreboard is stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwardReceipt {
    pub awardee: String,
    pub points: u32,
    pub first_award: bool,
    pub history_created: bool,
}

pub struct AwardLedger<'a, P: Platform + ?Sized> {
    platform: &'a P,
    config: &'a BotConfig,
}

impl<'a, P: Platform + ?Sized> AwardLedger<'a, P> {
    pub fn new(platform: &'a P, config: &'a BotConfig) -> Self {
        Self { platform, config }
    }

    /// Awards `awardee` for `comment`, the reply that granted the point.
    pub async fn award(&self, awardee: &str, comment: &Comment) -> Result<AwardReceipt, CoreError> {
        self.award_on(awardee, comment, Utc::now().date_naive()).await
    }

    pub async fn award_on(
        &self,
        awardee: &str,
        comment: &Comment,
        today: NaiveDate,
    ) -> Result<AwardReceipt, CoreError> {
        info!("Awarding point to {}", awardee);
        let (points, first_award) = self.adjust_points(awardee).await?;
        self.update_monthly_scoreboard(awardee, comment).await?;

        let entry = HistoryEntry {
            submission_title: comment.submission.title.clone(),
            submission_url: comment.submission.permalink.clone(),
            awarder: comment.author_name().to_string(),
            comment_url: comment.permalink.clone(),
            date: today,
        };
        let history_created =
            record_history(self.platform, &self.config.subreddit, awardee, &entry, points).await?;

        Ok(AwardReceipt {
            awardee: awardee.to_string(),
            points,
            first_award,
            history_created,
        })
    }

    /// Reads the current total (0 when absent), adds the increment, and
    /// writes it back with refreshed display text.
    async fn adjust_points(&self, awardee: &str) -> Result<(u32, bool), CoreError> {
        let flair = &self.config.flair;
        let current = self.platform.get_user_points(awardee).await?;
        let first_award = current.text.is_none();

        let (previous, mut css_class) = if first_award {
            self.send_first_time_message(awardee).await?;
            (0, String::new())
        } else {
            (current.count, current.css_class)
        };

        let points = previous.saturating_add(flair.point_increment);
        if !first_award && points == previous {
            warn!("{} is already at {} points, keeping flair as is", awardee, points);
            return Ok((points, first_award));
        }
        if !css_class.split_whitespace().any(|class| class == flair.css_class) {
            if !css_class.is_empty() {
                css_class.push(' ');
            }
            css_class.push_str(&flair.css_class);
        }

        let text = fill_placeholders(&flair.point_text, &[points.to_string()]);
        debug!("Setting {} to {} ({})", awardee, points, text);
        self.platform
            .set_user_points(awardee, points, &text, &css_class)
            .await?;
        Ok((points, first_award))
    }

    async fn send_first_time_message(&self, awardee: &str) -> Result<(), CoreError> {
        let body = fill_placeholders(
            &self.config.private_message,
            &[self.config.subreddit.as_str(), awardee],
        );
        self.platform
            .send_direct_message(awardee, "Congratulations on your first delta!", &body)
            .await
    }

    async fn update_monthly_scoreboard(
        &self,
        awardee: &str,
        comment: &Comment,
    ) -> Result<(), CoreError> {
        info!("Updating monthly scoreboard");
        let page = month_page_for(comment.created_utc);
        let mut scoreboard = load_scoreboard(self.platform, &page).await?;

        let entry = scoreboard.entry(awardee.to_string()).or_default();
        entry.links.push(format!(
            "[{}]({})",
            comment.submission.title, comment.permalink
        ));
        entry.score = entry.score.saturating_add(self.config.flair.point_increment);

        self.platform
            .put_page(
                &page,
                &render_scoreboard(&scoreboard),
                "Updating monthly scoreboard",
            )
            .await
    }
}

//! Per-user award history pages and the global tracker index.

use crate::scanner::unescape_entities;
use chrono::{Datelike, NaiveDate};
use deltabot_core::{first_int, CoreError, ErrorExt, Platform};
use regex::Regex;
use tracing::{info, warn};

pub const TRACKER_PAGE: &str = "delta_tracker";

pub fn history_page(user: &str) -> String {
    format!("user/{}", user)
}

/// One award as it appears on the awardee's history page.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub submission_title: String,
    pub submission_url: String,
    pub awarder: String,
    pub comment_url: String,
    pub date: NaiveDate,
}

impl HistoryEntry {
    fn sub_entry(&self) -> String {
        format!(
            "\n    1. [Awarded by /u/{}]({}?context=2) on {}/{}/{}",
            self.awarder,
            self.comment_url,
            self.date.month(),
            self.date.day(),
            self.date.year()
        )
    }

    fn link_line(&self, count: u32) -> String {
        format!(
            "* [{}]({}) ({})",
            self.submission_title, self.submission_url, count
        )
    }

    fn link_pattern(&self) -> Result<Regex, CoreError> {
        let pattern = format!(
            r"\* \[{}\]\({}\) \((\d+)\)",
            regex::escape(&self.submission_title),
            regex::escape(&self.submission_url)
        );
        Regex::new(&pattern).map_err(|e| CoreError::Internal {
            message: format!("history link pattern: {}", e),
        })
    }
}

pub fn delta_count_text(count: u32) -> String {
    if count == 1 {
        "1 delta".to_string()
    } else {
        format!("{} deltas", count)
    }
}

pub fn new_history_page(awardee: &str, entry: &HistoryEntry) -> String {
    format!(
        "/u/{} has received 1 delta for the following comments:\n\n{}{}",
        awardee,
        entry.link_line(1),
        entry.sub_entry()
    )
}

/// Adds `entry` to an existing page: bumps the counter of a matching link or
/// appends a new one, and rewrites the header count to `total`.
pub fn update_history_page(
    old: &str,
    entry: &HistoryEntry,
    total: u32,
) -> Result<String, CoreError> {
    let content = unescape_entities(old);
    let header = Regex::new(r"[0-9]+ deltas?").map_err(|e| CoreError::Internal {
        message: format!("history header pattern: {}", e),
    })?;
    let count_text = delta_count_text(total);
    let content = header
        .replacen(&content, 1, |_: &regex::Captures| count_text.clone())
        .into_owned();

    let link = entry.link_pattern()?;
    let updated = match link.captures(&content) {
        Some(caps) => {
            let previous = first_int(&caps[1]);
            let replacement = format!(
                "{}{}",
                entry.link_line(previous.saturating_add(1)),
                entry.sub_entry()
            );
            link.replacen(&content, 1, |_: &regex::Captures| replacement.clone())
                .into_owned()
        }
        None => format!("{}\n\n{}{}", content, entry.link_line(1), entry.sub_entry()),
    };
    Ok(updated)
}

fn tracker_line(subreddit: &str, awardee: &str) -> String {
    format!(
        "\n\n* /u/{} -- [Delta List](/r/{}/wiki/{})",
        awardee,
        subreddit,
        history_page(awardee)
    )
}

/// Writes `entry` to the awardee's history page. Returns true when the page
/// was created, in which case the user is also added to the tracker index.
///
/// Any failure reading the page is treated as "page does not exist".
pub async fn record_history<P: Platform + ?Sized>(
    platform: &P,
    subreddit: &str,
    awardee: &str,
    entry: &HistoryEntry,
    total: u32,
) -> Result<bool, CoreError> {
    info!("Updating wiki");
    let page = history_page(awardee);

    match platform.get_page(&page).await {
        Ok(old) => {
            let content = update_history_page(&old, entry, total)?;
            platform.put_page(&page, &content, "Updated delta links.").await?;
            return Ok(false);
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => {
            e.log_warn();
            warn!("Treating unreadable page {} as missing", page);
        }
    }

    platform
        .put_page(
            &page,
            &new_history_page(awardee, entry),
            "Created user's delta links page.",
        )
        .await?;

    let tracker = match platform.get_page(TRACKER_PAGE).await {
        Ok(text) => text,
        Err(e) if e.is_not_found() => String::new(),
        Err(e) => return Err(e),
    };
    let tracker = format!("{}{}", tracker, tracker_line(subreddit, awardee));
    platform
        .put_page(TRACKER_PAGE, &tracker, "Updated tracker page.")
        .await?;
    Ok(true)
}

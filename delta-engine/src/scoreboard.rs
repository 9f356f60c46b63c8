//! Monthly scoreboard pages and the sidebar top-ten table built from them.
//!
//! Page format, one block per user:
//!
//! ```text
//! ## username 3
//! * [Submission title](https://link)
//! * [Another](https://link)
//!
//! ```

use chrono::{DateTime, Datelike, Month, TimeZone, Utc};
use deltabot_core::{fill_placeholders, BotConfig, CoreError, Platform};
use std::collections::BTreeMap;
use tracing::{info, warn};

pub const SIDEBAR_PAGE: &str = "config/sidebar";
const SIDEBAR_DELIMITER: &str = "_____";
const TABLE_SIZE: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScoreboardEntry {
    pub score: u32,
    pub links: Vec<String>,
}

pub type Scoreboard = BTreeMap<String, ScoreboardEntry>;

pub fn month_page(year: i32, month: u32) -> String {
    format!("scoreboard_{}_{}", year, month)
}

/// Page for the month a comment was created in (UTC).
pub fn month_page_for(created_utc: i64) -> String {
    let date = Utc
        .timestamp_opt(created_utc, 0)
        .single()
        .unwrap_or_else(Utc::now);
    month_page(date.year(), date.month())
}

pub fn parse_scoreboard(text: &str) -> Result<Scoreboard, CoreError> {
    let mut scoreboard = Scoreboard::new();
    let mut current: Option<String> = None;

    for line in text.lines() {
        if line.starts_with("##") {
            let mut fields = line.split_whitespace().skip(1);
            let (Some(user), Some(score)) = (fields.next(), fields.next()) else {
                return Err(CoreError::InvalidInput {
                    message: format!("malformed scoreboard header: {:?}", line),
                });
            };
            let score = score.parse::<u32>().map_err(|_| CoreError::InvalidInput {
                message: format!("malformed scoreboard score: {:?}", line),
            })?;
            scoreboard.insert(
                user.to_string(),
                ScoreboardEntry {
                    score,
                    links: Vec::new(),
                },
            );
            current = Some(user.to_string());
        } else if !line.is_empty() {
            match current.as_ref().and_then(|user| scoreboard.get_mut(user)) {
                Some(entry) => entry.links.push(line.get(2..).unwrap_or_default().to_string()),
                None => warn!("Ignoring scoreboard line outside a user block: {:?}", line),
            }
        }
    }
    Ok(scoreboard)
}

pub fn render_scoreboard(scoreboard: &Scoreboard) -> String {
    let mut text = String::new();
    for (user, entry) in scoreboard {
        text.push_str(&format!("## {} {}\n", user, entry.score));
        for link in &entry.links {
            text.push_str(&format!("* {}\n", link));
        }
        text.push('\n');
    }
    text
}

/// Loads a month's scoreboard. A missing page is an empty scoreboard.
pub async fn load_scoreboard<P: Platform + ?Sized>(
    platform: &P,
    page: &str,
) -> Result<Scoreboard, CoreError> {
    match platform.get_page(page).await {
        Ok(text) => parse_scoreboard(&text),
        Err(e) if e.is_not_found() => Ok(Scoreboard::new()),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedUser {
    pub user: String,
    pub points_text: String,
}

/// Highest scores first, padded with placeholder rows to ten.
pub fn top_ten(scoreboard: &Scoreboard, point_text: &str) -> Vec<RankedUser> {
    let mut ranked: Vec<(&String, &ScoreboardEntry)> = scoreboard.iter().collect();
    ranked.sort_by(|a, b| b.1.score.cmp(&a.1.score).then_with(|| a.0.cmp(b.0)));

    let mut rows: Vec<RankedUser> = ranked
        .into_iter()
        .take(TABLE_SIZE)
        .map(|(user, entry)| RankedUser {
            user: user.clone(),
            points_text: fill_placeholders(point_text, &[entry.score.to_string()]),
        })
        .collect();
    while rows.len() < TABLE_SIZE {
        rows.push(RankedUser {
            user: "none".to_string(),
            points_text: "no score".to_string(),
        });
    }
    rows
}

pub fn render_table(rows: &[RankedUser], month: Month, config: &BotConfig) -> String {
    let templates = &config.scoreboard;
    let subreddit = config.subreddit.as_str();
    let mut table = format!("\n\n# Top Ten Viewchangers ({})", month.name());
    table.push_str(&templates.table_head);

    for (index, row) in rows.iter().enumerate() {
        let line = if index == 0 {
            fill_placeholders(
                &templates.table_leader_entry,
                &[
                    row.user.as_str(),
                    row.points_text.as_str(),
                    subreddit,
                    row.user.as_str(),
                ],
            )
        } else {
            let rank = (index + 1).to_string();
            fill_placeholders(
                &templates.table_entry,
                &[
                    rank.as_str(),
                    row.user.as_str(),
                    row.points_text.as_str(),
                    subreddit,
                    row.user.as_str(),
                ],
            )
        };
        table.push_str(&line);
    }
    table
}

/// Replaces the last delimited section of the sidebar with `table`.
pub fn splice_sidebar(old: &str, table: &str) -> String {
    let mut sections: Vec<&str> = old.split(SIDEBAR_DELIMITER).collect();
    if sections.len() < 2 {
        sections.push(table);
    } else if let Some(last) = sections.last_mut() {
        *last = table;
    }
    sections.join(SIDEBAR_DELIMITER).replace("&amp;", "&")
}

/// Rebuilds the sidebar top-ten table from the scoreboard of `now`'s month.
pub async fn refresh_sidebar<P: Platform + ?Sized>(
    platform: &P,
    config: &BotConfig,
    now: DateTime<Utc>,
) -> Result<(), CoreError> {
    info!("Updating scoreboard");
    let scoreboard = load_scoreboard(platform, &month_page(now.year(), now.month())).await?;
    let rows = top_ten(&scoreboard, &config.flair.point_text);
    let month = Month::try_from(now.month() as u8).map_err(|_| CoreError::Internal {
        message: format!("invalid month {}", now.month()),
    })?;
    let table = render_table(&rows, month, config);

    let sidebar = match platform.get_page(SIDEBAR_PAGE).await {
        Ok(text) => text,
        Err(e) if e.is_not_found() => String::new(),
        Err(e) => return Err(e),
    };
    platform
        .put_page(
            SIDEBAR_PAGE,
            &splice_sidebar(&sidebar, &table),
            "Updating scoreboard",
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Scoreboard {
        let mut scoreboard = Scoreboard::new();
        scoreboard.insert(
            "alice".to_string(),
            ScoreboardEntry {
                score: 2,
                links: vec![
                    "[Title one](https://reddit.com/r/cmv/comments/a/b/c)".to_string(),
                    "[Title two](https://reddit.com/r/cmv/comments/d/e/f)".to_string(),
                ],
            },
        );
        scoreboard.insert(
            "bob".to_string(),
            ScoreboardEntry {
                score: 1,
                links: vec!["[Other](https://reddit.com/r/cmv/comments/g/h/i)".to_string()],
            },
        );
        scoreboard
    }

    #[test]
    fn test_round_trip() {
        let scoreboard = sample();
        let text = render_scoreboard(&scoreboard);
        assert!(text.starts_with("## alice 2\n* [Title one]"));
        assert_eq!(parse_scoreboard(&text).unwrap(), scoreboard);
    }

    #[test]
    fn test_parse_empty_page() {
        assert!(parse_scoreboard("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_bad_header() {
        assert!(parse_scoreboard("## alice\n* link\n").is_err());
        assert!(parse_scoreboard("## alice many\n").is_err());
    }

    #[test]
    fn test_month_page_for_timestamp() {
        // 2024-02-29T12:00:00Z
        assert_eq!(month_page_for(1_709_208_000), "scoreboard_2024_2");
        assert_eq!(month_page(2013, 11), "scoreboard_2013_11");
    }

    #[test]
    fn test_top_ten_orders_and_pads() {
        let rows = top_ten(&sample(), "{}∆");
        assert_eq!(rows.len(), 10);
        assert_eq!(rows[0].user, "alice");
        assert_eq!(rows[0].points_text, "2∆");
        assert_eq!(rows[1].user, "bob");
        assert_eq!(rows[2].user, "none");
        assert_eq!(rows[9].points_text, "no score");
    }

    #[test]
    fn test_splice_sidebar_replaces_last_section() {
        let old = "Rules &amp; info_____Links_____old table";
        assert_eq!(
            splice_sidebar(old, "new table"),
            "Rules & info_____Links_____new table"
        );
        assert_eq!(splice_sidebar("only rules", "t"), "only rules_____t");
    }
}

use serde::{Deserialize, Serialize};

pub const COMMENT_PREFIX: &str = "t1_";
pub const SUBMISSION_PREFIX: &str = "t3_";
pub const MESSAGE_PREFIX: &str = "t4_";

/// The submission a comment belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRef {
    /// Fullname, e.g. `t3_abc123`.
    pub id: String,
    pub title: String,
    pub author: Option<String>,
    pub permalink: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    /// Base-36 id without the kind prefix.
    pub id: String,
    pub body: String,
    /// `None` when the account was deleted.
    pub author: Option<String>,
    /// Fullname of the parent (`t1_` comment or `t3_` submission).
    pub parent_id: String,
    pub submission: SubmissionRef,
    pub created_utc: i64,
    pub permalink: String,
    pub replies: Vec<Comment>,
}

impl Comment {
    pub fn fullname(&self) -> String {
        format!("{}{}", COMMENT_PREFIX, self.id)
    }

    /// True for a top-level comment, i.e. a direct reply to the submission.
    pub fn is_root(&self) -> bool {
        self.parent_id.starts_with(SUBMISSION_PREFIX)
    }

    pub fn author_name(&self) -> &str {
        self.author.as_deref().unwrap_or("[deleted]")
    }

    pub fn is_authored_by(&self, username: &str) -> bool {
        self.author
            .as_deref()
            .is_some_and(|author| author.eq_ignore_ascii_case(username))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub author: Option<String>,
    pub subject: String,
    pub body: String,
}

impl Message {
    pub fn fullname(&self) -> String {
        format!("{}{}", MESSAGE_PREFIX, self.id)
    }
}

/// Anything `Platform::fetch_by_id` can resolve.
#[derive(Debug, Clone, PartialEq)]
pub enum Thing {
    Comment(Comment),
    Message(Message),
    Submission(SubmissionRef),
}

impl Thing {
    pub fn into_comment(self) -> Option<Comment> {
        match self {
            Thing::Comment(comment) => Some(comment),
            _ => None,
        }
    }
}

/// Unread inbox entry, classified once when fetched.
#[derive(Debug, Clone, PartialEq)]
pub enum InboxItem {
    CommentReply(Comment),
    DirectMessage(Message),
}

impl InboxItem {
    pub fn fullname(&self) -> String {
        match self {
            InboxItem::CommentReply(comment) => comment.fullname(),
            InboxItem::DirectMessage(message) => message.fullname(),
        }
    }
}

/// Handle on a reply the bot posted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplyHandle {
    pub fullname: String,
}

impl ReplyHandle {
    pub fn new(fullname: impl Into<String>) -> Self {
        Self {
            fullname: fullname.into(),
        }
    }
}

/// A user's point display as stored on the platform (user flair).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPoints {
    pub count: u32,
    /// Raw display text; `None` when the user has never been awarded.
    pub text: Option<String>,
    pub css_class: String,
}

/// Returns the first unsigned integer embedded in `text`, or 0 when there is
/// none. A run of digits too large for `u32` reads as `u32::MAX`.
pub fn first_int(text: &str) -> u32 {
    text.split(|c: char| !c.is_ascii_digit())
        .find(|part| !part.is_empty())
        .map(|digits| digits.parse().unwrap_or(u32::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(parent_id: &str) -> Comment {
        Comment {
            id: "c1".to_string(),
            body: "body".to_string(),
            author: Some("Alice".to_string()),
            parent_id: parent_id.to_string(),
            submission: SubmissionRef {
                id: "t3_s1".to_string(),
                title: "Title".to_string(),
                author: Some("op".to_string()),
                permalink: "https://www.reddit.com/r/test/comments/s1/title/".to_string(),
            },
            created_utc: 0,
            permalink: String::new(),
            replies: Vec::new(),
        }
    }

    #[test]
    fn test_root_detection() {
        assert!(comment("t3_s1").is_root());
        assert!(!comment("t1_p1").is_root());
    }

    #[test]
    fn test_author_matching_ignores_case() {
        let c = comment("t3_s1");
        assert!(c.is_authored_by("alice"));
        assert!(!c.is_authored_by("bob"));
        assert_eq!(c.fullname(), "t1_c1");
    }

    #[test]
    fn test_first_int() {
        assert_eq!(first_int("12∆"), 12);
        assert_eq!(first_int("Points: 7 deltas, 3 more"), 7);
        assert_eq!(first_int("no score"), 0);
        assert_eq!(first_int(""), 0);
        assert_eq!(first_int("99999999999999∆"), u32::MAX);
        assert_eq!(first_int("4294967295∆"), u32::MAX);
    }
}

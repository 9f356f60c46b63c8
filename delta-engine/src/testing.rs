//! In-memory `Platform` for tests. Comments are stored flat and reply trees
//! are assembled on fetch, so replies the bot posts show up in later scans.

use crate::dedup::compare_fullnames;
use async_trait::async_trait;
use deltabot_core::{
    AccountConfig, BotConfig, Comment, CoreError, FlairConfig, InboxItem, MessagesConfig, Platform,
    RedditApiError, ReplyHandle, ScoreboardConfig, SubmissionRef, Thing, UserPoints,
    COMMENT_PREFIX,
};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;

pub const BOT_NAME: &str = "DeltaBot";
pub const SUBREDDIT: &str = "changemyview";

pub const SUBMISSION_ID: &str = "t3_s1";
pub const SUBMISSION_AUTHOR: &str = "op_user";
/// 2024-02-29T12:00:00Z
pub const CREATED_UTC: i64 = 1_709_208_000;

pub fn submission() -> SubmissionRef {
    SubmissionRef {
        id: SUBMISSION_ID.to_string(),
        title: "CMV: Testing is worthwhile".to_string(),
        author: Some(SUBMISSION_AUTHOR.to_string()),
        permalink: "https://www.reddit.com/r/changemyview/comments/s1/cmv_testing/".to_string(),
    }
}

/// A comment on the shared test submission.
pub fn comment(id: &str, parent_id: &str, author: Option<&str>, body: &str) -> Comment {
    Comment {
        id: id.to_string(),
        body: body.to_string(),
        author: author.map(str::to_string),
        parent_id: parent_id.to_string(),
        submission: submission(),
        created_utc: CREATED_UTC,
        permalink: format!(
            "https://www.reddit.com/r/changemyview/comments/s1/cmv_testing/{}",
            id
        ),
        replies: Vec::new(),
    }
}

/// A valid configuration: tokens `∆` and `!delta`, minimum body length 56.
pub fn sample_config(cursor_path: impl Into<PathBuf>) -> BotConfig {
    BotConfig {
        subreddit: SUBREDDIT.to_string(),
        sleep_time: 0,
        last_comment_filename: cursor_path.into(),
        tokens: vec!["∆".to_string(), "!delta".to_string()],
        minimum_comment_length: 50,
        private_message: "Welcome to /r/{}, /u/{}! You earned your first delta.".to_string(),
        account: AccountConfig {
            username: BOT_NAME.to_string(),
            password: "hunter2".to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            user_agent: "deltabot-tests".to_string(),
        },
        messages: MessagesConfig {
            append_to_all_messages: "\n\n[Delta System Explained](/r/changemyview/wiki/deltasystem)"
                .to_string(),
            confirmation: vec![
                "Confirmed: 1 delta awarded to /u/{}. [History](/r/{}/wiki/user/{})".to_string(),
                "Delta confirmed for /u/{}. [History](/r/{}/wiki/user/{})".to_string(),
            ],
            broken_rule: vec!["You cannot award OP a delta.".to_string()],
            already_awarded: vec![
                "You have already awarded /u/{} a delta for this comment.".to_string(),
            ],
            too_little_text: vec![
                "This delta for /u/{} has been rejected: please explain your change of view."
                    .to_string(),
            ],
        },
        flair: FlairConfig::default(),
        scoreboard: ScoreboardConfig {
            table_head: "\n\n| Rank | Username | Deltas |\n| :------: | ------ | :------: |"
                .to_string(),
            table_leader_entry: "\n|1|**/u/{}**|[{}](/r/{}/wiki/user/{})|".to_string(),
            table_entry: "\n|{}|/u/{}|[{}](/r/{}/wiki/user/{})|".to_string(),
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedReply {
    pub handle: ReplyHandle,
    pub parent: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectMessage {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

#[derive(Default)]
struct State {
    comments: Vec<Comment>,
    unread: Vec<InboxItem>,
    read: Vec<String>,
    stream: Vec<Comment>,
    replies: Vec<PostedReply>,
    edits: Vec<(ReplyHandle, String)>,
    deleted: Vec<ReplyHandle>,
    distinguished: Vec<ReplyHandle>,
    points: HashMap<String, UserPoints>,
    pages: HashMap<String, String>,
    page_writes: Vec<(String, String)>,
    failing_pages: HashSet<String>,
    messages: Vec<DirectMessage>,
    moderators: Vec<String>,
    fetches: usize,
    next_id: usize,
}

pub struct MockPlatform {
    bot_name: String,
    state: Mutex<State>,
}

impl MockPlatform {
    pub fn new(bot_name: &str) -> Self {
        Self {
            bot_name: bot_name.to_string(),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn add_comment(&self, comment: Comment) {
        self.state().comments.push(comment);
    }

    /// Adds to the store and to the subreddit comment stream.
    pub fn add_stream_comment(&self, comment: Comment) {
        let mut state = self.state();
        state.comments.push(comment.clone());
        state.stream.push(comment);
    }

    pub fn push_unread(&self, item: InboxItem) {
        self.state().unread.push(item);
    }

    pub fn set_page(&self, page: &str, text: &str) {
        self.state().pages.insert(page.to_string(), text.to_string());
    }

    pub fn fail_page(&self, page: &str) {
        self.state().failing_pages.insert(page.to_string());
    }

    pub fn set_points(&self, user: &str, points: UserPoints) {
        self.state().points.insert(user.to_string(), points);
    }

    pub fn add_moderator(&self, user: &str) {
        self.state().moderators.push(user.to_string());
    }

    pub fn replies(&self) -> Vec<PostedReply> {
        self.state().replies.clone()
    }

    pub fn edits(&self) -> Vec<(ReplyHandle, String)> {
        self.state().edits.clone()
    }

    pub fn deleted(&self) -> Vec<ReplyHandle> {
        self.state().deleted.clone()
    }

    pub fn distinguished(&self) -> Vec<ReplyHandle> {
        self.state().distinguished.clone()
    }

    pub fn page(&self, page: &str) -> Option<String> {
        self.state().pages.get(page).cloned()
    }

    pub fn page_writes(&self) -> Vec<(String, String)> {
        self.state().page_writes.clone()
    }

    pub fn points(&self, user: &str) -> Option<UserPoints> {
        self.state().points.get(user).cloned()
    }

    pub fn direct_messages(&self) -> Vec<DirectMessage> {
        self.state().messages.clone()
    }

    pub fn read_items(&self) -> Vec<String> {
        self.state().read.clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.state().fetches
    }

    fn tree(comments: &[Comment], fullname: &str) -> Option<Comment> {
        let mut root = comments.iter().find(|c| c.fullname() == fullname)?.clone();
        // Iterative assembly: each stacked pointer is a path of child indices.
        let mut pending: Vec<Vec<usize>> = vec![Vec::new()];
        while let Some(path) = pending.pop() {
            let mut node = &mut root;
            for &index in &path {
                node = &mut node.replies[index];
            }
            let name = node.fullname();
            node.replies = comments
                .iter()
                .filter(|c| c.parent_id == name)
                .cloned()
                .collect();
            for index in 0..node.replies.len() {
                let mut child = path.clone();
                child.push(index);
                pending.push(child);
            }
        }
        Some(root)
    }

    fn transient(resource: &str) -> CoreError {
        CoreError::RedditApi(RedditApiError::EndpointUnavailable {
            endpoint: resource.to_string(),
        })
    }
}

#[async_trait]
impl Platform for MockPlatform {
    async fn fetch_by_id(&self, fullname: &str) -> Result<Thing, CoreError> {
        let mut state = self.state();
        state.fetches += 1;
        if fullname == SUBMISSION_ID {
            return Ok(Thing::Submission(submission()));
        }
        Self::tree(&state.comments, fullname)
            .map(Thing::Comment)
            .ok_or_else(|| CoreError::not_found(fullname))
    }

    async fn fetch_unread(&self) -> Result<Vec<InboxItem>, CoreError> {
        let state = self.state();
        Ok(state
            .unread
            .iter()
            .filter(|item| !state.read.contains(&item.fullname()))
            .cloned()
            .collect())
    }

    async fn mark_read(&self, item: &InboxItem) -> Result<(), CoreError> {
        self.state().read.push(item.fullname());
        Ok(())
    }

    async fn fetch_new_comments(&self, before: Option<&str>) -> Result<Vec<Comment>, CoreError> {
        let state = self.state();
        Ok(state
            .stream
            .iter()
            .filter(|c| match before {
                Some(cursor) => compare_fullnames(&c.fullname(), cursor) == Ordering::Greater,
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn post_reply(&self, parent_fullname: &str, text: &str) -> Result<ReplyHandle, CoreError> {
        let mut state = self.state();
        state.next_id += 1;
        let id = format!("zbot{}", state.next_id);
        let submission = state
            .comments
            .iter()
            .find(|c| c.fullname() == parent_fullname)
            .map(|c| c.submission.clone())
            .unwrap_or_else(submission);

        let mut reply = comment(&id, parent_fullname, Some(&self.bot_name), text);
        reply.submission = submission;
        let handle = ReplyHandle::new(format!("{}{}", COMMENT_PREFIX, id));
        state.comments.push(reply);
        state.replies.push(PostedReply {
            handle: handle.clone(),
            parent: parent_fullname.to_string(),
            text: text.to_string(),
        });
        Ok(handle)
    }

    async fn edit_reply(&self, handle: &ReplyHandle, text: &str) -> Result<(), CoreError> {
        let mut state = self.state();
        let stored = state
            .comments
            .iter_mut()
            .find(|c| c.fullname() == handle.fullname)
            .ok_or_else(|| CoreError::not_found(handle.fullname.clone()))?;
        stored.body = text.to_string();
        state.edits.push((handle.clone(), text.to_string()));
        Ok(())
    }

    async fn delete_reply(&self, handle: &ReplyHandle) -> Result<(), CoreError> {
        let mut state = self.state();
        state.comments.retain(|c| c.fullname() != handle.fullname);
        state.deleted.push(handle.clone());
        Ok(())
    }

    async fn distinguish(&self, handle: &ReplyHandle) -> Result<(), CoreError> {
        self.state().distinguished.push(handle.clone());
        Ok(())
    }

    async fn get_user_points(&self, username: &str) -> Result<UserPoints, CoreError> {
        Ok(self.state().points.get(username).cloned().unwrap_or_default())
    }

    async fn set_user_points(
        &self,
        username: &str,
        count: u32,
        text: &str,
        css_class: &str,
    ) -> Result<(), CoreError> {
        self.state().points.insert(
            username.to_string(),
            UserPoints {
                count,
                text: Some(text.to_string()),
                css_class: css_class.to_string(),
            },
        );
        Ok(())
    }

    async fn get_page(&self, page: &str) -> Result<String, CoreError> {
        let state = self.state();
        if state.failing_pages.contains(page) {
            return Err(Self::transient(page));
        }
        state
            .pages
            .get(page)
            .cloned()
            .ok_or_else(|| CoreError::not_found(page))
    }

    async fn put_page(&self, page: &str, text: &str, change_note: &str) -> Result<(), CoreError> {
        let mut state = self.state();
        state.pages.insert(page.to_string(), text.to_string());
        state
            .page_writes
            .push((page.to_string(), change_note.to_string()));
        Ok(())
    }

    async fn send_direct_message(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), CoreError> {
        self.state().messages.push(DirectMessage {
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }

    async fn list_moderators(&self) -> Result<Vec<String>, CoreError> {
        Ok(self.state().moderators.clone())
    }
}

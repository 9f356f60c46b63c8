//! The boundary between the bot and the forum it moderates.

use crate::{Comment, CoreError, InboxItem, ReplyHandle, Thing, UserPoints};
use async_trait::async_trait;

#[async_trait]
pub trait Platform: Send + Sync {
    /// Resolves a fullname. Comments come back with their reply subtree.
    /// Fails with `CoreError::NotFound` when the item is deleted or inaccessible.
    async fn fetch_by_id(&self, fullname: &str) -> Result<Thing, CoreError>;

    async fn fetch_unread(&self) -> Result<Vec<InboxItem>, CoreError>;
    async fn mark_read(&self, item: &InboxItem) -> Result<(), CoreError>;

    /// Subreddit comment stream, oldest first, newer than `before` when given.
    async fn fetch_new_comments(&self, before: Option<&str>) -> Result<Vec<Comment>, CoreError>;

    async fn post_reply(&self, parent_fullname: &str, text: &str)
        -> Result<ReplyHandle, CoreError>;
    async fn edit_reply(&self, handle: &ReplyHandle, text: &str) -> Result<(), CoreError>;
    async fn delete_reply(&self, handle: &ReplyHandle) -> Result<(), CoreError>;
    async fn distinguish(&self, handle: &ReplyHandle) -> Result<(), CoreError>;

    async fn get_user_points(&self, username: &str) -> Result<UserPoints, CoreError>;
    async fn set_user_points(
        &self,
        username: &str,
        count: u32,
        text: &str,
        css_class: &str,
    ) -> Result<(), CoreError>;

    /// Fails with `CoreError::NotFound` when the page does not exist.
    async fn get_page(&self, page: &str) -> Result<String, CoreError>;
    async fn put_page(&self, page: &str, text: &str, change_note: &str) -> Result<(), CoreError>;

    async fn send_direct_message(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), CoreError>;

    async fn list_moderators(&self) -> Result<Vec<String>, CoreError>;
}

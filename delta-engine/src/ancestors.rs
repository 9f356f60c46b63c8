//! Walks parent links over the platform's fetch primitive.

use deltabot_core::{Comment, CoreError, Platform, Thing};
use tracing::debug;

/// What sits directly above a comment.
#[derive(Debug, Clone)]
pub enum Parent {
    Comment(Comment),
    /// The comment is top-level; its parent is the submission itself.
    Submission,
}

pub struct AncestorResolver<'a, P: Platform + ?Sized> {
    platform: &'a P,
}

impl<'a, P: Platform + ?Sized> AncestorResolver<'a, P> {
    pub fn new(platform: &'a P) -> Self {
        Self { platform }
    }

    /// Fetches a comment (with replies) by fullname. Anything that is not a
    /// comment counts as not found.
    pub async fn fetch_comment(&self, fullname: &str) -> Result<Comment, CoreError> {
        match self.platform.fetch_by_id(fullname).await? {
            Thing::Comment(comment) => Ok(comment),
            _ => Err(CoreError::not_found(format!("comment {}", fullname))),
        }
    }

    pub async fn parent_of(&self, comment: &Comment) -> Result<Parent, CoreError> {
        if comment.is_root() {
            return Ok(Parent::Submission);
        }
        let parent = self.fetch_comment(&comment.parent_id).await?;
        Ok(Parent::Comment(parent))
    }

    /// Walks upward from `start` until the top-level comment. `start` itself
    /// is returned when it already is top-level.
    pub async fn root_of(&self, start: &Comment) -> Result<Comment, CoreError> {
        let mut current = start.clone();
        let mut hops = 0usize;
        while !current.is_root() {
            current = self.fetch_comment(&current.parent_id).await?;
            hops += 1;
        }
        debug!("Resolved root {} after {} hop(s)", current.fullname(), hops);
        Ok(current)
    }
}

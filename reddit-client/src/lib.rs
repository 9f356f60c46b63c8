pub mod api;
pub mod auth;
pub mod rate_limiter;
pub mod retry;


pub use api::RedditApiClient;
pub use auth::{AuthState, PasswordAuthenticator, RedditToken};

use api::{
    collapsed_ids, comments_in, graft_replies, more_children_in, FlairList, JsonEnvelope,
    RedditListing, RedditMessageData, RedditPostData, UserList, WikiPage,
};
use async_trait::async_trait;
use deltabot_core::{
    first_int, AccountConfig, BotConfig, Comment, CoreError, InboxItem, Message, Platform,
    RedditApiError, ReplyHandle, SubmissionRef, Thing, UserPoints, COMMENT_PREFIX,
    MESSAGE_PREFIX, SUBMISSION_PREFIX,
};
use std::collections::HashSet;
use std::future::Future;
use std::sync::RwLock;
use tracing::{debug, info, warn};

/// Most ids `/api/morechildren` accepts per call.
const MORE_CHILDREN_BATCH: usize = 100;

/// Reddit account session scoped to one subreddit.
pub struct RedditClient {
    api: RedditApiClient,
    authenticator: PasswordAuthenticator,
    subreddit: String,
    token: RwLock<Option<RedditToken>>,
}

impl RedditClient {
    pub fn new(account: &AccountConfig, subreddit: &str) -> Result<Self, CoreError> {
        Ok(Self {
            api: RedditApiClient::new(account.user_agent.clone())?,
            authenticator: PasswordAuthenticator::new(account)?,
            subreddit: subreddit.to_string(),
            token: RwLock::new(None),
        })
    }

    pub fn from_config(config: &BotConfig) -> Result<Self, CoreError> {
        Self::new(&config.account, &config.subreddit)
    }

    pub fn api(&self) -> &RedditApiClient {
        &self.api
    }

    pub fn subreddit(&self) -> &str {
        &self.subreddit
    }

    pub async fn authenticate(&self) -> Result<(), CoreError> {
        let token = self.authenticator.request_token(self.api.http_client()).await?;
        info!("Authenticated, token scopes: {}", token.scope.join(" "));
        self.set_token(token);
        Ok(())
    }

    pub fn set_token(&self, token: RedditToken) {
        let mut slot = self.token.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(token);
    }

    fn current_token(&self) -> Option<RedditToken> {
        self.token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn get_auth_state(&self) -> AuthState {
        AuthState::of(self.current_token().as_ref())
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.get_auth_state(), AuthState::Authenticated { .. })
    }

    pub fn needs_refresh(&self) -> bool {
        self.current_token()
            .map(|token| token.needs_refresh())
            .unwrap_or(false)
    }

    /// A usable access token, logging in again when missing or about to expire.
    async fn access_token(&self) -> Result<String, CoreError> {
        match self.current_token() {
            Some(token) if !token.needs_refresh() => Ok(token.access_token),
            _ => {
                debug!("Access token missing or expiring, re-authenticating");
                self.authenticate().await?;
                self.current_token()
                    .map(|token| token.access_token)
                    .ok_or_else(|| {
                        CoreError::RedditApi(RedditApiError::AuthenticationFailed {
                            reason: "no token after login".to_string(),
                        })
                    })
            }
        }
    }

    /// Runs `operation` with a token; a rejected token triggers one re-login.
    async fn authorized<T, F, Fut>(&self, operation: F) -> Result<T, CoreError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let token = self.access_token().await?;
        match operation(token).await {
            Err(CoreError::RedditApi(RedditApiError::InvalidToken)) => {
                warn!("Access token rejected, logging in again");
                self.authenticate().await?;
                let token = self.access_token().await?;
                operation(token).await
            }
            other => other,
        }
    }

    fn sub_endpoint(&self, path: &str) -> String {
        format!("/r/{}/{}", self.subreddit, path)
    }

    async fn fetch_comment(&self, fullname: &str) -> Result<Comment, CoreError> {
        let query = [("id", fullname)];
        let info: RedditListing<serde_json::Value> = self
            .authorized(move |token| async move {
                self.api.get_json("/api/info", &token, &query).await
            })
            .await?;
        let stub = comments_in(info)
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::not_found(fullname))?;
        let link_id = stub
            .link_id
            .clone()
            .ok_or_else(|| CoreError::RedditApi(RedditApiError::InvalidResponse {
                details: format!("{} has no link_id", fullname),
            }))?;

        // The comment page carries the submission and the reply tree.
        let article = link_id.trim_start_matches(SUBMISSION_PREFIX).to_string();
        let endpoint = format!("/comments/{}", article);
        let endpoint = endpoint.as_str();
        let comment_id = stub.id.clone();
        let page_query = [("comment", comment_id.as_str()), ("limit", "500")];
        let (post, comments): (
            RedditListing<RedditPostData>,
            RedditListing<serde_json::Value>,
        ) = self
            .authorized(move |token| async move {
                self.api.get_json(endpoint, &token, &page_query).await
            })
            .await?;

        let submission: SubmissionRef = post
            .data
            .children
            .into_iter()
            .next()
            .map(|child| child.data.into())
            .ok_or_else(|| CoreError::not_found(link_id.clone()))?;

        let collapsed = collapsed_ids(&comments.data.children);
        let mut comment = comments_in(comments)
            .into_iter()
            .find(|data| data.id == comment_id)
            .map(|data| data.into_comment(Some(&submission)))
            .ok_or_else(|| CoreError::not_found(fullname))?;
        if !collapsed.is_empty() {
            self.expand_collapsed(&mut comment, &submission, collapsed)
                .await?;
        }
        Ok(comment)
    }

    /// Loads replies hidden behind "more" stubs and grafts them into `root`.
    async fn expand_collapsed(
        &self,
        root: &mut Comment,
        submission: &SubmissionRef,
        mut pending: Vec<String>,
    ) -> Result<(), CoreError> {
        let mut requested = HashSet::new();
        while !pending.is_empty() {
            let take = pending.len().min(MORE_CHILDREN_BATCH);
            let batch: Vec<String> = pending
                .drain(..take)
                .filter(|id| requested.insert(id.clone()))
                .collect();
            if batch.is_empty() {
                continue;
            }
            let children = batch.join(",");
            let query = [
                ("api_type", "json"),
                ("link_id", submission.id.as_str()),
                ("children", children.as_str()),
                ("limit_children", "false"),
            ];
            let envelope: JsonEnvelope = self
                .authorized(move |token| async move {
                    self.api.get_json("/api/morechildren", &token, &query).await
                })
                .await?;
            let (loaded, more) = more_children_in(envelope.into_result("/api/morechildren")?);
            let loaded: Vec<Comment> = loaded
                .into_iter()
                .map(|data| data.into_comment(Some(submission)))
                .collect();
            let grafted = graft_replies(root, loaded);
            debug!("Expanded {} collapsed replies under {}", grafted, root.fullname());
            pending.extend(more);
        }
        Ok(())
    }

    async fn fetch_submission(&self, fullname: &str) -> Result<SubmissionRef, CoreError> {
        let query = [("id", fullname)];
        let info: RedditListing<RedditPostData> = self
            .authorized(move |token| async move {
                self.api.get_json("/api/info", &token, &query).await
            })
            .await?;
        info.data
            .children
            .into_iter()
            .next()
            .map(|child| child.data.into())
            .ok_or_else(|| CoreError::not_found(fullname))
    }

    async fn fetch_message(&self, fullname: &str) -> Result<Message, CoreError> {
        let id = fullname.trim_start_matches(MESSAGE_PREFIX);
        let endpoint = format!("/message/messages/{}", id);
        let endpoint = endpoint.as_str();
        let listing: RedditListing<RedditMessageData> = self
            .authorized(move |token| async move {
                self.api.get_json(endpoint, &token, &[]).await
            })
            .await?;
        listing
            .data
            .children
            .into_iter()
            .map(|child| child.data)
            .find(|data| data.id == id)
            .map(Message::from)
            .ok_or_else(|| CoreError::not_found(fullname))
    }

    async fn post_api(
        &self,
        endpoint: &str,
        form: &[(&str, &str)],
    ) -> Result<Option<serde_json::Value>, CoreError> {
        self.authorized(move |token| async move { self.api.post_api(endpoint, &token, form).await })
            .await
    }

    async fn post_plain(&self, endpoint: &str, form: &[(&str, &str)]) -> Result<(), CoreError> {
        let _: serde_json::Value = self
            .authorized(move |token| async move { self.api.post_form(endpoint, &token, form).await })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Platform for RedditClient {
    async fn fetch_by_id(&self, fullname: &str) -> Result<Thing, CoreError> {
        if fullname.starts_with(COMMENT_PREFIX) {
            self.fetch_comment(fullname).await.map(Thing::Comment)
        } else if fullname.starts_with(SUBMISSION_PREFIX) {
            self.fetch_submission(fullname).await.map(Thing::Submission)
        } else if fullname.starts_with(MESSAGE_PREFIX) {
            self.fetch_message(fullname).await.map(Thing::Message)
        } else {
            Err(CoreError::InvalidInput {
                message: format!("unsupported fullname {}", fullname),
            })
        }
    }

    async fn fetch_unread(&self) -> Result<Vec<InboxItem>, CoreError> {
        let query = [("limit", "100")];
        let listing: RedditListing<serde_json::Value> = self
            .authorized(move |token| async move {
                self.api.get_json("/message/unread", &token, &query).await
            })
            .await?;

        let mut items = Vec::new();
        for child in listing.data.children {
            let item = match child.kind.as_str() {
                "t1" => serde_json::from_value::<api::RedditCommentData>(child.data)
                    .map(|data| InboxItem::CommentReply(data.into_comment(None))),
                "t4" => serde_json::from_value::<RedditMessageData>(child.data)
                    .map(|data| InboxItem::DirectMessage(data.into())),
                other => {
                    debug!("Ignoring inbox item of kind {}", other);
                    continue;
                }
            };
            match item {
                Ok(item) => items.push(item),
                Err(e) => warn!("Skipping unparseable inbox item: {}", e),
            }
        }
        Ok(items)
    }

    async fn mark_read(&self, item: &InboxItem) -> Result<(), CoreError> {
        let fullname = item.fullname();
        self.post_plain("/api/read_message", &[("id", fullname.as_str())])
            .await
    }

    async fn fetch_new_comments(&self, before: Option<&str>) -> Result<Vec<Comment>, CoreError> {
        let endpoint = self.sub_endpoint("comments");
        let endpoint = endpoint.as_str();
        let mut query = vec![("limit", "100")];
        if let Some(cursor) = before {
            query.push(("before", cursor));
        }
        let query = query.as_slice();

        let listing: RedditListing<serde_json::Value> = self
            .authorized(move |token| async move {
                self.api.get_json(endpoint, &token, query).await
            })
            .await?;

        // Listings are newest first.
        let mut comments: Vec<Comment> = comments_in(listing)
            .into_iter()
            .map(|data| data.into_comment(None))
            .collect();
        comments.reverse();
        debug!("Fetched {} new comment(s)", comments.len());
        Ok(comments)
    }

    async fn post_reply(&self, parent_fullname: &str, text: &str) -> Result<ReplyHandle, CoreError> {
        let data = self
            .post_api("/api/comment", &[("thing_id", parent_fullname), ("text", text)])
            .await?;
        data.as_ref()
            .and_then(|data| data.pointer("/things/0/data/name"))
            .and_then(|name| name.as_str())
            .map(ReplyHandle::new)
            .ok_or_else(|| {
                CoreError::RedditApi(RedditApiError::InvalidResponse {
                    details: "reply response without a comment name".to_string(),
                })
            })
    }

    async fn edit_reply(&self, handle: &ReplyHandle, text: &str) -> Result<(), CoreError> {
        self.post_api(
            "/api/editusertext",
            &[("thing_id", handle.fullname.as_str()), ("text", text)],
        )
        .await?;
        Ok(())
    }

    async fn delete_reply(&self, handle: &ReplyHandle) -> Result<(), CoreError> {
        self.post_plain("/api/del", &[("id", handle.fullname.as_str())])
            .await
    }

    async fn distinguish(&self, handle: &ReplyHandle) -> Result<(), CoreError> {
        self.post_api(
            "/api/distinguish",
            &[("id", handle.fullname.as_str()), ("how", "yes")],
        )
        .await?;
        Ok(())
    }

    async fn get_user_points(&self, username: &str) -> Result<UserPoints, CoreError> {
        let endpoint = self.sub_endpoint("api/flairlist");
        let endpoint = endpoint.as_str();
        let query = [("name", username)];
        let list: FlairList = self
            .authorized(move |token| async move {
                self.api.get_json(endpoint, &token, &query).await
            })
            .await?;

        let Some(entry) = list
            .users
            .into_iter()
            .find(|entry| entry.user.eq_ignore_ascii_case(username))
        else {
            return Ok(UserPoints::default());
        };
        Ok(UserPoints {
            count: entry.flair_text.as_deref().map(first_int).unwrap_or(0),
            text: entry.flair_text,
            css_class: entry.flair_css_class.unwrap_or_default(),
        })
    }

    async fn set_user_points(
        &self,
        username: &str,
        count: u32,
        text: &str,
        css_class: &str,
    ) -> Result<(), CoreError> {
        debug!("Setting flair for {} to {} ({})", username, count, text);
        let endpoint = self.sub_endpoint("api/flair");
        self.post_api(
            &endpoint,
            &[("name", username), ("text", text), ("css_class", css_class)],
        )
        .await?;
        Ok(())
    }

    async fn get_page(&self, page: &str) -> Result<String, CoreError> {
        let endpoint = self.sub_endpoint(&format!("wiki/{}", page));
        let endpoint = endpoint.as_str();
        let wiki: WikiPage = self
            .authorized(move |token| async move {
                self.api.get_json(endpoint, &token, &[]).await
            })
            .await?;
        Ok(wiki.data.content_md)
    }

    async fn put_page(&self, page: &str, text: &str, change_note: &str) -> Result<(), CoreError> {
        let endpoint = self.sub_endpoint("api/wiki/edit");
        self.post_plain(
            &endpoint,
            &[("page", page), ("content", text), ("reason", change_note)],
        )
        .await
    }

    async fn send_direct_message(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), CoreError> {
        self.post_api(
            "/api/compose",
            &[("to", recipient), ("subject", subject), ("text", body)],
        )
        .await?;
        Ok(())
    }

    async fn list_moderators(&self) -> Result<Vec<String>, CoreError> {
        let endpoint = self.sub_endpoint("about/moderators");
        let endpoint = endpoint.as_str();
        let list: UserList = self
            .authorized(move |token| async move {
                self.api.get_json(endpoint, &token, &[]).await
            })
            .await?;
        Ok(list.data.children.into_iter().map(|entry| entry.name).collect())
    }
}

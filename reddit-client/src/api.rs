use crate::rate_limiter::{RateLimitConfig, RateLimitStatus, RateLimiter};
use crate::retry::{RetryConfig, RetryExecutor, RetryStats};
use deltabot_core::{Comment, CoreError, Message, RedditApiError, SubmissionRef};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

pub const REDDIT_API_BASE: &str = "https://oauth.reddit.com";
pub const REDDIT_WEB_BASE: &str = "https://www.reddit.com";

const DELETED_AUTHOR: &str = "[deleted]";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListing<T> {
    pub kind: String,
    pub data: RedditListingData<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListingData<T> {
    pub children: Vec<RedditListingChild<T>>,
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub before: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListingChild<T> {
    pub kind: String,
    pub data: T,
}

/// Comment as returned by listings, lookups and the inbox. Inbox entries
/// carry no submission author or reply tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditCommentData {
    pub id: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub parent_id: String,
    #[serde(default)]
    pub link_id: Option<String>,
    #[serde(default)]
    pub link_title: Option<String>,
    #[serde(default)]
    pub link_author: Option<String>,
    #[serde(default)]
    pub link_permalink: Option<String>,
    #[serde(default)]
    pub permalink: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub created_utc: f64,
    /// Either an empty string or a nested listing.
    #[serde(default)]
    pub replies: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditPostData {
    pub id: String,
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    pub permalink: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditMessageData {
    pub id: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub was_comment: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WikiPage {
    pub data: WikiPageData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WikiPageData {
    #[serde(default)]
    pub content_md: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlairList {
    pub users: Vec<FlairEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlairEntry {
    pub user: String,
    #[serde(default)]
    pub flair_text: Option<String>,
    #[serde(default)]
    pub flair_css_class: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserList {
    pub data: UserListData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserListData {
    pub children: Vec<UserListEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserListEntry {
    pub name: String,
}

/// Envelope of `api_type=json` write endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonEnvelope {
    pub json: JsonBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonBody {
    #[serde(default)]
    pub errors: Vec<serde_json::Value>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl JsonEnvelope {
    pub fn into_result(self, endpoint: &str) -> Result<Option<serde_json::Value>, CoreError> {
        if self.json.errors.is_empty() {
            Ok(self.json.data)
        } else {
            Err(CoreError::RedditApi(RedditApiError::Rejected {
                details: format!("{}: {}", endpoint, serde_json::Value::from(self.json.errors)),
            }))
        }
    }
}

pub fn absolute_permalink(permalink: &str) -> String {
    if permalink.starts_with("http") {
        permalink.to_string()
    } else {
        format!("{}{}", REDDIT_WEB_BASE, permalink)
    }
}

fn author_of(author: Option<String>) -> Option<String> {
    author.filter(|name| name != DELETED_AUTHOR && !name.is_empty())
}

impl RedditCommentData {
    /// Converts to the domain comment, taking the submission from `submission`
    /// when the payload does not describe it.
    pub fn into_comment(self, submission: Option<&SubmissionRef>) -> Comment {
        let submission = match submission {
            Some(submission) => submission.clone(),
            None => SubmissionRef {
                id: self.link_id.clone().unwrap_or_default(),
                title: self.link_title.clone().unwrap_or_default(),
                author: author_of(self.link_author.clone()),
                permalink: self
                    .link_permalink
                    .as_deref()
                    .map(absolute_permalink)
                    .unwrap_or_default(),
            },
        };

        let replies = reply_children(&self.replies)
            .into_iter()
            .map(|child| child.into_comment(Some(&submission)))
            .collect();

        let permalink = self
            .permalink
            .as_deref()
            .or(self.context.as_deref())
            .map(absolute_permalink)
            .unwrap_or_default();

        Comment {
            id: self.id,
            body: self.body,
            author: author_of(self.author),
            parent_id: self.parent_id,
            submission,
            created_utc: self.created_utc as i64,
            permalink,
            replies,
        }
    }
}

/// Comment children of a `replies` value; "more" stubs are left for
/// [`collapsed_ids`] to pick up.
fn reply_children(replies: &serde_json::Value) -> Vec<RedditCommentData> {
    if !replies.is_object() {
        return Vec::new();
    }
    match serde_json::from_value::<RedditListing<serde_json::Value>>(replies.clone()) {
        Ok(listing) => comments_in(listing),
        Err(e) => {
            warn!("Ignoring malformed reply listing: {}", e);
            Vec::new()
        }
    }
}

/// The `t1` children of a listing, in order.
pub fn comments_in(listing: RedditListing<serde_json::Value>) -> Vec<RedditCommentData> {
    comment_children(listing.data.children)
}

fn comment_children(children: Vec<RedditListingChild<serde_json::Value>>) -> Vec<RedditCommentData> {
    children
        .into_iter()
        .filter(|child| child.kind == "t1")
        .filter_map(|child| serde_json::from_value(child.data).ok())
        .collect()
}

/// Ids hidden behind "more" stubs anywhere below `children`.
/// "Continue this thread" stubs list no ids and are not followed.
pub fn collapsed_ids(children: &[RedditListingChild<serde_json::Value>]) -> Vec<String> {
    let mut ids = Vec::new();
    for child in children {
        collect_collapsed(&child.kind, &child.data, &mut ids);
    }
    ids
}

fn collect_collapsed(kind: &str, data: &serde_json::Value, ids: &mut Vec<String>) {
    if kind == "more" {
        if let Some(children) = data.get("children").and_then(|c| c.as_array()) {
            ids.extend(
                children
                    .iter()
                    .filter_map(|id| id.as_str())
                    .map(str::to_string),
            );
        }
        return;
    }
    let nested = data
        .get("replies")
        .and_then(|replies| replies.pointer("/data/children"))
        .and_then(|children| children.as_array());
    for child in nested.into_iter().flatten() {
        let kind = child.get("kind").and_then(|k| k.as_str()).unwrap_or_default();
        if let Some(data) = child.get("data") {
            collect_collapsed(kind, data, ids);
        }
    }
}

/// `things` of a `/api/morechildren` answer: flat comments in tree order,
/// plus any ids still collapsed below them.
pub fn more_children_in(data: Option<serde_json::Value>) -> (Vec<RedditCommentData>, Vec<String>) {
    let things: Vec<RedditListingChild<serde_json::Value>> = data
        .and_then(|mut data| data.get_mut("things").map(serde_json::Value::take))
        .and_then(|things| serde_json::from_value(things).ok())
        .unwrap_or_default();
    let pending = collapsed_ids(&things);
    (comment_children(things), pending)
}

/// Hangs each of `loose` under its parent inside `root`, in order.
/// Returns how many found a parent.
pub fn graft_replies(root: &mut Comment, loose: Vec<Comment>) -> usize {
    let mut grafted = 0;
    for comment in loose {
        match find_comment_mut(root, &comment.parent_id) {
            Some(parent) => {
                if !parent.replies.iter().any(|reply| reply.id == comment.id) {
                    parent.replies.push(comment);
                    grafted += 1;
                }
            }
            None => debug!("No parent {} for expanded reply {}", comment.parent_id, comment.id),
        }
    }
    grafted
}

fn find_comment_mut<'a>(node: &'a mut Comment, fullname: &str) -> Option<&'a mut Comment> {
    if node.fullname() == fullname {
        return Some(node);
    }
    node.replies
        .iter_mut()
        .find_map(|reply| find_comment_mut(reply, fullname))
}

impl From<RedditPostData> for SubmissionRef {
    fn from(post: RedditPostData) -> Self {
        Self {
            id: post.name,
            title: post.title,
            author: author_of(post.author),
            permalink: absolute_permalink(&post.permalink),
        }
    }
}

impl From<RedditMessageData> for Message {
    fn from(message: RedditMessageData) -> Self {
        Self {
            id: message.id,
            author: author_of(message.author),
            subject: message.subject,
            body: message.body,
        }
    }
}

/// Maps a failed HTTP status onto the error taxonomy.
pub fn status_error(status: StatusCode, endpoint: &str, retry_after: Option<u64>) -> CoreError {
    match status.as_u16() {
        401 => CoreError::RedditApi(RedditApiError::InvalidToken),
        403 => CoreError::RedditApi(RedditApiError::Forbidden {
            resource: endpoint.to_string(),
        }),
        404 => CoreError::not_found(endpoint),
        429 => CoreError::RedditApi(RedditApiError::RateLimitExceeded {
            retry_after: retry_after.unwrap_or(60),
        }),
        code if status.is_server_error() => {
            CoreError::RedditApi(RedditApiError::ServerError { status_code: code })
        }
        code => CoreError::RequestFailed {
            message: format!("{} returned {}", endpoint, status),
            status_code: Some(code),
        },
    }
}

#[derive(Debug)]
pub struct RedditApiClient {
    http_client: Client,
    rate_limiter: RateLimiter,
    retry: RetryExecutor,
    base_url: Url,
    user_agent: String,
}

impl RedditApiClient {
    pub fn new(user_agent: String) -> Result<Self, CoreError> {
        Self::with_base_url(user_agent, REDDIT_API_BASE)
    }

    pub fn with_base_url(user_agent: String, base_url: &str) -> Result<Self, CoreError> {
        let http_client = Client::builder()
            .user_agent(&user_agent)
            .timeout(Duration::from_secs(30))
            .build()?;
        let base_url = Url::parse(base_url).map_err(|e| CoreError::InvalidInput {
            message: format!("invalid API base URL {}: {}", base_url, e),
        })?;

        Ok(Self {
            http_client,
            rate_limiter: RateLimiter::new(RateLimitConfig::reddit_oauth()),
            retry: RetryExecutor::new(RetryConfig::reddit()),
            base_url,
            user_agent,
        })
    }

    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn endpoint_url(&self, endpoint: &str) -> Result<Url, CoreError> {
        self.base_url
            .join(endpoint)
            .map_err(|e| CoreError::InvalidInput {
                message: format!("invalid endpoint {}: {}", endpoint, e),
            })
    }

    pub async fn make_request(
        &self,
        method: Method,
        endpoint: &str,
        access_token: &str,
        query_params: Option<&[(&str, &str)]>,
        form: Option<&[(&str, &str)]>,
    ) -> Result<Response, CoreError> {
        let url = self.endpoint_url(endpoint)?;

        let waited = self.rate_limiter.acquire_permit().await;
        if waited > Duration::from_millis(100) {
            debug!("Waited {:?} for rate limit before {} {}", waited, method, endpoint);
        }

        let mut request_builder = self
            .http_client
            .request(method.clone(), url)
            .bearer_auth(access_token);
        if let Some(params) = query_params {
            request_builder = request_builder.query(params);
        }
        if let Some(fields) = form {
            request_builder = request_builder.form(fields);
        }

        debug!("Making Reddit API request: {} {}", method, endpoint);
        let response = match request_builder.send().await {
            Ok(response) => response,
            // A connect timeout never reached Reddit; keep it resendable.
            Err(e) if e.is_timeout() && !e.is_connect() => {
                error!("Timeout for {} {}", method, endpoint);
                return Err(CoreError::RedditApi(RedditApiError::RequestTimeout));
            }
            Err(e) => {
                error!("Network error for {} {}: {}", method, endpoint, e);
                return Err(CoreError::Network(e));
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());
        if status == StatusCode::NOT_FOUND {
            debug!("{} {} not found", method, endpoint);
        } else {
            warn!("Request failed with status {} for {}", status, endpoint);
        }
        Err(status_error(status, endpoint, retry_after))
    }

    /// GET returning parsed JSON, retried on transient failures.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        access_token: &str,
        query_params: &[(&str, &str)],
    ) -> Result<T, CoreError> {
        self.retry
            .execute(endpoint, move || async move {
                let response = self
                    .make_request(Method::GET, endpoint, access_token, Some(query_params), None)
                    .await?;
                parse_json(response, endpoint).await
            })
            .await
    }

    /// Form POST returning parsed JSON. Sent once unless the request never
    /// reached Reddit or Reddit answered 429.
    pub async fn post_form<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        access_token: &str,
        form: &[(&str, &str)],
    ) -> Result<T, CoreError> {
        self.retry
            .execute_write(endpoint, move || async move {
                let response = self
                    .make_request(Method::POST, endpoint, access_token, None, Some(form))
                    .await?;
                parse_json(response, endpoint).await
            })
            .await
    }

    /// POST to an `api_type=json` endpoint; surfaces reported errors.
    pub async fn post_api(
        &self,
        endpoint: &str,
        access_token: &str,
        form: &[(&str, &str)],
    ) -> Result<Option<serde_json::Value>, CoreError> {
        let mut fields = vec![("api_type", "json")];
        fields.extend_from_slice(form);
        let envelope: JsonEnvelope = self.post_form(endpoint, access_token, &fields).await?;
        let data = envelope.into_result(endpoint)?;
        info!("POST {} accepted", endpoint);
        Ok(data)
    }

    pub async fn get_rate_limit_status(&self) -> RateLimitStatus {
        self.rate_limiter.get_rate_limit_status().await
    }

    pub fn retry_stats(&self) -> RetryStats {
        self.retry.stats()
    }
}

async fn parse_json<T: DeserializeOwned>(response: Response, endpoint: &str) -> Result<T, CoreError> {
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| {
        error!("Failed to parse response from {}: {}", endpoint, e);
        CoreError::RedditApi(RedditApiError::InvalidResponse {
            details: format!("{}: {}", endpoint, e),
        })
    })
}

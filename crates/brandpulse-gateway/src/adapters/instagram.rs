use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::payload::{content, count, text, unix_time};
use super::{many, one, AdapterCore, AdapterFuture, EndpointSpec, ProviderAdapter, RawPayload, RequestParams};
use crate::error::GatewayError;
use crate::{Author, CanonicalRecord, Engagement, ProviderId, RecordKind, Review, SocialPost, UtcDateTime};

const ENDPOINTS: &[EndpointSpec] = &[
    EndpointSpec::get("user/by/username", "user/by/username", &["username"]),
    EndpointSpec::get("user/medias", "user/medias", &["user_id"]),
    EndpointSpec::get("media/comments", "media/comments", &["page_id"]),
    EndpointSpec::get("user/followers", "user/followers", &["user_id"]),
    EndpointSpec::get("search/hashtags", "search/hashtags", &["query"]),
];

#[derive(Debug, Clone)]
pub struct InstagramAdapter {
    core: AdapterCore,
}

impl InstagramAdapter {
    pub const ENDPOINTS: &'static [EndpointSpec] = ENDPOINTS;

    pub fn new(core: AdapterCore) -> Self {
        Self { core }
    }

    pub fn core(&self) -> &AdapterCore {
        &self.core
    }

    pub async fn fetch_user_by_username(&self, username: &str) -> Result<RawPayload, GatewayError> {
        self.core
            .fetch("user/by/username", &RequestParams::new().with("username", username))
            .await
    }

    pub async fn fetch_user_medias(&self, user_id: &str) -> Result<RawPayload, GatewayError> {
        self.core
            .fetch("user/medias", &RequestParams::new().with("user_id", user_id))
            .await
    }

    pub async fn fetch_media_comments(
        &self,
        page_id: &str,
        can_support_threading: bool,
    ) -> Result<RawPayload, GatewayError> {
        let params = RequestParams::new()
            .with("page_id", page_id)
            .with("can_support_threading", can_support_threading.to_string());
        self.core.fetch("media/comments", &params).await
    }

    pub async fn fetch_user_followers(&self, user_id: &str) -> Result<RawPayload, GatewayError> {
        self.core
            .fetch("user/followers", &RequestParams::new().with("user_id", user_id))
            .await
    }

    pub async fn fetch_search_hashtags(&self, query: &str) -> Result<RawPayload, GatewayError> {
        self.core
            .fetch("search/hashtags", &RequestParams::new().with("query", query))
            .await
    }

    pub fn normalize_post(raw: &RawPayload) -> Option<SocialPost> {
        raw.is_success().then(|| post(raw.as_value())).flatten()
    }

    /// Posts of a successful `user/medias` envelope; items without an id are skipped.
    pub fn normalize_posts(raw: &RawPayload) -> Vec<SocialPost> {
        raw.items()
            .map(|items| items.iter().filter_map(post).collect())
            .unwrap_or_default()
    }

    pub fn normalize_comment(raw: &RawPayload) -> Option<Review> {
        raw.is_success().then(|| comment(raw.as_value())).flatten()
    }

    pub fn normalize_comments(raw: &RawPayload) -> Vec<Review> {
        raw.items()
            .map(|items| items.iter().filter_map(comment).collect())
            .unwrap_or_default()
    }
}

fn post(item: &Value) -> Option<SocialPost> {
    let timestamp = unix_time(item, "taken_at").unwrap_or_else(UtcDateTime::now);
    let caption = match item.get("caption") {
        Some(caption @ Value::Object(_)) => content(caption, "text"),
        _ => content(item, "caption"),
    };

    let mut post = SocialPost::new(text(item, "id")?, ProviderId::Instagram, caption, timestamp).ok()?;
    post.engagement = Engagement {
        likes: count(item, "likes_count"),
        comments: count(item, "comments_count"),
        shares: 0,
    };
    post.media_url = text(item, "display_url");
    post.author = owner(item);
    Some(post)
}

fn comment(item: &Value) -> Option<Review> {
    let timestamp = unix_time(item, "created_at").unwrap_or_else(UtcDateTime::now);
    let mut review = Review::new(text(item, "id")?, ProviderId::Instagram, content(item, "text"), timestamp).ok()?;
    review.author = owner(item);
    review.post_id = text(item, "media_id");
    Some(review)
}

fn owner(item: &Value) -> Author {
    item.get("owner")
        .map(|owner| Author {
            id: text(owner, "id"),
            name: text(owner, "username"),
        })
        .unwrap_or_default()
}

impl ProviderAdapter for InstagramAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Instagram
    }

    fn endpoints(&self) -> &'static [EndpointSpec] {
        ENDPOINTS
    }

    fn fetch_raw_cancellable<'a>(
        &'a self,
        endpoint: &'a str,
        params: RequestParams,
        cancel: &'a CancellationToken,
    ) -> AdapterFuture<'a, RawPayload> {
        Box::pin(async move { self.core.fetch_cancellable(endpoint, &params, cancel).await })
    }

    /// List envelopes yield every valid item; single objects yield at most one.
    fn normalize(&self, kind: RecordKind, raw: &RawPayload) -> Vec<CanonicalRecord> {
        let is_list = raw.items().is_some();
        match kind {
            RecordKind::SocialPost if is_list => many(Self::normalize_posts(raw), CanonicalRecord::SocialPost),
            RecordKind::SocialPost => one(Self::normalize_post(raw), CanonicalRecord::SocialPost),
            RecordKind::Review if is_list => many(Self::normalize_comments(raw), CanonicalRecord::Review),
            RecordKind::Review => one(Self::normalize_comment(raw), CanonicalRecord::Review),
            RecordKind::Traffic | RecordKind::Seo | RecordKind::Sentiment => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::adapters::test_support::{core_for, ScriptedHttpClient};
    use crate::audit::MemoryAuditSink;

    #[test]
    fn post_maps_caption_counts_media_and_owner() {
        let raw = RawPayload::new(json!({
            "success": true,
            "id": "3141",
            "caption": "new drop is live",
            "likes_count": 250,
            "comments_count": 12,
            "display_url": "https://cdn.example/p.jpg",
            "owner": {"id": "99", "username": "brand"},
            "taken_at": 1_700_000_000
        }));

        let post = InstagramAdapter::normalize_post(&raw).expect("post record");
        assert_eq!(post.id, "3141");
        assert_eq!(post.source, ProviderId::Instagram);
        assert_eq!(post.content, "new drop is live");
        assert_eq!(post.engagement, Engagement { likes: 250, comments: 12, shares: 0 });
        assert_eq!(post.media_url.as_deref(), Some("https://cdn.example/p.jpg"));
        assert_eq!(post.author.name.as_deref(), Some("brand"));
        assert_eq!(post.timestamp.format_rfc3339(), "2023-11-14T22:13:20Z");
        assert_eq!(post.sentiment_score, None);
    }

    #[test]
    fn caption_object_form_is_supported() {
        let raw = RawPayload::new(json!({"success": true, "id": 1, "caption": {"text": "hello"}}));
        let post = InstagramAdapter::normalize_post(&raw).expect("post record");
        assert_eq!(post.content, "hello");
        assert_eq!(post.id, "1");
    }

    #[test]
    fn unsuccessful_payloads_are_absent() {
        let raw = RawPayload::new(json!({"success": false, "id": "1", "caption": "x"}));
        assert_eq!(InstagramAdapter::normalize_post(&raw), None);
        assert_eq!(InstagramAdapter::normalize_comment(&raw), None);
        assert!(InstagramAdapter::normalize_posts(&raw).is_empty());
    }

    #[test]
    fn list_normalization_drops_items_without_id() {
        let raw = RawPayload::new(json!({
            "success": true,
            "data": [
                {"id": "1", "text": "love it", "media_id": "3141", "owner": {"id": "7", "username": "fan"}},
                {"text": "no id here"},
                {"id": "2", "text": "meh"}
            ]
        }));

        let comments = InstagramAdapter::normalize_comments(&raw);
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].post_id.as_deref(), Some("3141"));
        assert_eq!(comments[0].author.id.as_deref(), Some("7"));
        assert_eq!(comments[1].id, "2");
    }

    #[tokio::test]
    async fn comments_request_carries_threading_flag() {
        let client = Arc::new(ScriptedHttpClient::json(r#"{"success":true,"data":[]}"#));
        let adapter = InstagramAdapter::new(core_for(
            ProviderId::Instagram,
            ENDPOINTS,
            client.clone(),
            Arc::new(MemoryAuditSink::new()),
        ));

        let raw = adapter.fetch_media_comments("3141", true).await.expect("fetch succeeds");
        assert!(adapter.normalize(RecordKind::Review, &raw).is_empty());

        assert_eq!(
            client.recorded_requests()[0].url,
            "https://instagram-premium-api-2023.p.rapidapi.com/v2/media/comments?page_id=3141&can_support_threading=true"
        );
    }
}

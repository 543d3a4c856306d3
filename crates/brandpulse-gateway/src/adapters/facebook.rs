use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::payload::{content, count, float, text, unix_time};
use super::{many, one, AdapterCore, AdapterFuture, EndpointSpec, ProviderAdapter, RawPayload, RequestParams};
use crate::error::GatewayError;
use crate::{Author, CanonicalRecord, Engagement, ProviderId, RecordKind, Review, SocialPost, UtcDateTime};

const ENDPOINTS: &[EndpointSpec] = &[
    EndpointSpec::get("page/posts", "page/posts", &["page_id"]),
    EndpointSpec::get("post/comments", "post/comments", &["post_id"]),
    EndpointSpec::get("page/reviews", "page/reviews", &["page_id"]),
    EndpointSpec::get("page/details", "page/details", &["url"]),
];

#[derive(Debug, Clone)]
pub struct FacebookAdapter {
    core: AdapterCore,
}

impl FacebookAdapter {
    pub const ENDPOINTS: &'static [EndpointSpec] = ENDPOINTS;

    pub fn new(core: AdapterCore) -> Self {
        Self { core }
    }

    pub fn core(&self) -> &AdapterCore {
        &self.core
    }

    pub async fn fetch_page_posts(&self, page_id: &str) -> Result<RawPayload, GatewayError> {
        self.core
            .fetch("page/posts", &RequestParams::new().with("page_id", page_id))
            .await
    }

    pub async fn fetch_post_comments(&self, post_id: &str) -> Result<RawPayload, GatewayError> {
        self.core
            .fetch("post/comments", &RequestParams::new().with("post_id", post_id))
            .await
    }

    pub async fn fetch_page_reviews(&self, page_id: &str) -> Result<RawPayload, GatewayError> {
        self.core
            .fetch("page/reviews", &RequestParams::new().with("page_id", page_id))
            .await
    }

    pub async fn fetch_page_details(&self, url: &str) -> Result<RawPayload, GatewayError> {
        self.core
            .fetch("page/details", &RequestParams::new().with("url", url))
            .await
    }

    pub fn normalize_post(raw: &RawPayload) -> Option<SocialPost> {
        raw.is_success().then(|| post(raw.as_value())).flatten()
    }

    pub fn normalize_posts(raw: &RawPayload) -> Vec<SocialPost> {
        raw.items()
            .map(|items| items.iter().filter_map(post).collect())
            .unwrap_or_default()
    }

    pub fn normalize_review(raw: &RawPayload) -> Option<Review> {
        raw.is_success().then(|| review(raw.as_value())).flatten()
    }

    /// Reviews or comments of a successful list envelope.
    pub fn normalize_reviews(raw: &RawPayload) -> Vec<Review> {
        raw.items()
            .map(|items| items.iter().filter_map(review).collect())
            .unwrap_or_default()
    }
}

fn post(item: &Value) -> Option<SocialPost> {
    let timestamp = unix_time(item, "timestamp").unwrap_or_else(UtcDateTime::now);
    let mut post = SocialPost::new(text(item, "id")?, ProviderId::Facebook, content(item, "message"), timestamp).ok()?;
    post.engagement = Engagement {
        likes: count(item, "likes_count"),
        comments: count(item, "comments_count"),
        shares: count(item, "shares_count"),
    };
    post.media_url = text(item, "image_url");
    post.author = author(item);
    Some(post)
}

fn review(item: &Value) -> Option<Review> {
    let timestamp = unix_time(item, "timestamp").unwrap_or_else(UtcDateTime::now);
    let mut review = Review::new(text(item, "id")?, ProviderId::Facebook, content(item, "text"), timestamp).ok()?;
    review.rating = float(item, "rating");
    review.author = author(item);
    review.post_id = text(item, "post_id");
    Some(review)
}

fn author(item: &Value) -> Author {
    Author {
        id: text(item, "author_id"),
        name: text(item, "author_name"),
    }
}

impl ProviderAdapter for FacebookAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Facebook
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

    fn normalize(&self, kind: RecordKind, raw: &RawPayload) -> Vec<CanonicalRecord> {
        let is_list = raw.items().is_some();
        match kind {
            RecordKind::SocialPost if is_list => many(Self::normalize_posts(raw), CanonicalRecord::SocialPost),
            RecordKind::SocialPost => one(Self::normalize_post(raw), CanonicalRecord::SocialPost),
            RecordKind::Review if is_list => many(Self::normalize_reviews(raw), CanonicalRecord::Review),
            RecordKind::Review => one(Self::normalize_review(raw), CanonicalRecord::Review),
            RecordKind::Traffic | RecordKind::Seo | RecordKind::Sentiment => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn post_maps_message_and_all_engagement_counts() {
        let raw = RawPayload::new(json!({
            "success": true,
            "id": "fb_1",
            "message": "Summer sale starts today",
            "likes_count": 80,
            "comments_count": 9,
            "shares_count": 4,
            "image_url": "https://cdn.example/sale.png",
            "author_id": "page_1",
            "author_name": "Brand"
        }));

        let post = FacebookAdapter::normalize_post(&raw).expect("post record");
        assert_eq!(post.content, "Summer sale starts today");
        assert_eq!(post.source, ProviderId::Facebook);
        assert_eq!(post.engagement, Engagement { likes: 80, comments: 9, shares: 4 });
        assert_eq!(post.media_url.as_deref(), Some("https://cdn.example/sale.png"));
        assert_eq!(post.author, Author { id: Some(String::from("page_1")), name: Some(String::from("Brand")) });
    }

    #[test]
    fn review_keeps_rating_optional() {
        let rated = RawPayload::new(json!({"success": true, "id": "r1", "text": "great", "rating": 5}));
        assert_eq!(FacebookAdapter::normalize_review(&rated).and_then(|r| r.rating), Some(5.0));

        let unrated = RawPayload::new(json!({"success": true, "id": "r2", "text": "ok"}));
        let review = FacebookAdapter::normalize_review(&unrated).expect("review record");
        assert_eq!(review.rating, None);
        assert_eq!(review.content, "ok");
    }

    #[test]
    fn unsuccessful_payloads_are_absent() {
        let raw = RawPayload::new(json!({"success": false, "id": "fb_1", "message": "x"}));
        assert_eq!(FacebookAdapter::normalize_post(&raw), None);
        assert_eq!(FacebookAdapter::normalize_review(&raw), None);

        let envelope = RawPayload::new(json!({"success": false, "data": [{"id": "fb_1"}]}));
        assert!(FacebookAdapter::normalize_posts(&envelope).is_empty());
        assert!(FacebookAdapter::normalize_reviews(&envelope).is_empty());
    }

    #[test]
    fn post_list_skips_items_without_id() {
        let raw = RawPayload::new(json!({
            "success": true,
            "data": [{"id": "a", "message": "one"}, {"message": "anonymous"}, {"id": "b", "message": "two"}]
        }));

        let ids = FacebookAdapter::normalize_posts(&raw)
            .into_iter()
            .map(|post| post.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["a", "b"]);
    }
}

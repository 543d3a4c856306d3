use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::payload::{count, float, text};
use super::{one, AdapterCore, AdapterFuture, EndpointSpec, ProviderAdapter, RawPayload, RequestParams};
use crate::error::GatewayError;
use crate::{CanonicalRecord, ProviderId, RecordKind, SeoMetrics, TrafficMetrics, TrafficSources, UtcDateTime};

const ENDPOINTS: &[EndpointSpec] = &[
    EndpointSpec::get("all-insights", "all-insights", &["domain"]),
    EndpointSpec::get("traffic", "traffic", &["domain"]),
    EndpointSpec::get("rank", "rank", &["domain"]),
    EndpointSpec::get("similar-sites", "similar-sites", &["domain"]),
    EndpointSpec::get("seo", "seo", &["domain"]),
    EndpointSpec::get("website-details", "website-details", &["domain"]),
];

/// Website traffic and SEO insights.
#[derive(Debug, Clone)]
pub struct SimilarWebAdapter {
    core: AdapterCore,
}

impl SimilarWebAdapter {
    pub const ENDPOINTS: &'static [EndpointSpec] = ENDPOINTS;

    pub fn new(core: AdapterCore) -> Self {
        Self { core }
    }

    pub fn core(&self) -> &AdapterCore {
        &self.core
    }

    async fn by_domain(&self, endpoint: &str, domain: &str) -> Result<RawPayload, GatewayError> {
        self.core
            .fetch(endpoint, &RequestParams::new().with("domain", domain))
            .await
    }

    pub async fn fetch_all_insights(&self, domain: &str) -> Result<RawPayload, GatewayError> {
        self.by_domain("all-insights", domain).await
    }

    pub async fn fetch_traffic(&self, domain: &str) -> Result<RawPayload, GatewayError> {
        self.by_domain("traffic", domain).await
    }

    pub async fn fetch_rank(&self, domain: &str) -> Result<RawPayload, GatewayError> {
        self.by_domain("rank", domain).await
    }

    pub async fn fetch_similar_sites(&self, domain: &str) -> Result<RawPayload, GatewayError> {
        self.by_domain("similar-sites", domain).await
    }

    pub async fn fetch_seo(&self, domain: &str) -> Result<RawPayload, GatewayError> {
        self.by_domain("seo", domain).await
    }

    pub async fn fetch_website_details(&self, domain: &str) -> Result<RawPayload, GatewayError> {
        self.by_domain("website-details", domain).await
    }

    /// `None` unless the payload reports success and names its domain.
    pub fn normalize_traffic(raw: &RawPayload) -> Option<TrafficMetrics> {
        if !raw.is_success() {
            return None;
        }
        let body = raw.as_value();
        let mut metrics = TrafficMetrics::new(text(body, "domain")?, ProviderId::SimilarWeb, UtcDateTime::now()).ok()?;

        metrics.visits = count(body, "visits");
        metrics.pages_per_visit = float(body, "pageViewsPerVisit").unwrap_or(0.0);
        metrics.bounce_rate = float(body, "bounceRate").unwrap_or(0.0);
        metrics.avg_visit_duration_secs = float(body, "avgVisitDuration").unwrap_or(0.0);
        metrics.traffic_sources = body.get("trafficSources").map(traffic_sources).unwrap_or_default();
        metrics.period = text(body, "date");
        Some(metrics)
    }

    /// `None` unless the payload reports success and names its domain.
    pub fn normalize_seo(raw: &RawPayload) -> Option<SeoMetrics> {
        if !raw.is_success() {
            return None;
        }
        let body = raw.as_value();
        let mut metrics = SeoMetrics::new(text(body, "domain")?, ProviderId::SimilarWeb, UtcDateTime::now()).ok()?;

        metrics.organic_keywords = count(body, "organicKeywords");
        metrics.paid_keywords = count(body, "paidKeywords");
        metrics.organic_traffic = count(body, "organicTraffic");
        metrics.paid_traffic = count(body, "paidTraffic");
        metrics.seo_score = float(body, "seoScore");
        metrics.period = text(body, "date");
        Some(metrics)
    }
}

fn traffic_sources(value: &Value) -> TrafficSources {
    let share = |key: &str| float(value, key).unwrap_or(0.0);
    TrafficSources {
        direct: share("direct"),
        organic: share("search").max(share("organic")),
        paid: share("paid"),
        social: share("social"),
        referral: share("referrals").max(share("referral")),
    }
}

impl ProviderAdapter for SimilarWebAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::SimilarWeb
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
        match kind {
            RecordKind::Traffic => one(Self::normalize_traffic(raw), CanonicalRecord::Traffic),
            RecordKind::Seo => one(Self::normalize_seo(raw), CanonicalRecord::Seo),
            RecordKind::SocialPost | RecordKind::Review | RecordKind::Sentiment => Vec::new(),
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

    fn adapter(client: Arc<ScriptedHttpClient>) -> SimilarWebAdapter {
        SimilarWebAdapter::new(core_for(
            ProviderId::SimilarWeb,
            ENDPOINTS,
            client,
            Arc::new(MemoryAuditSink::new()),
        ))
    }

    #[test]
    fn traffic_maps_provider_fields() {
        let raw = RawPayload::new(json!({
            "success": true,
            "domain": "example.com",
            "visits": 120_000,
            "pageViewsPerVisit": 3.5,
            "bounceRate": 0.42,
            "avgVisitDuration": 185.0,
            "trafficSources": {"direct": 0.4, "search": 0.35, "social": 0.1, "referrals": 0.1, "paid": 0.05},
            "date": "2024-05"
        }));

        let metrics = SimilarWebAdapter::normalize_traffic(&raw).expect("traffic record");
        assert_eq!(metrics.domain, "example.com");
        assert_eq!(metrics.source, ProviderId::SimilarWeb);
        assert_eq!(metrics.visits, 120_000);
        assert_eq!(metrics.pages_per_visit, 3.5);
        assert_eq!(metrics.traffic_sources.organic, 0.35);
        assert_eq!(metrics.traffic_sources.referral, 0.1);
        assert_eq!(metrics.period.as_deref(), Some("2024-05"));
    }

    #[test]
    fn unsuccessful_or_anonymous_payloads_are_absent() {
        let failed = RawPayload::new(json!({"success": false, "domain": "example.com", "visits": 10}));
        assert_eq!(SimilarWebAdapter::normalize_traffic(&failed), None);
        assert_eq!(SimilarWebAdapter::normalize_seo(&failed), None);

        let missing_flag = RawPayload::new(json!({"domain": "example.com"}));
        assert_eq!(SimilarWebAdapter::normalize_seo(&missing_flag), None);

        let no_domain = RawPayload::new(json!({"success": true, "visits": 10}));
        assert_eq!(SimilarWebAdapter::normalize_traffic(&no_domain), None);
    }

    #[test]
    fn seo_score_stays_optional() {
        let raw = RawPayload::new(json!({
            "success": true,
            "domain": "example.com",
            "organicKeywords": 900,
            "paidKeywords": "12"
        }));

        let metrics = SimilarWebAdapter::normalize_seo(&raw).expect("seo record");
        assert_eq!(metrics.organic_keywords, 900);
        assert_eq!(metrics.paid_keywords, 12);
        assert_eq!(metrics.seo_score, None);
    }

    #[tokio::test]
    async fn each_fetch_targets_its_endpoint() {
        let client = Arc::new(ScriptedHttpClient::json(r#"{"success":true}"#));
        let adapter = adapter(client.clone());

        adapter.fetch_all_insights("a.com").await.expect("all-insights");
        adapter.fetch_traffic("a.com").await.expect("traffic");
        adapter.fetch_rank("a.com").await.expect("rank");
        adapter.fetch_similar_sites("a.com").await.expect("similar-sites");
        adapter.fetch_seo("a.com").await.expect("seo");
        adapter.fetch_website_details("a.com").await.expect("website-details");

        let paths = client
            .recorded_requests()
            .into_iter()
            .map(|request| request.url.replace("https://similarweb-insights.p.rapidapi.com/", ""))
            .collect::<Vec<_>>();
        assert_eq!(
            paths,
            vec![
                "all-insights?domain=a.com",
                "traffic?domain=a.com",
                "rank?domain=a.com",
                "similar-sites?domain=a.com",
                "seo?domain=a.com",
                "website-details?domain=a.com",
            ]
        );
    }

    #[test]
    fn uniform_normalize_ignores_foreign_kinds() {
        let client = Arc::new(ScriptedHttpClient::json("{}"));
        let raw = RawPayload::new(json!({"success": true, "domain": "example.com"}));

        let adapter = adapter(client);
        assert_eq!(adapter.normalize(RecordKind::Traffic, &raw).len(), 1);
        assert!(adapter.normalize(RecordKind::SocialPost, &raw).is_empty());
    }
}

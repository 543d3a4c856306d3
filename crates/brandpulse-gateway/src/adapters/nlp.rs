use tokio_util::sync::CancellationToken;

use super::payload::{float, text};
use super::{one, AdapterCore, AdapterFuture, EndpointSpec, ProviderAdapter, RawPayload, RequestParams};
use crate::error::GatewayError;
use crate::{
    CanonicalRecord, ProviderId, RecordKind, SentimentLabel, SentimentProbabilities, SentimentResult, UtcDateTime,
};

const DEFAULT_LANGUAGE: &str = "english";

const ENDPOINTS: &[EndpointSpec] = &[
    EndpointSpec::post("sentiment", "sentiment/", &["text"]),
    EndpointSpec::post("stem", "stem/", &["text"]),
    EndpointSpec::post("tag", "tag/", &["text"]),
    EndpointSpec::post("phrases", "phrases/", &["text"]),
];

/// Text-processing service. Every call is a form-encoded POST.
#[derive(Debug, Clone)]
pub struct NlpAdapter {
    core: AdapterCore,
}

impl NlpAdapter {
    pub const ENDPOINTS: &'static [EndpointSpec] = ENDPOINTS;

    pub fn new(core: AdapterCore) -> Self {
        Self { core }
    }

    pub fn core(&self) -> &AdapterCore {
        &self.core
    }

    fn text_params(text: &str, language: Option<&str>) -> RequestParams {
        RequestParams::new()
            .with("text", text)
            .with("language", language.unwrap_or(DEFAULT_LANGUAGE))
    }

    pub async fn fetch_sentiment(&self, text: &str, language: Option<&str>) -> Result<RawPayload, GatewayError> {
        self.core.fetch("sentiment", &Self::text_params(text, language)).await
    }

    pub async fn fetch_stem(&self, text: &str, language: Option<&str>) -> Result<RawPayload, GatewayError> {
        let params = Self::text_params(text, language).with("stemmer", "porter");
        self.core.fetch("stem", &params).await
    }

    pub async fn fetch_tag(&self, text: &str, language: Option<&str>) -> Result<RawPayload, GatewayError> {
        let params = Self::text_params(text, language).with("output", "tagged");
        self.core.fetch("tag", &params).await
    }

    pub async fn fetch_phrases(&self, text: &str, language: Option<&str>) -> Result<RawPayload, GatewayError> {
        self.core.fetch("phrases", &Self::text_params(text, language)).await
    }

    /// `None` unless the payload reports success and carries a known label.
    pub fn normalize_sentiment(raw: &RawPayload) -> Option<SentimentResult> {
        if !raw.is_success() {
            return None;
        }
        let body = raw.as_value();
        let label = SentimentLabel::parse(&text(body, "label")?)?;
        let probabilities = body
            .get("probability")
            .map(|probability| SentimentProbabilities {
                positive: float(probability, "pos").unwrap_or(0.0),
                negative: float(probability, "neg").unwrap_or(0.0),
                neutral: float(probability, "neutral").unwrap_or(0.0),
            })
            .unwrap_or_default();

        SentimentResult::new(ProviderId::Nlp, label, probabilities, UtcDateTime::now()).ok()
    }
}

impl ProviderAdapter for NlpAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Nlp
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
        Box::pin(async move {
            let params = match params.get("language") {
                Some(_) => params,
                None => params.with("language", DEFAULT_LANGUAGE),
            };
            self.core.fetch_cancellable(endpoint, &params, cancel).await
        })
    }

    fn normalize(&self, kind: RecordKind, raw: &RawPayload) -> Vec<CanonicalRecord> {
        match kind {
            RecordKind::Sentiment => one(Self::normalize_sentiment(raw), CanonicalRecord::Sentiment),
            RecordKind::Traffic | RecordKind::Seo | RecordKind::SocialPost | RecordKind::Review => Vec::new(),
        }
    }
}

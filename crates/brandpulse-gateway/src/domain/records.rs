use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{ProviderId, UtcDateTime, ValidationError};

/// Canonical record shapes, independent of the provider that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Traffic,
    Seo,
    SocialPost,
    Review,
    Sentiment,
}

impl RecordKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Traffic => "traffic",
            Self::Seo => "seo",
            Self::SocialPost => "social_post",
            Self::Review => "review",
            Self::Sentiment => "sentiment",
        }
    }
}

impl Display for RecordKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of normalized records handed to collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CanonicalRecord {
    Traffic(TrafficMetrics),
    Seo(SeoMetrics),
    SocialPost(SocialPost),
    Review(Review),
    Sentiment(SentimentResult),
}

impl CanonicalRecord {
    pub const fn kind(&self) -> RecordKind {
        match self {
            Self::Traffic(_) => RecordKind::Traffic,
            Self::Seo(_) => RecordKind::Seo,
            Self::SocialPost(_) => RecordKind::SocialPost,
            Self::Review(_) => RecordKind::Review,
            Self::Sentiment(_) => RecordKind::Sentiment,
        }
    }

    pub const fn source(&self) -> ProviderId {
        match self {
            Self::Traffic(record) => record.source,
            Self::Seo(record) => record.source,
            Self::SocialPost(record) => record.source,
            Self::Review(record) => record.source,
            Self::Sentiment(record) => record.source,
        }
    }

    /// Identity of the record: the domain for site metrics, the provider id
    /// for posts and reviews. Sentiment results have none.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Traffic(record) => Some(&record.domain),
            Self::Seo(record) => Some(&record.domain),
            Self::SocialPost(record) => Some(&record.id),
            Self::Review(record) => Some(&record.id),
            Self::Sentiment(_) => None,
        }
    }
}

/// Share of visits per acquisition channel, each in `0.0..=1.0` when reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficSources {
    pub direct: f64,
    pub organic: f64,
    pub paid: f64,
    pub social: f64,
    pub referral: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficMetrics {
    pub domain: String,
    pub source: ProviderId,
    pub visits: u64,
    pub pages_per_visit: f64,
    pub bounce_rate: f64,
    pub avg_visit_duration_secs: f64,
    pub traffic_sources: TrafficSources,
    /// Reporting period as given by the provider, e.g. `2024-05`.
    pub period: Option<String>,
    pub fetched_at: UtcDateTime,
}

impl TrafficMetrics {
    pub fn new(domain: impl Into<String>, source: ProviderId, fetched_at: UtcDateTime) -> Result<Self, ValidationError> {
        Ok(Self {
            domain: required("domain", domain.into())?,
            source,
            visits: 0,
            pages_per_visit: 0.0,
            bounce_rate: 0.0,
            avg_visit_duration_secs: 0.0,
            traffic_sources: TrafficSources::default(),
            period: None,
            fetched_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeoMetrics {
    pub domain: String,
    pub source: ProviderId,
    pub organic_keywords: u64,
    pub paid_keywords: u64,
    pub organic_traffic: u64,
    pub paid_traffic: u64,
    pub seo_score: Option<f64>,
    pub period: Option<String>,
    pub fetched_at: UtcDateTime,
}

impl SeoMetrics {
    pub fn new(domain: impl Into<String>, source: ProviderId, fetched_at: UtcDateTime) -> Result<Self, ValidationError> {
        Ok(Self {
            domain: required("domain", domain.into())?,
            source,
            organic_keywords: 0,
            paid_keywords: 0,
            organic_traffic: 0,
            paid_traffic: 0,
            seo_score: None,
            period: None,
            fetched_at,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    pub likes: u64,
    pub comments: u64,
    pub shares: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialPost {
    pub id: String,
    pub source: ProviderId,
    pub content: String,
    pub engagement: Engagement,
    pub media_url: Option<String>,
    pub author: Author,
    pub timestamp: UtcDateTime,
    pub sentiment_score: Option<f64>,
}

impl SocialPost {
    pub fn new(
        id: impl Into<String>,
        source: ProviderId,
        content: impl Into<String>,
        timestamp: UtcDateTime,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            id: required("id", id.into())?,
            source,
            content: content.into(),
            engagement: Engagement::default(),
            media_url: None,
            author: Author::default(),
            timestamp,
            sentiment_score: None,
        })
    }

    pub fn with_sentiment(mut self, sentiment: &SentimentResult) -> Self {
        self.sentiment_score = Some(sentiment.score);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: String,
    pub source: ProviderId,
    pub content: String,
    pub rating: Option<f64>,
    pub author: Author,
    /// Post the review or comment was attached to, if any.
    pub post_id: Option<String>,
    pub timestamp: UtcDateTime,
    pub sentiment_score: Option<f64>,
}

impl Review {
    pub fn new(
        id: impl Into<String>,
        source: ProviderId,
        content: impl Into<String>,
        timestamp: UtcDateTime,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            id: required("id", id.into())?,
            source,
            content: content.into(),
            rating: None,
            author: Author::default(),
            post_id: None,
            timestamp,
            sentiment_score: None,
        })
    }

    pub fn with_sentiment(mut self, sentiment: &SentimentResult) -> Self {
        self.sentiment_score = Some(sentiment.score);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

impl SentimentLabel {
    /// Accepts both long labels and the short `pos`/`neg` forms.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pos" | "positive" => Some(Self::Positive),
            "neg" | "negative" => Some(Self::Negative),
            "neutral" => Some(Self::Neutral),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SentimentProbabilities {
    pub positive: f64,
    pub negative: f64,
    pub neutral: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentResult {
    pub source: ProviderId,
    pub label: SentimentLabel,
    /// Polarity in `-1.0..=1.0`: positive minus negative probability.
    pub score: f64,
    /// Probability of the winning label.
    pub confidence: f64,
    pub probabilities: SentimentProbabilities,
    pub analyzed_at: UtcDateTime,
}

impl SentimentResult {
    pub fn new(
        source: ProviderId,
        label: SentimentLabel,
        probabilities: SentimentProbabilities,
        analyzed_at: UtcDateTime,
    ) -> Result<Self, ValidationError> {
        for (field, value) in [
            ("probability.pos", probabilities.positive),
            ("probability.neg", probabilities.negative),
            ("probability.neutral", probabilities.neutral),
        ] {
            if !value.is_finite() {
                return Err(ValidationError::NonFiniteValue { field });
            }
        }

        let confidence = match label {
            SentimentLabel::Positive => probabilities.positive,
            SentimentLabel::Negative => probabilities.negative,
            SentimentLabel::Neutral => probabilities.neutral,
        };

        Ok(Self {
            source,
            label,
            score: (probabilities.positive - probabilities.negative).clamp(-1.0, 1.0),
            confidence,
            probabilities,
            analyzed_at,
        })
    }
}

fn required(field: &'static str, value: String) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingField { field });
    }
    if trimmed.len() == value.len() {
        Ok(value)
    } else {
        Ok(trimmed.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_fields_are_required() {
        let now = UtcDateTime::now();
        let err = SocialPost::new("  ", ProviderId::Instagram, "caption", now).expect_err("blank id");
        assert_eq!(err, ValidationError::MissingField { field: "id" });

        let err = TrafficMetrics::new("", ProviderId::SimilarWeb, now).expect_err("blank domain");
        assert_eq!(err, ValidationError::MissingField { field: "domain" });
    }

    #[test]
    fn canonical_record_serializes_with_kind_tag() {
        let post = SocialPost::new("17", ProviderId::Facebook, "hello", UtcDateTime::now())
            .expect("valid post");
        let record = CanonicalRecord::SocialPost(post);

        let json = serde_json::to_value(&record).expect("serializes");
        assert_eq!(json["kind"], "social_post");
        assert_eq!(json["source"], "facebook");
        assert_eq!(record.id(), Some("17"));

        let back: CanonicalRecord = serde_json::from_value(json).expect("deserializes");
        assert_eq!(back, record);
    }

    #[test]
    fn sentiment_score_is_polarity_and_confidence_follows_label() {
        let result = SentimentResult::new(
            ProviderId::Nlp,
            SentimentLabel::Positive,
            SentimentProbabilities {
                positive: 0.75,
                negative: 0.25,
                neutral: 0.5,
            },
            UtcDateTime::now(),
        )
        .expect("valid sentiment");

        assert_eq!(result.score, 0.5);
        assert_eq!(result.confidence, 0.75);
    }

    #[test]
    fn sentiment_label_accepts_short_forms() {
        assert_eq!(SentimentLabel::parse("pos"), Some(SentimentLabel::Positive));
        assert_eq!(SentimentLabel::parse("NEG"), Some(SentimentLabel::Negative));
        assert_eq!(SentimentLabel::parse("meh"), None);
    }
}

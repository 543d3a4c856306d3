mod records;
mod timestamp;

pub use records::{
    Author, CanonicalRecord, Engagement, RecordKind, Review, SentimentLabel,
    SentimentProbabilities, SentimentResult, SeoMetrics, SocialPost, TrafficMetrics,
    TrafficSources,
};
pub use timestamp::UtcDateTime;

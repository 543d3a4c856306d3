use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Upstream data providers reachable through the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    SimilarWeb,
    Instagram,
    Facebook,
    Nlp,
}

impl ProviderId {
    pub const ALL: [Self; 4] = [Self::SimilarWeb, Self::Instagram, Self::Facebook, Self::Nlp];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SimilarWeb => "similarweb",
            Self::Instagram => "instagram",
            Self::Facebook => "facebook",
            Self::Nlp => "nlp",
        }
    }

    /// Upper-case token used in environment variable names.
    pub const fn env_token(self) -> &'static str {
        match self {
            Self::SimilarWeb => "SIMILARWEB",
            Self::Instagram => "INSTAGRAM",
            Self::Facebook => "FACEBOOK",
            Self::Nlp => "NLP",
        }
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "similarweb" => Ok(Self::SimilarWeb),
            "instagram" => Ok(Self::Instagram),
            "facebook" => Ok(Self::Facebook),
            "nlp" | "japerk" => Ok(Self::Nlp),
            other => Err(ValidationError::InvalidProvider {
                value: other.to_owned(),
            }),
        }
    }
}

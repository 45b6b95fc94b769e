use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Where an interaction signal came from.
///
/// Each source decays at its own daily rate λ: views fade fastest,
/// reviews linger longest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Like,
    View,
    Review,
    Order,
}

impl SignalSource {
    pub const ALL: [SignalSource; 4] = [
        SignalSource::Like,
        SignalSource::View,
        SignalSource::Review,
        SignalSource::Order,
    ];

    /// Per-day decay rate λ
    pub fn decay_rate(&self) -> f64 {
        match self {
            SignalSource::Like => 0.005,
            SignalSource::View => 0.02,
            SignalSource::Review => 0.002,
            SignalSource::Order => 0.01,
        }
    }

    /// Base weight for sources with a fixed weight. Reviews use the star rating.
    pub fn fixed_weight(&self) -> Option<f64> {
        match self {
            SignalSource::Like => Some(3.0),
            SignalSource::View => Some(1.0),
            SignalSource::Review => None,
            SignalSource::Order => Some(5.0),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalSource::Like => "like",
            SignalSource::View => "view",
            SignalSource::Review => "review",
            SignalSource::Order => "order",
        }
    }
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SignalSource {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "like" => Ok(SignalSource::Like),
            "view" => Ok(SignalSource::View),
            "review" => Ok(SignalSource::Review),
            "order" => Ok(SignalSource::Order),
            other => Err(format!("unknown signal source: {other}")),
        }
    }
}

/// Product reference used when an embedding has to be computed on demand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
}

impl CatalogItem {
    /// Text handed to the embedding service
    pub fn embedding_text(&self) -> String {
        match self.description.as_deref().map(str::trim) {
            Some(desc) if !desc.is_empty() => format!("{}\n{}", self.name.trim(), desc),
            _ => self.name.trim().to_string(),
        }
    }
}

/// One historical interaction of a customer with a product
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionSignal {
    pub source: SignalSource,
    pub product: CatalogItem,
    /// Absent when the product has not been embedded yet
    pub product_embedding: Option<Vec<f32>>,
    pub base_weight: f64,
    pub occurred_at: DateTime<Utc>,
}

impl InteractionSignal {
    /// `base_weight * exp(-λ * elapsed_days)`; future timestamps count as "now"
    pub fn decayed_weight(&self, now: DateTime<Utc>) -> f64 {
        let elapsed_secs = (now - self.occurred_at).num_milliseconds().max(0) as f64 / 1000.0;
        decayed_weight(self.base_weight, self.source.decay_rate(), elapsed_secs)
    }
}

pub fn decayed_weight(base_weight: f64, decay_rate: f64, elapsed_secs: f64) -> f64 {
    base_weight * (-decay_rate * elapsed_secs / SECONDS_PER_DAY).exp()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub customer_id: Uuid,
    pub product_id: Uuid,
    pub updated_at: DateTime<Utc>,
}

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A validated prediction from the external urgency model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelScore {
    /// 1..=10.
    pub score: u8,
    /// 0..=100.
    pub confidence: u8,
}

/// Strategy seam for symptom-text scoring. Selected once at startup from
/// configuration; the rules-only engine simply never produces a prediction.
///
/// Implementations must fail soft: any transport, timeout or validation
/// problem is `None`, never an error.
#[async_trait]
pub trait SymptomModel: Send + Sync {
    async fn predict(&self, symptoms_text: &str) -> Option<ModelScore>;
}

//! Analysis endpoint response

use serde::{Deserialize, Serialize};

/// Shown when the endpoint answers without a result
pub const NO_RESULT: &str = "no data";

/// Raw JSON body returned by the endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    /// Classification, e.g. `"humano"`; `"erro"` when the analysis itself failed
    #[serde(default)]
    pub resultado: Option<String>,
    /// Extra information, present on analysis failures
    #[serde(default)]
    pub detalhes: Option<String>,
}

/// Outcome of an analysis
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// Classification reported by the endpoint
    pub result: Option<String>,
    /// Details reported alongside the result
    pub details: Option<String>,
}

impl Verdict {
    /// Result text, or [`NO_RESULT`] when the endpoint sent none
    pub fn summary(&self) -> &str {
        self.result.as_deref().unwrap_or(NO_RESULT)
    }
}

impl From<AnalysisResponse> for Verdict {
    fn from(response: AnalysisResponse) -> Self {
        // An empty string reads as missing, the same as an absent field.
        let non_empty = |value: Option<String>| value.filter(|v| !v.is_empty());
        Self {
            result: non_empty(response.resultado),
            details: non_empty(response.detalhes),
        }
    }
}

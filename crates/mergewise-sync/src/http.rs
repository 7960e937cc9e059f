//! HTTP client for the external review scorer.
//!
//! Only pairs the synthesis left in the `review` band are escalated. The
//! scorer's own provider selection and failover happen on its side.

use chrono::{DateTime, Utc};
use mergewise_core::{EntityRecord, Recommendation, SmartAnalysisResult};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("scorer returned out-of-range score {0}")]
    InvalidScore(f64),
}

/// Body posted to the scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub record1: EntityRecord,
    pub record2: EntityRecord,
    /// Heuristic final score, 0..=100.
    pub heuristic_score: f64,
    pub triggered_rules: Vec<String>,
    pub risk_factors: Vec<String>,
    pub requested_at: DateTime<Utc>,
}

impl ReviewRequest {
    pub fn new(record1: &EntityRecord, record2: &EntityRecord, analysis: &SmartAnalysisResult) -> Self {
        Self {
            record1: record1.clone(),
            record2: record2.clone(),
            heuristic_score: analysis.confidence_score,
            triggered_rules: analysis
                .triggered_rules
                .iter()
                .map(|r| r.rule_name.clone())
                .collect(),
            risk_factors: analysis.risk_factors.clone(),
            requested_at: Utc::now(),
        }
    }
}

/// The scorer's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewScore {
    /// 0..=100.
    pub score: f64,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// Client for the scorer's `POST /api/review/score` endpoint.
pub struct ReviewClient {
    client: reqwest::Client,
    base_url: String,
}

impl ReviewClient {
    /// `base_url` should be like `http://localhost:8080`; a trailing slash is dropped.
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn score_url(&self) -> String {
        format!("{}/api/review/score", self.base_url)
    }

    /// Ask the scorer for a second opinion on an undecided pair.
    ///
    /// Returns `Ok(None)` without any request when the analysis is not in the
    /// `review` band.
    pub async fn escalate(
        &self,
        record1: &EntityRecord,
        record2: &EntityRecord,
        analysis: &SmartAnalysisResult,
    ) -> Result<Option<ReviewScore>, SyncError> {
        if analysis.recommendation != Recommendation::Review {
            debug!(
                recommendation = analysis.recommendation.as_str(),
                "pair is decided; not escalating"
            );
            return Ok(None);
        }
        let request = ReviewRequest::new(record1, record2, analysis);
        self.send(&request).await.map(Some)
    }

    pub async fn send(&self, request: &ReviewRequest) -> Result<ReviewScore, SyncError> {
        let url = self.score_url();
        info!(url = %url, heuristic_score = request.heuristic_score, "escalating pair for review");
        let resp = self.client.post(&url).json(request).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp.text().await?;
        let score = parse_score(&body)?;
        info!(score = score.score, provider = ?score.provider, "review score received");
        Ok(score)
    }
}

fn parse_score(body: &str) -> Result<ReviewScore, SyncError> {
    let score: ReviewScore = serde_json::from_str(body)?;
    if !(0.0..=100.0).contains(&score.score) {
        return Err(SyncError::InvalidScore(score.score));
    }
    Ok(score)
}

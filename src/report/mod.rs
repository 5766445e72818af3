//! End-of-round statistics delivery
//!
//! Reports are fire-and-forget: a failed POST is logged and the round
//! continues.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, error};

use crate::game::map::GameMode;
use crate::game::points::Statistics;
use crate::game::Alliance;

/// Body POSTed to the statistics endpoint
#[derive(Debug, Clone, Serialize)]
pub struct RoundReport {
    pub map: String,
    pub mode: GameMode,
    pub winner: Alliance,
    pub finished_at: DateTime<Utc>,
    pub statistics: Vec<Statistics>,
}

/// HTTP client for the statistics endpoint
#[derive(Clone)]
pub struct StatsReporter {
    client: Client,
    url: String,
}

impl StatsReporter {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn send(&self, report: &RoundReport) -> Result<(), ReportError> {
        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(report)
            .send()
            .await
            .map_err(ReportError::Request)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ReportError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }

    /// Send in the background; failures are only logged
    pub fn spawn_send(&self, report: RoundReport) {
        let reporter = self.clone();
        tokio::spawn(async move {
            let players = report.statistics.len();
            match reporter.send(&report).await {
                Ok(()) => debug!(players, map = %report.map, "Round statistics sent"),
                Err(e) => error!(error = %e, "Failed to send round statistics"),
            }
        });
    }
}

/// Statistics delivery errors
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Request failed: {0}")]
    Request(reqwest::Error),

    #[error("Statistics endpoint error ({status}): {body}")]
    Api { status: u16, body: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_serializes_scoreboard() {
        let report = RoundReport {
            map: "arena.vtmap".into(),
            mode: GameMode::TeamDeathmatch,
            winner: Alliance::Red,
            finished_at: Utc::now(),
            statistics: vec![Statistics {
                tank_name: "alpha".into(),
                kills: 2,
                calculated_points: 20,
                ..Default::default()
            }],
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["mode"], "team_deathmatch");
        assert_eq!(json["winner"], "red");
        assert_eq!(json["statistics"][0]["kills"], 2);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_error() {
        let reporter = StatsReporter::new("http://127.0.0.1:9/stats");
        let report = RoundReport {
            map: "m".into(),
            mode: GameMode::Deathmatch,
            winner: Alliance::None,
            finished_at: Utc::now(),
            statistics: Vec::new(),
        };
        assert!(matches!(
            reporter.send(&report).await,
            Err(ReportError::Request(_))
        ));
    }
}

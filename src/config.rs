use anyhow::Context;
use clap::Args;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::debug;

use crate::rating::{RatingConfig, RatingError};

#[derive(Args, Debug, Clone)]
pub struct DatabaseArgs {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    pub database_url: Option<String>,

    /// Upper bound on pooled connections
    #[arg(long, env = "TUTOR_DB_MAX_CONNECTIONS", default_value_t = 5, global = true)]
    pub max_connections: u32,
}

impl DatabaseArgs {
    pub async fn connect(&self) -> anyhow::Result<PgPool> {
        let url = self
            .database_url
            .as_deref()
            .context("DATABASE_URL must be set to a Postgres instance")?;

        debug!(max_connections = self.max_connections, "connecting to Postgres");
        PgPoolOptions::new()
            .max_connections(self.max_connections.max(1))
            .connect(url)
            .await
            .context("failed to connect to Postgres")
    }
}

/// Sub-score weights; must add up to 1.0.
#[derive(Args, Debug, Clone)]
pub struct WeightArgs {
    #[arg(long, env = "TUTOR_ASSIGNMENT_WEIGHT", default_value_t = 0.4)]
    pub assignment_weight: f64,

    #[arg(long, env = "TUTOR_ACTIVITY_WEIGHT", default_value_t = 0.3)]
    pub activity_weight: f64,

    #[arg(long, env = "TUTOR_ATTENDANCE_WEIGHT", default_value_t = 0.2)]
    pub attendance_weight: f64,

    #[arg(long, env = "TUTOR_ENGAGEMENT_WEIGHT", default_value_t = 0.1)]
    pub engagement_weight: f64,
}

impl WeightArgs {
    pub fn rating_config(&self) -> Result<RatingConfig, RatingError> {
        RatingConfig::new(
            self.assignment_weight,
            self.activity_weight,
            self.attendance_weight,
            self.engagement_weight,
        )
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        weights: WeightArgs,
    }

    #[test]
    fn defaults_match_the_standard_weights() {
        let harness = Harness::parse_from(["harness"]);
        assert_eq!(harness.weights.rating_config().unwrap(), RatingConfig::default());
    }

    #[test]
    fn overrides_must_still_sum_to_one() {
        let harness = Harness::parse_from(["harness", "--assignment-weight", "0.7"]);
        assert!(matches!(
            harness.weights.rating_config(),
            Err(RatingError::InvalidConfiguration(_))
        ));

        let harness = Harness::parse_from([
            "harness",
            "--assignment-weight",
            "0.5",
            "--activity-weight",
            "0.2",
        ]);
        assert!(harness.weights.rating_config().is_ok());
    }

    #[tokio::test]
    async fn connecting_without_url_fails_fast() {
        let args = DatabaseArgs {
            database_url: None,
            max_connections: 5,
        };
        let err = args.connect().await.unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }
}

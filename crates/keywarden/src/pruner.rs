//! retention pruning for history rows and expired recovery tokens.
//!
//! runs in the orchestrator process on the same poll interval. each cycle
//! makes two delete-many passes: pivtoken history whose active range ended
//! before the retention window, and recovery tokens expired before it.

use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use keywarden_db::{Database, KeywardenDb};
use keywarden_types::Config;

/// periodic pruner for aged-out rows.
#[derive(Clone)]
pub struct Pruner {
    db: KeywardenDb,
    retention: chrono::Duration,
    poll_interval: Duration,
}

impl Pruner {
    /// create a pruner from config.
    pub fn new(db: KeywardenDb, config: &Config) -> Self {
        Self {
            db,
            retention: chrono::Duration::seconds(config.history_duration_secs as i64),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
        }
    }

    /// run one pruning cycle. returns (history rows, recovery tokens) deleted.
    pub async fn collect(&self) -> keywarden_db::Result<(u64, u64)> {
        let cutoff = Utc::now() - self.retention;
        let history = self.db.prune_pivtoken_history(cutoff).await?;
        let tokens = self.db.prune_expired_recovery_tokens(cutoff).await?;
        Ok((history, tokens))
    }

    /// spawn the background pruning task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                retention_secs = self.retention.num_seconds(),
                interval_secs = self.poll_interval.as_secs(),
                "starting pruner"
            );

            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                match self.collect().await {
                    Ok((0, 0)) => {}
                    Ok((history, tokens)) => {
                        debug!(history, tokens, "pruning cycle completed");
                    }
                    Err(e) => {
                        warn!(error = %e, "pruning cycle failed");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keywarden_types::test_utils::TestPivTokenBuilder;
    use keywarden_types::{RecoveryConfiguration, RecoveryToken};

    async fn setup() -> (KeywardenDb, RecoveryConfiguration) {
        let db = KeywardenDb::new_in_memory().await.unwrap();
        let mut cfg = RecoveryConfiguration::from_template("AAAA==", Utc::now()).unwrap();
        cfg.elevate();
        let cfg = db.create_recovery_configuration(&cfg).await.unwrap();
        (db, cfg)
    }

    fn pruner(db: &KeywardenDb, retention_secs: u64) -> Pruner {
        let config = Config {
            history_duration_secs: retention_secs,
            ..Config::default()
        };
        Pruner::new(db.clone(), &config)
    }

    #[tokio::test]
    async fn test_prunes_old_history_and_expired_tokens() {
        let (db, cfg) = setup().await;

        let piv = TestPivTokenBuilder::new(1).build();
        let token = RecoveryToken::generate(piv.guid.clone(), &cfg, Utc::now());
        let (piv, _) = db.create_pivtoken(&piv, &token).await.unwrap();

        // a token that expired well outside any retention window
        let mut stale = RecoveryToken::generate(piv.guid.clone(), &cfg, Utc::now());
        stale.expired = Some(Utc::now() - chrono::Duration::days(90));
        db.create_recovery_token(&stale, None).await.unwrap();

        // zero retention: anything expired already counts as aged out
        let p = pruner(&db, 0);

        let (history, tokens) = p.collect().await.unwrap();
        assert_eq!(history, 0); // no history rows yet
        assert_eq!(tokens, 1); // only the expired token goes

        let chain = db.list_recovery_tokens_for_pivtoken(&piv.guid).await.unwrap();
        assert_eq!(chain.len(), 1);
        assert!(chain[0].expired.is_none());

        // deleting the piv archives it; with zero retention the next cycle
        // reaps the history row
        db.delete_pivtoken(&piv).await.unwrap();
        assert_eq!(db.list_pivtoken_history(&piv.guid).await.unwrap().len(), 1);
        let (history, _) = p.collect().await.unwrap();
        assert_eq!(history, 1);
        assert!(db.list_pivtoken_history(&piv.guid).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retention_window_preserves_recent_rows() {
        let (db, cfg) = setup().await;

        let piv = TestPivTokenBuilder::new(1).build();
        let token = RecoveryToken::generate(piv.guid.clone(), &cfg, Utc::now());
        let (piv, _) = db.create_pivtoken(&piv, &token).await.unwrap();
        db.delete_pivtoken(&piv).await.unwrap();

        // 30 day retention: the fresh history row survives
        let p = pruner(&db, 30 * 24 * 60 * 60);
        let (history, tokens) = p.collect().await.unwrap();
        assert_eq!(history, 0);
        assert_eq!(tokens, 0);
        assert_eq!(db.list_pivtoken_history(&piv.guid).await.unwrap().len(), 1);
    }
}

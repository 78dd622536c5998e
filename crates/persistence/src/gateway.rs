//! `PersistenceGateway`: composes the hot and durable tiers and implements
//! the load-on-start precedence and crashed-session detection described in
//! spec §4.6 ("Recovery on start").

use chrono::{DateTime, NaiveDate, Utc};
use layline_core::{SessionStatus, TopLevelConfig};

use crate::document::StateDocument;
use crate::durable_store::DurableStore;
use crate::error::Result;
use crate::hot_store::HotStore;

pub struct PersistenceGateway {
    hot: HotStore,
    durable: DurableStore,
}

impl PersistenceGateway {
    #[must_use]
    pub fn new(hot: HotStore, durable: DurableStore) -> Self {
        Self { hot, durable }
    }

    /// Loads on cold start: hot tier first, falling back to durable if hot is
    /// missing, failed to parse, or is older than the durable copy (the hot
    /// file can lag durable when the process was killed between a durable
    /// flush and the next hot write), then a fresh document for `today`. Any
    /// `RUNNING` session found is marked `CRASHED` and retired. A document
    /// whose date predates `today` is reset for the new trading day, carrying
    /// forward only its config, session index, report index, and API keys.
    pub async fn load_on_start(
        &self,
        default_config: TopLevelConfig,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<StateDocument> {
        let hot = self.hot.load()?;
        let loaded = match hot {
            None => self.durable.load().await,
            Some(hot_doc) => match self.durable.load().await {
                Some(durable_doc) if durable_doc.saved_at > hot_doc.saved_at => Some(durable_doc),
                _ => Some(hot_doc),
            },
        };

        let mut document = loaded.unwrap_or_else(|| StateDocument::new(default_config, today, now));

        if let Some(session) = document.session.as_mut() {
            if session.status == SessionStatus::Running {
                session.status = SessionStatus::Crashed;
                session.stop_time = Some(now);
            }
        }
        document.retire_session();

        if !document.is_for_date(today) {
            let mut fresh = StateDocument::new(document.config.clone(), today, now);
            fresh.sessions_index = document.sessions_index;
            fresh.reports_index = document.reports_index;
            fresh.api_keys = document.api_keys;
            document = fresh;
        }

        Ok(document)
    }

    /// Writes both tiers. The hot write is synchronous and surfaces errors;
    /// the durable write is best-effort and never fails this call.
    pub async fn save(&self, document: &StateDocument) -> Result<()> {
        self.hot.save(document)?;
        self.durable.save(document).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use layline_core::{Session, SessionMode};
    use std::collections::BTreeSet;

    fn gateway(dir: &std::path::Path) -> PersistenceGateway {
        let hot = HotStore::new(dir.join("hot.json"));
        let durable = DurableStore::local_disk(&dir.join("durable"), "", "state.json").unwrap();
        PersistenceGateway::new(hot, durable)
    }

    #[tokio::test]
    async fn cold_start_with_no_files_yields_fresh_document() {
        let dir = tempfile::tempdir().unwrap();
        let gw = gateway(dir.path());
        let today = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();

        let document = gw.load_on_start(TopLevelConfig::default(), today, now).await.unwrap();
        assert_eq!(document.date, today);
        assert!(document.session.is_none());
    }

    #[tokio::test]
    async fn running_session_becomes_crashed_and_retired_on_restart() {
        let dir = tempfile::tempdir().unwrap();
        let gw = gateway(dir.path());
        let today = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();

        let mut document = StateDocument::new(TopLevelConfig::default(), today, now);
        document.session = Some(Session::new(today, now, SessionMode::DryRun, BTreeSet::new()));
        gw.save(&document).await.unwrap();

        let recovered = gw.load_on_start(TopLevelConfig::default(), today, now).await.unwrap();
        assert!(recovered.session.is_none());
        assert_eq!(recovered.sessions_index.len(), 1);
        assert_eq!(recovered.sessions_index[0].status, SessionStatus::Crashed);
    }

    #[tokio::test]
    async fn stale_date_resets_daily_state_but_keeps_index() {
        let dir = tempfile::tempdir().unwrap();
        let gw = gateway(dir.path());
        let yesterday = NaiveDate::from_ymd_opt(2025, 12, 31).unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();

        let mut document = StateDocument::new(TopLevelConfig::default(), yesterday, now);
        document.dedup_selections.insert((1, "1.1".to_string()));
        gw.save(&document).await.unwrap();

        let loaded = gw.load_on_start(TopLevelConfig::default(), today, now).await.unwrap();
        assert_eq!(loaded.date, today);
        assert!(loaded.dedup_selections.is_empty());
    }

    #[tokio::test]
    async fn durable_tier_preferred_when_hot_is_older() {
        let dir = tempfile::tempdir().unwrap();
        let hot_store = HotStore::new(dir.join("hot.json"));
        let durable = DurableStore::local_disk(&dir.join("durable"), "", "state.json").unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let earlier = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2026, 1, 1, 8, 5, 0).unwrap();

        let mut stale_hot = StateDocument::new(TopLevelConfig::default(), today, earlier);
        stale_hot.reports_index.push("stale".to_string());
        hot_store.save(&stale_hot).unwrap();

        let mut fresh_durable = StateDocument::new(TopLevelConfig::default(), today, later);
        fresh_durable.reports_index.push("fresh".to_string());
        durable.save(&fresh_durable).await;

        let gw = PersistenceGateway::new(hot_store, durable);
        let loaded = gw.load_on_start(TopLevelConfig::default(), today, later).await.unwrap();
        assert_eq!(loaded.reports_index, vec!["fresh".to_string()]);
    }

    #[tokio::test]
    async fn durable_tier_used_when_hot_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let durable = DurableStore::local_disk(&dir.join("durable"), "", "state.json").unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        let mut document = StateDocument::new(TopLevelConfig::default(), today, now);
        document.reports_index.push("report-1".to_string());
        durable.save(&document).await;

        let hot = HotStore::new(dir.join("hot.json"));
        let gw = PersistenceGateway::new(hot, durable);
        let loaded = gw.load_on_start(TopLevelConfig::default(), today, now).await.unwrap();
        assert_eq!(loaded.reports_index, vec!["report-1".to_string()]);
    }
}

//! Classifying items and crediting disposal proofs.

use crate::classifier::{Classification, Classifier, Image};
use crate::config::RewardsConfig;
use crate::error::{Error, Result};
use crate::model::{DisposalRecord, WasteCategory};
use crate::progression::{apply_disposal, Progression};
use crate::registry::ServiceRegistry;
use crate::session::Session;
use crate::store::{DisposalStore, ProfileStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// One mutex per user id; disposals for the same user run one at a time
#[derive(Default)]
pub struct UserLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub fn handle(&self, user_id: &str) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| Error::Internal("user lock table poisoned".to_string()))?;
        Ok(locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    /// Give back a handle; the entry goes once nobody else holds it
    pub fn release(&self, user_id: &str, handle: Arc<Mutex<()>>) {
        drop(handle);
        if let Ok(mut locks) = self.locks.lock() {
            if locks
                .get(user_id)
                .is_some_and(|lock| Arc::strong_count(lock) == 1)
            {
                locks.remove(user_id);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub enum ProofOutcome {
    Accepted {
        progression: Box<Progression>,
        reason: String,
        digest: String,
        /// Set when the credit stands but the history write failed
        history_error: Option<String>,
    },
    Rejected {
        reason: String,
        category: Option<WasteCategory>,
        sub_category: String,
        digest: String,
    },
    /// Image already credited in this session
    Duplicate { digest: String },
}

pub struct DisposalService {
    profiles: Arc<dyn ProfileStore>,
    disposals: Arc<dyn DisposalStore>,
    classifier: Arc<dyn Classifier>,
    rewards: RewardsConfig,
    locks: UserLocks,
}

impl DisposalService {
    pub fn new(services: &ServiceRegistry, rewards: RewardsConfig) -> Self {
        Self {
            profiles: services.profiles.clone(),
            disposals: services.disposals.clone(),
            classifier: services.classifier.clone(),
            rewards,
            locks: UserLocks::default(),
        }
    }

    /// Credit one disposal to `user_id`.
    ///
    /// Profile and history are read before anything is written. The profile
    /// update is a compare-and-set against the progress that was read, so a
    /// concurrent writer elsewhere surfaces as [`Error::Conflict`] with no
    /// history change. The profile update is the commit point: a failure in
    /// the evictions or the insert that follow it comes back as
    /// [`Error::HistoryNotSaved`] carrying the committed progression.
    pub fn record_disposal(
        &self,
        user_id: &str,
        xp_gained: i64,
        category: WasteCategory,
        sub_category: &str,
    ) -> Result<Progression> {
        if xp_gained > self.rewards.max_xp_per_event {
            return Err(Error::InvalidInput(format!(
                "{} XP exceeds the per-event maximum of {}",
                xp_gained, self.rewards.max_xp_per_event
            )));
        }

        let handle = self.locks.handle(user_id)?;
        let result = handle
            .lock()
            .map_err(|_| Error::Internal(format!("lock for {} poisoned", user_id)))
            .and_then(|_guard| self.commit(user_id, xp_gained, category, sub_category));
        self.locks.release(user_id, handle);
        result
    }

    fn commit(
        &self,
        user_id: &str,
        xp_gained: i64,
        category: WasteCategory,
        sub_category: &str,
    ) -> Result<Progression> {
        let profile = self
            .profiles
            .find_by_id(user_id)?
            .ok_or_else(|| Error::ProfileNotFound(user_id.to_string()))?;
        let history = self.disposals.list_records(user_id)?;

        let record = DisposalRecord::new(user_id, category, sub_category);
        let progression = apply_disposal(&profile, xp_gained, &history, record)?;

        self.profiles.update_progress(
            user_id,
            progression.previous,
            progression.profile.progress(),
        )?;
        if let Err(e) = self.write_history(&progression) {
            warn!(user_id, error = %e, "disposal history not updated");
            return Err(Error::HistoryNotSaved {
                progression: Box::new(progression),
                source: Box::new(e),
            });
        }

        info!(
            user_id,
            xp_gained,
            level = progression.profile.level,
            exp = progression.profile.exp,
            leveled_up = progression.leveled_up,
            "disposal recorded"
        );
        Ok(progression)
    }

    fn write_history(&self, progression: &Progression) -> Result<()> {
        for evicted in &progression.history.evict {
            debug!(record_id = %evicted.id, "evicting disposal record");
            self.disposals.delete_record(evicted.id)?;
        }
        self.disposals.insert_record(&progression.history.insert)
    }

    /// Identify what an item is and where it goes. Awards nothing.
    pub fn scan_item(&self, session: &Session, image: &Image) -> Result<Classification> {
        let snapshot = session.get().ok_or(Error::NoSession)?;
        let classification = self
            .classifier
            .classify_item(&snapshot.access_token, image)?;
        debug!(
            category = %classification.category,
            sub_category = %classification.sub_category,
            "item classified"
        );
        Ok(classification)
    }

    /// Verify a photo of a disposal and credit it to the session's user
    pub fn submit_proof(&self, session: &mut Session, image: &Image) -> Result<ProofOutcome> {
        let snapshot = session.get().ok_or(Error::NoSession)?;
        let digest = image.digest();
        if session.is_credited(&digest) {
            debug!(digest = %digest, "proof image already credited");
            return Ok(ProofOutcome::Duplicate { digest });
        }

        let verdict = self
            .classifier
            .verify_disposal(&snapshot.access_token, image)?;
        let category = match verdict.category {
            Some(category) if verdict.passed => category,
            _ => {
                info!(reason = %verdict.reason, "proof rejected");
                return Ok(ProofOutcome::Rejected {
                    reason: verdict.reason,
                    category: verdict.category,
                    sub_category: verdict.sub_category,
                    digest,
                });
            }
        };

        let user_id = snapshot.profile.id.clone();
        let xp = self.rewards.xp_for(&verdict.sub_category);
        let (progression, history_error) =
            match self.record_disposal(&user_id, xp, category, &verdict.sub_category) {
                Ok(progression) => (progression, None),
                Err(Error::HistoryNotSaved {
                    progression,
                    source,
                }) => (*progression, Some(*source)),
                Err(e) => return Err(e),
            };
        session.mark_credited(&digest);

        if let Some(current) = session.get() {
            let mut next = current.clone();
            next.profile = current
                .profile
                .clone()
                .with_progress(progression.profile.progress());
            next.history = match &history_error {
                None => progression.retained.clone(),
                Some(_) => self
                    .disposals
                    .list_records(&user_id)
                    .unwrap_or_else(|_| current.history.clone()),
            };
            session.replace(next)?;
        }
        if let Err(e) = session.refresh_rankings(self.profiles.as_ref()) {
            warn!(error = %e, "leaderboard refresh failed");
        }

        Ok(ProofOutcome::Accepted {
            progression: Box::new(progression),
            reason: verdict.reason,
            digest,
            history_error: history_error.map(|e| e.to_string()),
        })
    }
}

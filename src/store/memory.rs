//! Process-local store used by the offline backend and by tests.

use super::{DisposalStore, ProfileStore};
use crate::error::{Error, Result};
use crate::leaderboard::{self, Scope};
use crate::model::{DisposalRecord, Progress, UserProfile};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    users: Vec<UserProfile>,
    /// Kept in insertion order
    disposals: Vec<DisposalRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn with_profiles(profiles: Vec<UserProfile>) -> Self {
        Self {
            tables: Mutex::new(Tables {
                users: profiles,
                disposals: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| Error::Internal("memory store lock poisoned".to_string()))
    }

    #[cfg(test)]
    pub fn all_records(&self) -> Result<Vec<DisposalRecord>> {
        Ok(self.lock()?.disposals.clone())
    }
}

impl ProfileStore for MemoryStore {
    fn find_by_id(&self, id: &str) -> Result<Option<UserProfile>> {
        Ok(self.lock()?.users.iter().find(|u| u.id == id).cloned())
    }

    fn find_by_email(&self, email: &str) -> Result<Option<UserProfile>> {
        Ok(self.lock()?.users.iter().find(|u| u.email == email).cloned())
    }

    fn create_profile(&self, profile: &UserProfile) -> Result<UserProfile> {
        let mut tables = self.lock()?;
        if tables.users.iter().any(|u| u.id == profile.id) {
            return Err(Error::InvalidInput(format!(
                "profile {} already exists",
                profile.id
            )));
        }
        tables.users.push(profile.clone());
        Ok(profile.clone())
    }

    fn update_progress(&self, id: &str, expected: Progress, next: Progress) -> Result<()> {
        let mut tables = self.lock()?;
        let user = tables
            .users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| Error::ProfileNotFound(id.to_string()))?;
        if user.progress() != expected {
            return Err(Error::Conflict(id.to_string()));
        }
        user.exp = next.exp;
        user.level = next.level;
        user.total_disposal = next.total_disposal;
        Ok(())
    }

    fn top(&self, scope: &Scope, limit: usize) -> Result<Vec<UserProfile>> {
        let users = self.lock()?.users.clone();
        Ok(leaderboard::rank(users, scope, limit))
    }
}

impl DisposalStore for MemoryStore {
    fn list_records(&self, user_id: &str) -> Result<Vec<DisposalRecord>> {
        let mut records: Vec<DisposalRecord> = self
            .lock()?
            .disposals
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    fn delete_record(&self, id: Uuid) -> Result<()> {
        self.lock()?.disposals.retain(|r| r.id != id);
        Ok(())
    }

    fn insert_record(&self, record: &DisposalRecord) -> Result<()> {
        self.lock()?.disposals.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WasteCategory;

    fn user(id: &str, region: &str, level: i64, exp: i64) -> UserProfile {
        UserProfile {
            id: id.to_string(),
            name: id.to_string(),
            email: format!("{}@example.com", id),
            image: String::new(),
            region: region.to_string(),
            exp,
            level,
            total_disposal: 0,
        }
    }

    #[test]
    fn test_lookup_and_create() {
        let store = MemoryStore::new();
        assert!(store.find_by_id("a").unwrap().is_none());
        store.create_profile(&user("a", "Taipei", 1, 0)).unwrap();
        assert!(store.find_by_id("a").unwrap().is_some());
        assert_eq!(
            store.find_by_email("a@example.com").unwrap().unwrap().id,
            "a"
        );
        assert!(store.create_profile(&user("a", "Taipei", 1, 0)).is_err());
    }

    #[test]
    fn test_update_progress_compare_and_set() {
        let store = MemoryStore::with_profiles(vec![user("a", "Taipei", 1, 10)]);
        let expected = Progress {
            exp: 10,
            level: 1,
            total_disposal: 0,
        };
        let next = Progress {
            exp: 60,
            level: 1,
            total_disposal: 1,
        };
        store.update_progress("a", expected, next).unwrap();
        assert_eq!(store.find_by_id("a").unwrap().unwrap().progress(), next);

        // stale expectation
        let err = store.update_progress("a", expected, next).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let err = store.update_progress("zz", expected, next).unwrap_err();
        assert!(matches!(err, Error::ProfileNotFound(_)));
    }

    #[test]
    fn test_top_scopes() {
        let store = MemoryStore::with_profiles(vec![
            user("a", "Taipei", 1, 0),
            user("b", "Tainan", 5, 0),
            user("c", "taipei", 2, 0),
        ]);
        let global = store.top(&Scope::Global, 10).unwrap();
        assert_eq!(global[0].id, "b");
        let local = store.top(&Scope::Regional("Taipei".to_string()), 10).unwrap();
        let ids: Vec<_> = local.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);
    }

    #[test]
    fn test_records_per_user() {
        let store = MemoryStore::new();
        let mine = DisposalRecord::new("a", WasteCategory::Recyclable, "glass");
        let theirs = DisposalRecord::new("b", WasteCategory::NonRecyclable, "others");
        store.insert_record(&mine).unwrap();
        store.insert_record(&theirs).unwrap();
        assert_eq!(store.list_records("a").unwrap(), vec![mine.clone()]);
        store.delete_record(mine.id).unwrap();
        assert!(store.list_records("a").unwrap().is_empty());
        assert_eq!(store.all_records().unwrap().len(), 1);
    }
}

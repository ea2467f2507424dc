pub mod memory;
pub mod rest;

use crate::error::Result;
use crate::leaderboard::Scope;
use crate::model::{DisposalRecord, Progress, UserProfile};
use uuid::Uuid;

pub use memory::MemoryStore;
pub use rest::RestStore;

/// The external `user` table
pub trait ProfileStore: Send + Sync {
    fn find_by_id(&self, id: &str) -> Result<Option<UserProfile>>;

    fn find_by_email(&self, email: &str) -> Result<Option<UserProfile>>;

    /// Insert a new profile and return the stored row
    fn create_profile(&self, profile: &UserProfile) -> Result<UserProfile>;

    /// Write `next` only if the stored progress still equals `expected`.
    /// Fails with `Error::Conflict` otherwise.
    fn update_progress(&self, id: &str, expected: Progress, next: Progress) -> Result<()>;

    /// Top `limit` profiles in `scope`, level descending then exp descending
    fn top(&self, scope: &Scope, limit: usize) -> Result<Vec<UserProfile>>;
}

/// The external `disposal` table
pub trait DisposalStore: Send + Sync {
    /// All records of a user, oldest first; equal timestamps keep insertion order
    fn list_records(&self, user_id: &str) -> Result<Vec<DisposalRecord>>;

    fn delete_record(&self, id: Uuid) -> Result<()>;

    fn insert_record(&self, record: &DisposalRecord) -> Result<()>;
}

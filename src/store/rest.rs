//! Profile and disposal tables behind a PostgREST (Supabase) endpoint.

use super::{DisposalStore, ProfileStore};
use crate::error::{Error, Result, Service};
use crate::leaderboard::{self, Scope};
use crate::model::{DisposalRecord, Progress, UserProfile};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

const PROFILE_TABLE: &str = "user";
const DISPOSAL_TABLE: &str = "disposal";

/// Access token of the signed-in user, shared between the store and the
/// session so row-level security sees the right caller.
#[derive(Debug, Clone, Default)]
pub struct TokenSlot(Arc<RwLock<Option<String>>>);

impl TokenSlot {
    pub fn set(&self, token: Option<String>) {
        if let Ok(mut slot) = self.0.write() {
            *slot = token;
        }
    }

    pub fn get(&self) -> Option<String> {
        self.0.read().ok().and_then(|slot| slot.clone())
    }
}

pub struct RestStore {
    base_url: String,
    api_key: String,
    token: TokenSlot,
    agent: ureq::Agent,
}

type Query = Vec<(&'static str, String)>;

impl RestStore {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration, token: TokenSlot) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            token,
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    fn request(&self, method: &str, table: &str, query: &Query) -> ureq::Request {
        let url = format!("{}/rest/v1/{}", self.base_url, table);
        let bearer = self.token.get().unwrap_or_else(|| self.api_key.clone());
        let mut req = self
            .agent
            .request(method, &url)
            .set("apikey", &self.api_key)
            .set("Authorization", &format!("Bearer {}", bearer));
        for (key, value) in query {
            req = req.query(key, value);
        }
        req
    }

    fn fetch<T: DeserializeOwned>(
        &self,
        service: Service,
        table: &str,
        query: Query,
    ) -> Result<Vec<T>> {
        let resp = self
            .request("GET", table, &query)
            .call()
            .map_err(|e| Error::from_http(service, e))?;
        resp.into_json().map_err(|e| Error::decode(service, e))
    }

    fn first_profile(&self, query: Query) -> Result<Option<UserProfile>> {
        let rows: Vec<UserProfile> = self.fetch(Service::ProfileStore, PROFILE_TABLE, query)?;
        Ok(rows.into_iter().next())
    }
}

fn lookup_query(field: &'static str, value: &str) -> Query {
    vec![("select", "*".to_string()), (field, format!("eq.{}", value))]
}

fn rank_query(scope: &Scope, limit: usize) -> Query {
    let mut query = vec![("select", "*".to_string())];
    if let Scope::Regional(pattern) = scope {
        query.push(("region", format!("ilike.{}", pattern)));
    }
    query.push(("order", "level.desc,exp.desc".to_string()));
    query.push(("limit", limit.to_string()));
    query
}

/// Filter matching the row only while it still holds `expected`
fn compare_and_set_query(id: &str, expected: Progress) -> Query {
    vec![
        ("id", format!("eq.{}", id)),
        ("exp", format!("eq.{}", expected.exp)),
        ("level", format!("eq.{}", expected.level)),
        ("total_disposal", format!("eq.{}", expected.total_disposal)),
    ]
}

fn history_query(user_id: &str) -> Query {
    vec![
        ("select", "*".to_string()),
        ("user_id", format!("eq.{}", user_id)),
        ("order", "created_at.asc".to_string()),
    ]
}

impl ProfileStore for RestStore {
    fn find_by_id(&self, id: &str) -> Result<Option<UserProfile>> {
        self.first_profile(lookup_query("id", id))
    }

    fn find_by_email(&self, email: &str) -> Result<Option<UserProfile>> {
        self.first_profile(lookup_query("email", email))
    }

    fn create_profile(&self, profile: &UserProfile) -> Result<UserProfile> {
        let body = serde_json::to_value(profile).map_err(|e| Error::Internal(e.to_string()))?;
        let resp = self
            .request("POST", PROFILE_TABLE, &Vec::new())
            .set("Prefer", "return=representation")
            .send_json(body)
            .map_err(|e| Error::from_http(Service::ProfileStore, e))?;
        let rows: Vec<UserProfile> = resp
            .into_json()
            .map_err(|e| Error::decode(Service::ProfileStore, e))?;
        rows.into_iter()
            .next()
            .ok_or_else(|| Error::decode(Service::ProfileStore, "insert returned no row"))
    }

    fn update_progress(&self, id: &str, expected: Progress, next: Progress) -> Result<()> {
        let resp = self
            .request("PATCH", PROFILE_TABLE, &compare_and_set_query(id, expected))
            .set("Prefer", "return=representation")
            .send_json(json!({
                "exp": next.exp,
                "level": next.level,
                "total_disposal": next.total_disposal,
            }))
            .map_err(|e| Error::from_http(Service::ProfileStore, e))?;
        let rows: Vec<serde_json::Value> = resp
            .into_json()
            .map_err(|e| Error::decode(Service::ProfileStore, e))?;
        if rows.is_empty() {
            // either gone or changed underneath us; both mean the read is stale
            return Err(Error::Conflict(id.to_string()));
        }
        Ok(())
    }

    fn top(&self, scope: &Scope, limit: usize) -> Result<Vec<UserProfile>> {
        let mut entries: Vec<UserProfile> =
            self.fetch(Service::ProfileStore, PROFILE_TABLE, rank_query(scope, limit))?;
        if !leaderboard::is_ranked(&entries) {
            warn!(scope = %scope.label(), "store returned an unordered ranking");
            entries.sort_by(leaderboard::rank_order);
        }
        Ok(entries)
    }
}

impl DisposalStore for RestStore {
    fn list_records(&self, user_id: &str) -> Result<Vec<DisposalRecord>> {
        self.fetch(Service::DisposalStore, DISPOSAL_TABLE, history_query(user_id))
    }

    fn delete_record(&self, id: Uuid) -> Result<()> {
        self.request("DELETE", DISPOSAL_TABLE, &vec![("id", format!("eq.{}", id))])
            .call()
            .map_err(|e| Error::from_http(Service::DisposalStore, e))?;
        Ok(())
    }

    fn insert_record(&self, record: &DisposalRecord) -> Result<()> {
        let body = serde_json::to_value(record).map_err(|e| Error::Internal(e.to_string()))?;
        self.request("POST", DISPOSAL_TABLE, &Vec::new())
            .set("Prefer", "return=minimal")
            .send_json(body)
            .map_err(|e| Error::from_http(Service::DisposalStore, e))?;
        Ok(())
    }
}

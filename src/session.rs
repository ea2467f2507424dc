//! The signed-in user's session: profile, standings and recent history,
//! held by the caller and replaced as a whole after every change.

use crate::error::{Error, Resolved, Result};
use crate::geo::{self, Coordinates};
use crate::leaderboard::{Leaderboards, Scope, LEADERBOARD_LIMIT};
use crate::model::{DisposalRecord, Identity, UserProfile};
use crate::registry::ServiceRegistry;
use crate::store::ProfileStore;
use std::collections::HashSet;
use std::sync::mpsc::{channel, Receiver, Sender};
use tracing::{debug, info, warn};

/// Everything the shell shows about the signed-in user
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub profile: UserProfile,
    pub rankings: Leaderboards,
    /// Oldest first
    pub history: Vec<DisposalRecord>,
    pub region: Resolved<String>,
    pub access_token: String,
    /// The profile was created by this sign-in
    pub created: bool,
}

#[derive(Debug, Clone)]
pub enum SessionState {
    Unauthenticated,
    Initializing,
    Active(Box<SessionSnapshot>),
    Failed(String),
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::Initializing => "initializing",
            SessionState::Active(_) => "active",
            SessionState::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn { user_id: String },
    Replaced { user_id: String, level: i64, exp: i64 },
    SignedOut,
    Failed(String),
}

pub struct Session {
    id: String,
    state: SessionState,
    subscribers: Vec<Sender<SessionEvent>>,
    /// Digests of proof images already credited
    credited: HashSet<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            state: SessionState::Unauthenticated,
            subscribers: Vec::new(),
            credited: HashSet::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn subscribe(&mut self) -> Receiver<SessionEvent> {
        let (tx, rx) = channel();
        self.subscribers.push(tx);
        rx
    }

    fn emit(&mut self, event: SessionEvent) {
        // Receivers that went away are dropped
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Sign `identity` in: resolve the region, fetch or create the profile,
    /// then load standings and history. Store failures leave the session
    /// `Failed` and are returned.
    pub fn initialize(
        &mut self,
        identity: &Identity,
        access_token: &str,
        position: Option<Coordinates>,
        services: &ServiceRegistry,
    ) -> Result<&SessionSnapshot> {
        if let SessionState::Active(snapshot) = &self.state {
            return Err(Error::InvalidInput(format!(
                "already signed in as {}",
                snapshot.profile.email
            )));
        }

        self.state = SessionState::Initializing;
        services.authorize(Some(access_token));

        match load_snapshot(identity, access_token, position, services) {
            Ok(snapshot) => {
                info!(
                    user_id = %snapshot.profile.id,
                    region = %snapshot.region.value(),
                    created = snapshot.created,
                    "session active"
                );
                let user_id = snapshot.profile.id.clone();
                self.credited.clear();
                self.state = SessionState::Active(Box::new(snapshot));
                self.emit(SessionEvent::SignedIn { user_id });
                match &self.state {
                    SessionState::Active(snapshot) => Ok(snapshot.as_ref()),
                    _ => Err(Error::Internal("session left active state".to_string())),
                }
            }
            Err(e) => {
                warn!(error = %e, "session initialization failed");
                services.authorize(None);
                self.state = SessionState::Failed(e.to_string());
                self.emit(SessionEvent::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    pub fn get(&self) -> Option<&SessionSnapshot> {
        match &self.state {
            SessionState::Active(snapshot) => Some(snapshot.as_ref()),
            _ => None,
        }
    }

    /// Swap in a whole new snapshot for the active session
    pub fn replace(&mut self, snapshot: SessionSnapshot) -> Result<()> {
        if !matches!(self.state, SessionState::Active(_)) {
            return Err(Error::NoSession);
        }
        let event = SessionEvent::Replaced {
            user_id: snapshot.profile.id.clone(),
            level: snapshot.profile.level,
            exp: snapshot.profile.exp,
        };
        self.state = SessionState::Active(Box::new(snapshot));
        self.emit(event);
        Ok(())
    }

    /// Re-query both leaderboards around the active profile
    pub fn refresh_rankings(&mut self, profiles: &dyn ProfileStore) -> Result<()> {
        let snapshot = self.get().ok_or(Error::NoSession)?;
        let rankings = fetch_rankings(profiles, &snapshot.profile.region)?;
        let mut next = snapshot.clone();
        next.rankings = rankings;
        self.replace(next)
    }

    pub fn sign_out(&mut self, services: &ServiceRegistry) {
        if let Some(snapshot) = self.get() {
            debug!(user_id = %snapshot.profile.id, "signing out");
        }
        services.authorize(None);
        self.credited.clear();
        self.state = SessionState::Unauthenticated;
        self.emit(SessionEvent::SignedOut);
    }

    pub fn is_credited(&self, digest: &str) -> bool {
        self.credited.contains(digest)
    }

    pub fn mark_credited(&mut self, digest: &str) {
        self.credited.insert(digest.to_string());
    }
}

fn load_snapshot(
    identity: &Identity,
    access_token: &str,
    position: Option<Coordinates>,
    services: &ServiceRegistry,
) -> Result<SessionSnapshot> {
    let existing = match services.profiles.find_by_id(&identity.id)? {
        Some(profile) => Some(profile),
        None => services.profiles.find_by_email(&identity.email)?,
    };

    let region = geo::resolve_region(
        services.geocoder.as_ref(),
        position,
        existing.as_ref().map(|p| p.region.as_str()),
    );

    // The session carries the region resolved now; a stored row keeps its own
    let (profile, created) = match existing {
        Some(mut profile) => {
            if let Resolved::Fresh(current) = &region {
                if *current != profile.region {
                    debug!(stored = %profile.region, current = %current, "region changed");
                    profile.region = current.clone();
                }
            }
            (profile, false)
        }
        None => {
            let seeded = UserProfile::seeded(identity, region.value());
            (services.profiles.create_profile(&seeded)?, true)
        }
    };

    let rankings = fetch_rankings(services.profiles.as_ref(), &profile.region)?;
    let history = services.disposals.list_records(&profile.id)?;

    Ok(SessionSnapshot {
        profile,
        rankings,
        history,
        region,
        access_token: access_token.to_string(),
        created,
    })
}

/// Top entries for `region` and for everyone
pub fn fetch_rankings(profiles: &dyn ProfileStore, region: &str) -> Result<Leaderboards> {
    Ok(Leaderboards {
        regional: profiles.top(&Scope::Regional(region.to_string()), LEADERBOARD_LIMIT)?,
        global: profiles.top(&Scope::Global, LEADERBOARD_LIMIT)?,
    })
}

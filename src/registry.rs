use crate::classifier::{Classifier, HttpClassifier};
use crate::config::{Config, StoreBackend};
use crate::geo::{NominatimGeocoder, ReverseGeocoder};
use crate::identity::{IdentityProvider, StaticIdentity, SupabaseIdentity};
use crate::model::Identity;
use crate::store::rest::TokenSlot;
use crate::store::{DisposalStore, MemoryStore, ProfileStore, RestStore};
use anyhow::{anyhow, Result};
use std::sync::Arc;

/// The external collaborators one shell talks to
#[derive(Clone)]
pub struct ServiceRegistry {
    pub profiles: Arc<dyn ProfileStore>,
    pub disposals: Arc<dyn DisposalStore>,
    pub classifier: Arc<dyn Classifier>,
    pub geocoder: Arc<dyn ReverseGeocoder>,
    pub identity: Arc<dyn IdentityProvider>,
    pub backend: StoreBackend,
    token: TokenSlot,
}

impl ServiceRegistry {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        disposals: Arc<dyn DisposalStore>,
        classifier: Arc<dyn Classifier>,
        geocoder: Arc<dyn ReverseGeocoder>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            profiles,
            disposals,
            classifier,
            geocoder,
            identity,
            backend: StoreBackend::Memory,
            token: TokenSlot::default(),
        }
    }

    /// Build the registry described by `cfg`. The memory backend needs
    /// `offline_identity` since there is no identity provider to ask.
    pub fn from_config(cfg: &Config, offline_identity: Option<Identity>) -> Result<Self> {
        let classifier_url = cfg
            .classifier
            .url
            .as_deref()
            .ok_or_else(|| anyhow!("No classifier URL configured"))?;
        let classifier: Arc<dyn Classifier> =
            Arc::new(HttpClassifier::new(classifier_url, cfg.classifier.timeout()));
        let geocoder: Arc<dyn ReverseGeocoder> = Arc::new(NominatimGeocoder::new(
            cfg.geocoder.url(),
            &cfg.geocoder.user_agent(),
            cfg.geocoder.timeout(),
        ));

        match cfg.store.backend {
            StoreBackend::Memory => {
                let identity = offline_identity
                    .ok_or_else(|| anyhow!("The memory backend needs --email to sign in"))?;
                let store = Arc::new(MemoryStore::new());
                Ok(Self::new(
                    store.clone(),
                    store,
                    classifier,
                    geocoder,
                    Arc::new(StaticIdentity::new(identity)),
                ))
            }
            StoreBackend::Rest => {
                let url = cfg
                    .store
                    .url
                    .as_deref()
                    .ok_or_else(|| anyhow!("No store URL configured"))?;
                let api_key = cfg.store.resolve_api_key()?;
                let token = TokenSlot::default();
                let store = Arc::new(RestStore::new(
                    url,
                    &api_key,
                    cfg.store.timeout(),
                    token.clone(),
                ));
                Ok(Self {
                    profiles: store.clone(),
                    disposals: store,
                    classifier,
                    geocoder,
                    identity: Arc::new(SupabaseIdentity::new(
                        url,
                        &api_key,
                        cfg.identity.timeout(),
                    )),
                    backend: StoreBackend::Rest,
                    token,
                })
            }
        }
    }

    /// Attach (or clear) the signed-in user's token for store requests
    pub fn authorize(&self, access_token: Option<&str>) {
        self.token.set(access_token.map(str::to_string));
    }

    #[cfg(test)]
    pub fn is_authorized(&self) -> bool {
        self.token.get().is_some()
    }
}

//! Resolving an access token into the signed-in user's identity.

use crate::error::{Error, Result, Service};
use crate::model::Identity;
use serde::Deserialize;
use std::time::Duration;

pub trait IdentityProvider: Send + Sync {
    fn identify(&self, access_token: &str) -> Result<Identity>;
}

#[derive(Debug, Default, Deserialize)]
struct UserMetadata {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: UserMetadata,
}

impl AuthUser {
    fn into_identity(self) -> Result<Identity> {
        let email = self
            .email
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| Error::decode(Service::Identity, "user has no email"))?;
        let name = self
            .user_metadata
            .name
            .or(self.user_metadata.full_name)
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
        Ok(Identity {
            id: self.id,
            email,
            name,
            avatar: self.user_metadata.avatar_url.unwrap_or_default(),
        })
    }
}

/// Supabase GoTrue `/auth/v1/user`
pub struct SupabaseIdentity {
    base_url: String,
    api_key: String,
    agent: ureq::Agent,
}

impl SupabaseIdentity {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl IdentityProvider for SupabaseIdentity {
    fn identify(&self, access_token: &str) -> Result<Identity> {
        if access_token.trim().is_empty() {
            return Err(Error::InvalidInput("access token is empty".to_string()));
        }
        let url = format!("{}/auth/v1/user", self.base_url);
        let resp = self
            .agent
            .get(&url)
            .set("apikey", &self.api_key)
            .set("Authorization", &format!("Bearer {}", access_token))
            .call()
            .map_err(|e| Error::from_http(Service::Identity, e))?;
        let user: AuthUser = resp
            .into_json()
            .map_err(|e| Error::decode(Service::Identity, e))?;
        user.into_identity()
    }
}

/// Fixed identity for the offline backend; accepts any token
pub struct StaticIdentity {
    identity: Identity,
}

impl StaticIdentity {
    pub fn new(identity: Identity) -> Self {
        Self { identity }
    }
}

impl IdentityProvider for StaticIdentity {
    fn identify(&self, _access_token: &str) -> Result<Identity> {
        Ok(self.identity.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<Identity> {
        serde_json::from_str::<AuthUser>(json).unwrap().into_identity()
    }

    #[test]
    fn test_identity_from_oauth_user() {
        let identity = parse(
            r#"{"id":"8d1c","email":"ada@example.com","aud":"authenticated",
                "user_metadata":{"name":"Ada L","avatar_url":"https://a/x.png"}}"#,
        )
        .unwrap();
        assert_eq!(identity.id, "8d1c");
        assert_eq!(identity.name, "Ada L");
        assert_eq!(identity.avatar, "https://a/x.png");
    }

    #[test]
    fn test_identity_name_fallbacks() {
        let identity =
            parse(r#"{"id":"1","email":"bo@example.com","user_metadata":{"full_name":"Bo"}}"#)
                .unwrap();
        assert_eq!(identity.name, "Bo");

        let identity = parse(r#"{"id":"2","email":"cy@example.com"}"#).unwrap();
        assert_eq!(identity.name, "cy");
        assert_eq!(identity.avatar, "");
    }

    #[test]
    fn test_identity_requires_email() {
        assert!(parse(r#"{"id":"3"}"#).is_err());
        assert!(parse(r#"{"id":"3","email":" "}"#).is_err());
    }
}

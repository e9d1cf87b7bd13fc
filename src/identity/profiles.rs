use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use super::Identity;
use crate::database::models::{Profile, Role};
use crate::store::{ProfileStore, Store, StoreResult};

/// Role-tagged profiles, the sole source of truth for role.
/// Roles change only through the admin request transitions in the store.
#[derive(Clone)]
pub struct IdentityStore {
    store: Arc<dyn Store>,
    bootstrap_admin: Option<String>,
}

impl IdentityStore {
    pub fn new(store: Arc<dyn Store>, bootstrap_admin: Option<String>) -> Self {
        Self {
            store,
            bootstrap_admin: bootstrap_admin.map(|email| email.trim().to_ascii_lowercase()),
        }
    }

    fn is_bootstrap(&self, email: &str) -> bool {
        self.bootstrap_admin
            .as_deref()
            .map_or(false, |admin| admin.eq_ignore_ascii_case(email.trim()))
    }

    /// Student when no profile exists. The bootstrap account always reads as admin.
    pub async fn get_role(&self, user_id: Uuid) -> StoreResult<Role> {
        let Some(profile) = self.store.find_profile(user_id).await? else {
            return Ok(Role::Student);
        };

        if profile.role != Role::Admin && self.is_bootstrap(&profile.email) {
            warn!(
                target: "audit",
                %user_id,
                stored_role = %profile.role,
                "bootstrap admin override applied"
            );
            return Ok(Role::Admin);
        }
        Ok(profile.role)
    }

    /// Signup on first sighting
    pub async fn ensure_profile(&self, identity: &Identity) -> StoreResult<Profile> {
        self.store.ensure_profile(identity.user_id, &identity.email).await
    }

    pub async fn profile(&self, user_id: Uuid) -> StoreResult<Option<Profile>> {
        self.store.find_profile(user_id).await
    }

    pub async fn find_by_email(&self, email: &str) -> StoreResult<Option<Profile>> {
        self.store.find_profile_by_email(email).await
    }
}

//! Local main identity and the person → device identities map.

use std::collections::BTreeSet;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use pairsync_shared::{Identity, IdentityId};

use crate::error::{Result, SyncError};
use crate::SharedDatabase;

/// The identity this node runs as and the person it belongs to. Both are the
/// same id unless the node is a secondary device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LocalIdentity {
    identity: IdentityId,
    person: IdentityId,
}

pub struct IdentityRegistry {
    db: SharedDatabase,
    main: RwLock<Option<LocalIdentity>>,
}

impl IdentityRegistry {
    pub fn new(db: SharedDatabase) -> Self {
        Self {
            db,
            main: RwLock::new(None),
        }
    }

    /// Install `identity` as the local main identity. An identity stored
    /// earlier as somebody's device keeps that person.
    pub async fn bootstrap(&self, identity: &Identity) -> Result<IdentityId> {
        let id = identity.id();
        let record = self.db.lock().await.upsert_identity(&id, &id)?;
        *self.main.write().await = Some(LocalIdentity {
            identity: id,
            person: record.person,
        });

        info!(
            identity = %id.short(),
            person = %record.person.short(),
            "Identity registry bootstrapped"
        );
        Ok(id)
    }

    /// Install `identity` as a device of `person`. The node then reads the
    /// topics of that person.
    pub async fn bootstrap_as_device(&self, identity: &Identity, person: &IdentityId) -> Result<IdentityId> {
        let id = identity.id();
        self.register_device(person, &id).await?;
        *self.main.write().await = Some(LocalIdentity {
            identity: id,
            person: *person,
        });

        info!(identity = %id.short(), person = %person.short(), "Bootstrapped as device");
        Ok(id)
    }

    /// Load the stored local identity, generating and saving one on first
    /// run, then bootstrap with it.
    pub async fn load_or_create(&self) -> Result<Identity> {
        let stored = self.db.lock().await.load_local_identity()?;
        let identity = match stored {
            Some(secret_hex) => Identity::from_secret_hex(&secret_hex)?,
            None => {
                let identity = Identity::generate();
                let secret_hex = hex::encode(identity.secret_bytes());
                self.db.lock().await.save_local_identity(&secret_hex)?;
                info!(identity = %identity.id().short(), "Generated new local identity");
                identity
            }
        };

        self.bootstrap(&identity).await?;
        Ok(identity)
    }

    /// The local user's main identity. Fails with `NotReady` until
    /// [`bootstrap`](Self::bootstrap) has run.
    pub async fn resolve_main_identity(&self) -> Result<IdentityId> {
        Ok(self.local().await?.identity)
    }

    /// The person the local identity belongs to. Topics name persons, so
    /// topic membership is checked against this id.
    pub async fn resolve_person(&self) -> Result<IdentityId> {
        Ok(self.local().await?.person)
    }

    async fn local(&self) -> Result<LocalIdentity> {
        let main = *self.main.read().await;
        main.ok_or(SyncError::NotReady("local identity not bootstrapped"))
    }

    pub async fn is_ready(&self) -> bool {
        self.main.read().await.is_some()
    }

    /// Record a device identity for `person`. Idempotent; rejects a device
    /// that already belongs to somebody else.
    pub async fn register_device(&self, person: &IdentityId, device: &IdentityId) -> Result<()> {
        let db = self.db.lock().await;
        let owner = db.upsert_identity(person, person)?;
        if owner.person != *person {
            warn!(
                identity = %person.short(),
                person = %owner.person.short(),
                "Refusing to use a device identity as a person"
            );
            return Err(SyncError::IdentityConflict {
                identity: *person,
                person: owner.person,
            });
        }

        let record = db.upsert_identity(device, person)?;
        if record.person != *person {
            warn!(
                device = %device.short(),
                existing = %record.person.short(),
                requested = %person.short(),
                "Device already bound to another person"
            );
            return Err(SyncError::IdentityConflict {
                identity: *device,
                person: record.person,
            });
        }

        debug!(person = %person.short(), device = %device.short(), "Device registered");
        Ok(())
    }

    /// The person an identity belongs to. Unknown identities are their own
    /// person.
    pub async fn person_of(&self, identity: &IdentityId) -> Result<IdentityId> {
        let person = self.db.lock().await.person_of(identity)?;
        Ok(person.unwrap_or(*identity))
    }

    /// Every identity of `person`, always including the person's main id.
    pub async fn identities_of(&self, person: &IdentityId) -> Result<BTreeSet<IdentityId>> {
        let records = self.db.lock().await.identities_of(person)?;
        let mut ids: BTreeSet<IdentityId> = records.into_iter().map(|r| r.identity).collect();
        ids.insert(*person);
        Ok(ids)
    }
}

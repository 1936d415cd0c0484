//! Persisted read grants on locally owned channels.
//!
//! A grant that cannot be written is never dropped: it is logged, published
//! as [`GrantEvent::Failed`] and kept in a pending queue until
//! [`AccessGrantManager::retry_pending`] manages to write it.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info};
use uuid::Uuid;

use pairsync_shared::{IdentityId, TopicId};
use pairsync_store::{AccessGrant, Channel};

use crate::directory::ChannelDirectory;
use crate::error::{Result, SyncError};
use crate::events::GrantEvent;
use crate::identities::IdentityRegistry;
use crate::SharedDatabase;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantOutcome {
    Created,
    AlreadyGranted,
    /// The grantee owns the channel; nothing to store.
    Owner,
}

/// A grant waiting to be written again.
#[derive(Debug, Clone, Serialize)]
pub struct PendingGrant {
    pub channel: Channel,
    pub grantee: IdentityId,
    pub attempts: u32,
    pub last_error: String,
    pub first_failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub granted: usize,
    pub failed: usize,
}

/// Result of granting one channel to every recipient.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantSweep {
    pub created: Vec<IdentityId>,
    pub existing: Vec<IdentityId>,
    pub failed: Vec<IdentityId>,
}

impl GrantSweep {
    fn merge(&mut self, other: GrantSweep) {
        self.created.extend(other.created);
        self.existing.extend(other.existing);
        self.failed.extend(other.failed);
    }
}

/// A participant that should be able to read a local channel but holds no
/// grant for it.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MissingGrant {
    pub topic: TopicId,
    pub channel: Uuid,
    pub grantee: IdentityId,
    /// Whether a retry is already queued.
    pub pending: bool,
}

pub struct AccessGrantManager {
    db: SharedDatabase,
    identities: Arc<IdentityRegistry>,
    directory: Arc<ChannelDirectory>,
    events: broadcast::Sender<GrantEvent>,
    pending: Mutex<HashMap<(Uuid, IdentityId), PendingGrant>>,
}

impl AccessGrantManager {
    pub fn new(
        db: SharedDatabase,
        identities: Arc<IdentityRegistry>,
        directory: Arc<ChannelDirectory>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            db,
            identities,
            directory,
            events,
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn pending_lock(&self) -> MutexGuard<'_, HashMap<(Uuid, IdentityId), PendingGrant>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receive every grant created or failed from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<GrantEvent> {
        self.events.subscribe()
    }

    // ------------------------------------------------------------------
    // Grants
    // ------------------------------------------------------------------

    /// Let `grantee` read `channel`. Idempotent.
    pub async fn grant_access(&self, channel: &Channel, grantee: &IdentityId) -> Result<GrantOutcome> {
        if *grantee == channel.owner {
            return Ok(GrantOutcome::Owner);
        }

        let written = self.db.lock().await.insert_grant(channel.id, grantee);
        match written {
            Ok(created) => {
                self.pending_lock().remove(&(channel.id, *grantee));
                if !created {
                    return Ok(GrantOutcome::AlreadyGranted);
                }

                info!(
                    topic = %channel.topic.short(),
                    grantee = %grantee.short(),
                    "Access grant created"
                );
                let _ = self.events.send(GrantEvent::Created {
                    channel: channel.clone(),
                    grantee: *grantee,
                });
                Ok(GrantOutcome::Created)
            }
            Err(e) => {
                let reason = e.to_string();
                error!(
                    topic = %channel.topic.short(),
                    grantee = %grantee.short(),
                    error = %reason,
                    "Failed to persist access grant, queued for retry"
                );
                self.queue(channel, grantee, &reason);
                let _ = self.events.send(GrantEvent::Failed {
                    channel: channel.clone(),
                    grantee: *grantee,
                    reason: reason.clone(),
                });
                Err(SyncError::GrantPersistence {
                    channel: channel.id,
                    topic: channel.topic.clone(),
                    grantee: *grantee,
                    reason,
                })
            }
        }
    }

    fn queue(&self, channel: &Channel, grantee: &IdentityId, reason: &str) {
        self.pending_lock()
            .entry((channel.id, *grantee))
            .and_modify(|p| {
                p.attempts += 1;
                p.last_error = reason.to_string();
            })
            .or_insert_with(|| PendingGrant {
                channel: channel.clone(),
                grantee: *grantee,
                attempts: 1,
                last_error: reason.to_string(),
                first_failed_at: Utc::now(),
            });
    }

    /// Try every queued grant again.
    pub async fn retry_pending(&self) -> RetryReport {
        let queued: Vec<PendingGrant> = self.pending_lock().values().cloned().collect();
        let mut report = RetryReport::default();
        if queued.is_empty() {
            return report;
        }

        for grant in queued {
            match self.grant_access(&grant.channel, &grant.grantee).await {
                Ok(_) => report.granted += 1,
                Err(_) => report.failed += 1,
            }
        }

        info!(
            granted = report.granted,
            failed = report.failed,
            "Retried pending access grants"
        );
        report
    }

    pub fn pending(&self) -> Vec<PendingGrant> {
        self.pending_lock().values().cloned().collect()
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// The owner can always read its channel; anybody else needs a grant.
    pub async fn is_accessible(&self, channel: &Channel, identity: &IdentityId) -> Result<bool> {
        if *identity == channel.owner {
            return Ok(true);
        }
        Ok(self.db.lock().await.has_grant(channel.id, identity)?)
    }

    /// Every channel `grantee` holds a grant for.
    pub async fn accessible_channels_for(&self, grantee: &IdentityId) -> Result<Vec<Channel>> {
        Ok(self.db.lock().await.channels_accessible_to(grantee)?)
    }

    pub async fn grants_for_channel(&self, channel_id: Uuid) -> Result<Vec<AccessGrant>> {
        Ok(self.db.lock().await.list_grants_for_channel(channel_id)?)
    }

    /// Identities that should be able to read `channel`: every identity of
    /// every participant of its topic, except the owner itself.
    pub async fn recipients_for(&self, channel: &Channel) -> Result<BTreeSet<IdentityId>> {
        let participants = self.directory.participants(&channel.topic).await?;
        let mut recipients = BTreeSet::new();
        for person in &participants {
            recipients.extend(self.identities.identities_of(person).await?);
        }
        recipients.remove(&channel.owner);
        Ok(recipients)
    }

    /// Grant `channel` to every recipient. Failures are queued and reported
    /// in the sweep rather than aborting it.
    pub async fn grant_to_participants(&self, channel: &Channel) -> Result<GrantSweep> {
        let mut sweep = GrantSweep::default();
        for grantee in self.recipients_for(channel).await? {
            match self.grant_access(channel, &grantee).await {
                Ok(GrantOutcome::Created) => sweep.created.push(grantee),
                Ok(GrantOutcome::AlreadyGranted) | Ok(GrantOutcome::Owner) => {
                    sweep.existing.push(grantee)
                }
                Err(_) => sweep.failed.push(grantee),
            }
        }
        Ok(sweep)
    }

    /// Re-grant every channel `owner` owns to its recipients.
    pub async fn repair(&self, owner: &IdentityId) -> Result<GrantSweep> {
        let mut total = GrantSweep::default();
        for channel in self.directory.channels_owned_by(owner).await? {
            total.merge(self.grant_to_participants(&channel).await?);
        }
        debug!(
            owner = %owner.short(),
            created = total.created.len(),
            failed = total.failed.len(),
            "Grant repair finished"
        );
        Ok(total)
    }

    /// Every (channel, recipient) pair on channels owned by `owner` that
    /// lacks a grant.
    pub async fn audit(&self, owner: &IdentityId) -> Result<Vec<MissingGrant>> {
        let mut missing = Vec::new();
        for channel in self.directory.channels_owned_by(owner).await? {
            for grantee in self.recipients_for(&channel).await? {
                if self.db.lock().await.has_grant(channel.id, &grantee)? {
                    continue;
                }
                let pending = self.pending_lock().contains_key(&(channel.id, grantee));
                missing.push(MissingGrant {
                    topic: channel.topic.clone(),
                    channel: channel.id,
                    grantee,
                    pending,
                });
            }
        }
        Ok(missing)
    }
}

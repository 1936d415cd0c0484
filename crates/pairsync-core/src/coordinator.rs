//! Sync coordination: grant on write, re-affirm on connect, announce heads.
//!
//! The pull protocol handlers live in `pull.rs`.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pairsync_net::{Connection, ConnectionRegistry, Envelope, ObserverList, Subscription, Transport};
use pairsync_shared::{ChannelHead, Identity, IdentityId, SyncMessage, TopicId};
use pairsync_store::{Channel, Message};

use crate::access::{AccessGrantManager, GrantOutcome, GrantSweep, RetryReport};
use crate::config::SyncConfig;
use crate::directory::ChannelDirectory;
use crate::error::{Result, SyncError};
use crate::events::TopicUpdate;
use crate::identities::IdentityRegistry;
use crate::SharedDatabase;

const MIN_EXPIRY_TICK: Duration = Duration::from_millis(100);

/// What a local post did.
#[derive(Debug, Clone)]
pub struct PostReceipt {
    pub channel: Channel,
    pub message: Message,
    pub sweep: GrantSweep,
    /// Live connections the new head was announced on.
    pub announced: usize,
}

/// What a connection-open did for the remote peer.
#[derive(Debug, Clone, Default)]
pub struct ReaffirmReport {
    pub retried: RetryReport,
    pub reaffirmed: GrantSweep,
    /// Channel heads announced to the peer.
    pub announced: usize,
}

enum ConnectionEvent {
    Opened(Connection),
    Closed(Connection),
}

type Watchers = HashMap<TopicId, Arc<ObserverList<TopicUpdate>>>;

pub struct SyncCoordinator {
    pub(crate) identities: Arc<IdentityRegistry>,
    pub(crate) directory: Arc<ChannelDirectory>,
    pub(crate) grants: Arc<AccessGrantManager>,
    connections: ConnectionRegistry,
    transport: Arc<dyn Transport>,
    pub(crate) config: SyncConfig,
    topic_watchers: Mutex<Watchers>,
}

impl SyncCoordinator {
    pub fn new(
        identities: Arc<IdentityRegistry>,
        directory: Arc<ChannelDirectory>,
        grants: Arc<AccessGrantManager>,
        connections: ConnectionRegistry,
        transport: Arc<dyn Transport>,
        config: SyncConfig,
    ) -> Self {
        Self {
            identities,
            directory,
            grants,
            connections,
            transport,
            config,
            topic_watchers: Mutex::new(HashMap::new()),
        }
    }

    /// Build every component on top of `db` and bootstrap `identity` as the
    /// local main identity.
    pub async fn open(
        db: SharedDatabase,
        identity: &Identity,
        connections: ConnectionRegistry,
        transport: Arc<dyn Transport>,
        config: SyncConfig,
    ) -> Result<Self> {
        let identities = Arc::new(IdentityRegistry::new(db.clone()));
        identities.bootstrap(identity).await?;
        Ok(Self::assemble(db, identities, connections, transport, config))
    }

    /// Like [`open`](Self::open), for a node running as a device of
    /// `person`. The device mirrors the channels granted to it and owns none.
    pub async fn open_device(
        db: SharedDatabase,
        identity: &Identity,
        person: &IdentityId,
        connections: ConnectionRegistry,
        transport: Arc<dyn Transport>,
        config: SyncConfig,
    ) -> Result<Self> {
        let identities = Arc::new(IdentityRegistry::new(db.clone()));
        identities.bootstrap_as_device(identity, person).await?;
        Ok(Self::assemble(db, identities, connections, transport, config))
    }

    fn assemble(
        db: SharedDatabase,
        identities: Arc<IdentityRegistry>,
        connections: ConnectionRegistry,
        transport: Arc<dyn Transport>,
        config: SyncConfig,
    ) -> Self {
        let directory = Arc::new(ChannelDirectory::new(db.clone()));
        let grants = Arc::new(AccessGrantManager::new(
            db,
            identities.clone(),
            directory.clone(),
        ));
        Self::new(identities, directory, grants, connections, transport, config)
    }

    pub fn identities(&self) -> &Arc<IdentityRegistry> {
        &self.identities
    }

    pub fn directory(&self) -> &Arc<ChannelDirectory> {
        &self.directory
    }

    pub fn grants(&self) -> &Arc<AccessGrantManager> {
        &self.grants
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Application surface
    // ------------------------------------------------------------------

    /// Register the topic between the local user and `peers`.
    pub async fn open_topic(&self, peers: &[IdentityId]) -> Result<TopicId> {
        let me = self.identities.resolve_person().await?;
        let mut participants = BTreeSet::new();
        participants.insert(me);
        for peer in peers {
            participants.insert(self.identities.person_of(peer).await?);
        }
        self.directory.register_topic(&participants).await
    }

    /// Post `content` to the local channel of `topic`.
    pub async fn post_message(&self, topic: &TopicId, content: &str) -> Result<PostReceipt> {
        let me = self.identities.resolve_main_identity().await?;
        let channel = self.directory.ensure_channel(topic, &me).await?;
        self.on_local_message_posted(&channel, content).await
    }

    /// Every message of `topic` across all channel instances, ordered by
    /// timestamp, then owner, then sequence.
    pub async fn list_messages(&self, topic: &TopicId) -> Result<Vec<Message>> {
        let mut merged = Vec::new();
        for channel in self.directory.list_channel_instances(topic).await? {
            for message in self.directory.messages_for(channel.id).await? {
                merged.push((channel.owner, message));
            }
        }
        merged.sort_by(|(a_owner, a), (b_owner, b)| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a_owner.cmp(b_owner))
                .then_with(|| a.seq.cmp(&b.seq))
        });
        Ok(merged.into_iter().map(|(_, message)| message).collect())
    }

    /// Observe new messages in `topic`, local or remote.
    pub fn on_topic_updated<F>(&self, topic: &TopicId, callback: F) -> Subscription
    where
        F: Fn(&TopicUpdate) + Send + Sync + 'static,
    {
        self.watchers()
            .entry(topic.clone())
            .or_insert_with(|| Arc::new(ObserverList::new()))
            .subscribe(callback)
    }

    fn watchers(&self) -> MutexGuard<'_, Watchers> {
        self.topic_watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn notify_topic(&self, update: TopicUpdate) {
        let observers = self.watchers().get(&update.topic).cloned();
        if let Some(observers) = observers {
            observers.notify(&update);
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle hooks
    // ------------------------------------------------------------------

    /// A pairing with `remote` finished: make sure the two-party topic and
    /// the local channel exist and that the remote can read it.
    pub async fn on_pairing_completed(&self, remote: &IdentityId) -> Result<Channel> {
        let topic = self.open_topic(&[*remote]).await?;
        let me = self.identities.resolve_main_identity().await?;
        let channel = self.directory.ensure_channel(&topic, &me).await?;
        self.grants.grant_to_participants(&channel).await?;

        info!(peer = %remote.short(), topic = %topic.short(), "Pairing completed");
        Ok(channel)
    }

    /// Append to a locally owned channel, grant it to every other
    /// participant and announce the new head on live connections.
    pub async fn on_local_message_posted(&self, channel: &Channel, content: &str) -> Result<PostReceipt> {
        let me = self.identities.resolve_main_identity().await?;
        if channel.owner != me {
            return Err(SyncError::NotChannelOwner {
                owner: channel.owner,
                topic: channel.topic.clone(),
            });
        }

        let message = self.directory.append_message(channel, &me, content).await?;
        self.notify_topic(TopicUpdate {
            topic: channel.topic.clone(),
            owner: me,
            new_messages: 1,
            head_seq: message.seq,
        });

        let sweep = self.grants.grant_to_participants(channel).await?;
        if !sweep.failed.is_empty() {
            warn!(
                topic = %channel.topic.short(),
                failed = sweep.failed.len(),
                "Some grants are pending retry"
            );
        }

        let announce = SyncMessage::Announce {
            heads: vec![ChannelHead {
                topic: channel.topic.clone(),
                owner: me,
                head_seq: message.seq,
            }],
        };
        let mut announced = 0;
        for recipient in sweep.created.iter().chain(sweep.existing.iter()) {
            match self.send_to(recipient, &announce).await {
                Ok(true) => announced += 1,
                Ok(false) => {}
                Err(e) => warn!(peer = %recipient.short(), error = %e, "Failed to announce new message"),
            }
        }

        debug!(
            topic = %channel.topic.short(),
            seq = message.seq,
            granted = sweep.created.len(),
            announced,
            "Local message posted"
        );

        Ok(PostReceipt {
            channel: channel.clone(),
            message,
            sweep,
            announced,
        })
    }

    /// Retry queued grants, re-affirm grants on every local channel whose
    /// topic contains the remote person, then announce what the remote may
    /// read.
    pub async fn on_connection_opened(&self, connection: &Connection) -> Result<ReaffirmReport> {
        let remote = connection.remote;
        let mut report = ReaffirmReport {
            retried: self.grants.retry_pending().await,
            ..ReaffirmReport::default()
        };

        let me = self.identities.resolve_main_identity().await?;
        let person = self.identities.person_of(&remote).await?;

        for channel in self.directory.channels_owned_by(&me).await? {
            if !channel.topic.contains(&person) {
                continue;
            }
            match self.grants.grant_access(&channel, &remote).await {
                Ok(GrantOutcome::Created) => report.reaffirmed.created.push(remote),
                Ok(_) => report.reaffirmed.existing.push(remote),
                Err(_) => report.reaffirmed.failed.push(remote),
            }
        }

        let mut heads = Vec::new();
        for channel in self.grants.accessible_channels_for(&remote).await? {
            heads.push(ChannelHead {
                head_seq: self.directory.channel_head(channel.id).await?,
                topic: channel.topic,
                owner: channel.owner,
            });
        }
        report.announced = heads.len();
        if !heads.is_empty() {
            self.send_to(&remote, &SyncMessage::Announce { heads }).await?;
        }

        info!(
            peer = %remote.short(),
            retried = report.retried.granted,
            created = report.reaffirmed.created.len(),
            announced = report.announced,
            "Grants re-affirmed for connection"
        );
        Ok(report)
    }

    /// Grants outlive connections; nothing is revoked here.
    pub fn on_connection_closed(&self, connection: &Connection) {
        info!(
            peer = %connection.remote.short(),
            reason = ?connection.close_reason,
            "Connection closed, grants retained"
        );
    }

    /// Expire connection attempts older than the connect timeout.
    pub fn expire_stale_connections(&self) -> Vec<SyncError> {
        self.connections
            .expire_stale(self.config.connect_timeout)
            .into_iter()
            .map(|e| {
                let e = SyncError::from(e);
                warn!(error = %e, "Peer unreachable");
                e
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------

    /// Send `message` on the live connection to `remote`. Returns `false`
    /// when there is none.
    pub async fn send_to(&self, remote: &IdentityId, message: &SyncMessage) -> Result<bool> {
        let Some(connection) = self.connections.active_connection_to(remote) else {
            debug!(peer = %remote.short(), kind = message.kind(), "No live connection, not sending");
            return Ok(false);
        };

        let payload = message.to_bytes()?;
        self.transport.send(&connection, payload).await?;
        debug!(peer = %remote.short(), kind = message.kind(), "Sync message sent");
        Ok(true)
    }

    /// Drive the coordinator from connection events, inbound envelopes and a
    /// connect-timeout ticker until `inbox` closes.
    pub fn run(self: Arc<Self>, mut inbox: mpsc::Receiver<Envelope>) -> JoinHandle<()> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<ConnectionEvent>();

        let tx = events_tx.clone();
        let opened = self.connections.on_connection_opened(move |c| {
            let _ = tx.send(ConnectionEvent::Opened(c.clone()));
        });
        let closed = self.connections.on_connection_closed(move |c| {
            let _ = events_tx.send(ConnectionEvent::Closed(c.clone()));
        });

        tokio::spawn(async move {
            let _subscriptions = (opened, closed);
            let mut expiry = tokio::time::interval((self.config.connect_timeout / 2).max(MIN_EXPIRY_TICK));

            loop {
                tokio::select! {
                    // --- Inbound sync messages ---
                    envelope = inbox.recv() => {
                        match envelope {
                            Some(envelope) => {
                                if let Err(e) = self.handle_incoming(envelope.from, &envelope.payload).await {
                                    warn!(peer = %envelope.from.short(), error = %e, "Failed to handle sync message");
                                }
                            }
                            None => {
                                info!("Inbox closed, stopping sync loop");
                                break;
                            }
                        }
                    }

                    // --- Connection lifecycle ---
                    event = events_rx.recv() => {
                        match event {
                            Some(ConnectionEvent::Opened(connection)) => {
                                if let Err(e) = self.on_connection_opened(&connection).await {
                                    warn!(peer = %connection.remote.short(), error = %e, "Re-affirming grants failed");
                                }
                            }
                            Some(ConnectionEvent::Closed(connection)) => {
                                self.on_connection_closed(&connection);
                            }
                            None => break,
                        }
                    }

                    _ = expiry.tick() => {
                        self.expire_stale_connections();
                    }
                }
            }
        })
    }
}

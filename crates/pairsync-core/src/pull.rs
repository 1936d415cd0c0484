//! Pull protocol: owners announce heads, readers pull pages of objects.
//!
//! Only a channel's owner serves it. Announcements and object pages about a
//! channel are accepted from its owner alone, and a pull is answered only
//! for channels the requester holds a grant for.

use tracing::{debug, warn};

use pairsync_shared::constants::MAX_PAGE_BYTES;
use pairsync_shared::{ChannelHead, IdentityId, MessageObject, ObjectsPage, PullCursor, SyncMessage};
use pairsync_store::Message;

use crate::coordinator::SyncCoordinator;
use crate::error::{Result, SyncError};
use crate::events::TopicUpdate;

impl SyncCoordinator {
    /// Decode and handle one payload received from `from`.
    pub async fn handle_incoming(&self, from: IdentityId, payload: &[u8]) -> Result<()> {
        let message = SyncMessage::from_bytes(payload)?;
        debug!(peer = %from.short(), kind = message.kind(), "Sync message received");

        match message {
            SyncMessage::Announce { heads } => self.handle_announce(from, heads).await,
            SyncMessage::PullRequest { wants } => self.handle_pull_request(from, wants).await,
            SyncMessage::Objects(page) => self.handle_objects(from, page).await,
            SyncMessage::Refused { topic, owner, reason } => {
                warn!(
                    peer = %from.short(),
                    topic = %topic.short(),
                    owner = %owner.short(),
                    reason = %reason,
                    "Pull refused"
                );
                Ok(())
            }
        }
    }

    async fn handle_announce(&self, from: IdentityId, heads: Vec<ChannelHead>) -> Result<()> {
        let person = self.identities.resolve_person().await?;

        let mut wants = Vec::new();
        for head in heads {
            if head.owner != from {
                warn!(
                    peer = %from.short(),
                    owner = %head.owner.short(),
                    "Ignoring announce for a channel the peer does not own"
                );
                continue;
            }
            if !head.topic.contains(&person) {
                warn!(peer = %from.short(), topic = %head.topic.short(), "Ignoring announce for a foreign topic");
                continue;
            }

            let local_head = match self.directory.find_channel(&head.topic, &head.owner).await? {
                Some(channel) => self.directory.channel_head(channel.id).await?,
                None => 0,
            };
            if head.head_seq > local_head {
                wants.push(PullCursor {
                    topic: head.topic,
                    owner: head.owner,
                    after_seq: local_head,
                });
            }
        }

        if wants.is_empty() {
            return Ok(());
        }
        debug!(peer = %from.short(), channels = wants.len(), "Behind on announced channels, pulling");
        self.send_to(&from, &SyncMessage::PullRequest { wants }).await?;
        Ok(())
    }

    async fn handle_pull_request(&self, from: IdentityId, wants: Vec<PullCursor>) -> Result<()> {
        let me = self.identities.resolve_main_identity().await?;

        for cursor in wants {
            let (topic, owner) = (cursor.topic.clone(), cursor.owner);
            if let Err(e) = self.serve_cursor(from, me, cursor).await {
                warn!(
                    peer = %from.short(),
                    topic = %topic.short(),
                    owner = %owner.short(),
                    error = %e,
                    "Failed to serve pull"
                );
            }
        }
        Ok(())
    }

    async fn serve_cursor(&self, from: IdentityId, me: IdentityId, cursor: PullCursor) -> Result<()> {
        let refuse = |reason: String| SyncMessage::Refused {
            topic: cursor.topic.clone(),
            owner: cursor.owner,
            reason,
        };

        if cursor.owner != me {
            self.send_to(&from, &refuse("not the channel owner".to_string())).await?;
            return Ok(());
        }
        let Some(channel) = self.directory.find_channel(&cursor.topic, &me).await? else {
            self.send_to(&from, &refuse("unknown channel".to_string())).await?;
            return Ok(());
        };
        if !self.grants.is_accessible(&channel, &from).await? {
            let denied = SyncError::AccessDenied {
                requester: from,
                owner: me,
                topic: channel.topic.clone(),
            };
            warn!(peer = %from.short(), error = %denied, "Refusing pull without an access grant");
            self.send_to(&from, &refuse(denied.to_string())).await?;
            return Ok(());
        }

        // One extra row tells whether another page follows.
        let page_size = self.config.page_size() as usize;
        let fetched = self
            .directory
            .messages_after(channel.id, cursor.after_seq, page_size as u32 + 1)
            .await?;
        let (messages, more) = fill_page(fetched, page_size)?;

        debug!(
            peer = %from.short(),
            topic = %channel.topic.short(),
            after = cursor.after_seq,
            count = messages.len(),
            more,
            "Serving pull"
        );

        let page = ObjectsPage {
            topic: channel.topic,
            owner: me,
            messages,
            more,
        };
        self.send_to(&from, &SyncMessage::Objects(page)).await?;
        Ok(())
    }

    async fn handle_objects(&self, from: IdentityId, page: ObjectsPage) -> Result<()> {
        let person = self.identities.resolve_person().await?;
        if page.owner != from {
            warn!(
                peer = %from.short(),
                owner = %page.owner.short(),
                "Ignoring objects for a channel the peer does not own"
            );
            return Ok(());
        }
        if !page.topic.contains(&person) {
            warn!(peer = %from.short(), topic = %page.topic.short(), "Ignoring objects for a foreign topic");
            return Ok(());
        }

        let channel = self.directory.ensure_channel(&page.topic, &page.owner).await?;
        let stored = self
            .directory
            .store_remote_messages(&channel, &page.messages)
            .await?;
        let head_seq = self.directory.channel_head(channel.id).await?;

        debug!(
            peer = %from.short(),
            topic = %channel.topic.short(),
            received = page.messages.len(),
            stored,
            head_seq,
            "Objects stored"
        );

        if stored > 0 {
            self.notify_topic(TopicUpdate {
                topic: channel.topic.clone(),
                owner: channel.owner,
                new_messages: stored,
                head_seq,
            });
        }

        // Stop following pages that brought nothing new.
        if page.more && stored > 0 {
            let next = PullCursor {
                topic: channel.topic,
                owner: channel.owner,
                after_seq: head_seq,
            };
            self.send_to(&from, &SyncMessage::PullRequest { wants: vec![next] })
                .await?;
        }
        Ok(())
    }
}

/// Take up to `page_size` messages in order, stopping early once the page
/// would outgrow [`MAX_PAGE_BYTES`]. The flag tells whether messages remain.
fn fill_page(messages: Vec<Message>, page_size: usize) -> Result<(Vec<MessageObject>, bool)> {
    let mut more = messages.len() > page_size;
    let mut objects = Vec::new();
    let mut bytes = 0;

    for message in messages.into_iter().take(page_size) {
        let object = message.to_object();
        let len = object.encoded_len()?;
        if !objects.is_empty() && bytes + len > MAX_PAGE_BYTES {
            more = true;
            break;
        }
        bytes += len;
        objects.push(object);
    }
    Ok((objects, more))
}

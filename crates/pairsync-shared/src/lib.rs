//! Types shared by every pairsync crate: identities and their ids, topic id
//! derivation, the sync wire protocol and protocol constants.

pub mod constants;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod types;

pub use error::{IdentityError, ProtocolError, TopicError};
pub use identity::Identity;
pub use protocol::{ChannelHead, MessageObject, ObjectsPage, PullCursor, SyncMessage};
pub use types::{IdentityId, ObjectHash, TopicId};

/// Version of the sync wire protocol
pub const PROTOCOL_VERSION: &str = "/pairsync/1.0.0";

/// Application name
pub const APP_NAME: &str = "pairsync";

/// Ed25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Ed25519 secret key size in bytes
pub const SECRET_KEY_SIZE: usize = 32;

/// Identity id size in bytes (BLAKE3 output)
pub const IDENTITY_ID_SIZE: usize = 32;

/// Joins sorted participant ids into a topic id. Never valid inside a hex id.
pub const TOPIC_ID_SEPARATOR: &str = "<->";

/// A topic needs at least this many distinct participants
pub const MIN_TOPIC_PARTICIPANTS: usize = 2;

/// Maximum message content size in bytes (64 KiB)
pub const MAX_CONTENT_SIZE: usize = 65_536;

/// Maximum encoded sync payload size in bytes (4 MiB)
pub const MAX_PAYLOAD_SIZE: usize = 4 * 1024 * 1024;

/// Encoded size the messages of one pull page may take, leaving room for
/// the page header inside `MAX_PAYLOAD_SIZE`
pub const MAX_PAGE_BYTES: usize = MAX_PAYLOAD_SIZE - 64 * 1024;

/// Messages returned per channel in one pull page
pub const DEFAULT_PULL_PAGE_SIZE: u32 = 50;

/// Upper bound a peer may request per pull page
pub const MAX_PULL_PAGE_SIZE: u32 = 500;

/// Seconds a connection may stay in `connecting` before it is expired
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// First reconnect delay in milliseconds
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;

/// Reconnect delay ceiling in seconds
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_IDENTITY_ID: &str = "pairsync-identity-id-v1";
pub const KDF_CONTEXT_MESSAGE_HASH: &str = "pairsync-message-hash-v1";

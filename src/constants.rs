//! Centralized protocol and configuration constants.
//!
//! # Categories
//!
//! - **Wire Constants**: frame tags and size limits of the publish stream
//! - **Session Constants**: heartbeat, ack batching and response queue sizing
//! - **Metadata Constants**: where assignment documents live
//! - **Network Constants**: listener defaults and connection limits

// =============================================================================
// Wire Constants
// =============================================================================

/// Request frame tag for the `Init` handshake message.
pub const FRAME_TAG_INIT: u8 = 0x01;

/// Request frame tag for a `Data` message.
pub const FRAME_TAG_DATA: u8 = 0x02;

/// Size of the big-endian length prefix in front of every frame.
pub const FRAME_LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum frame body size (8 MB).
///
/// A frame announcing a larger body is rejected before any allocation.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

// =============================================================================
// Session Constants
// =============================================================================

/// Ack interval used when the client asks for a non-positive one.
pub const MIN_ACK_INTERVAL: i32 = 1;

/// Period between heartbeat responses on an idle publish stream.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 1_000;

/// Capacity of the per-session outbound response queue.
///
/// Producers block when the queue is full; acks are never dropped.
pub const DEFAULT_RESPONSE_QUEUE_CAPACITY: usize = 128;

/// How long a finished session waits for queued responses to be flushed.
pub const DEFAULT_OUTBOUND_DRAIN_TIMEOUT_MS: u64 = 5_000;

/// Upper bound (exclusive) of the random disambiguator in session ids.
pub const SESSION_DISAMBIGUATOR_RANGE: u32 = 10_000;

/// Attempts to register a session before giving up on a partition that keeps
/// shutting down underneath the caller.
pub const MAX_ATTACH_ATTEMPTS: usize = 3;

// =============================================================================
// Metadata Constants
// =============================================================================

/// Root directory of per-topic metadata in the metadata store.
pub const DEFAULT_TOPICS_ROOT: &str = "topics";

/// File name of the partition assignment document inside a topic directory.
pub const TOPIC_CONF_FILE: &str = "topic.conf";

// =============================================================================
// Network Constants
// =============================================================================

/// Default port of the publish listener.
pub const DEFAULT_BROKER_PORT: u16 = 17777;

/// Default port of the HTTP health endpoint.
pub const DEFAULT_HEALTH_PORT: u16 = 8080;

/// Default maximum total connections across all clients.
///
/// Set to 0 for unlimited.
pub const DEFAULT_MAX_TOTAL_CONNECTIONS: usize = 10_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_tags_are_distinct() {
        assert_ne!(FRAME_TAG_INIT, FRAME_TAG_DATA);
    }

    #[test]
    #[allow(clippy::assertions_on_constants)]
    fn test_heartbeat_is_one_second() {
        assert_eq!(DEFAULT_HEARTBEAT_INTERVAL_MS, 1_000);
        assert!(DEFAULT_OUTBOUND_DRAIN_TIMEOUT_MS > DEFAULT_HEARTBEAT_INTERVAL_MS);
    }

    #[test]
    #[allow(clippy::assertions_on_constants)]
    fn test_response_queue_is_bounded() {
        assert!(DEFAULT_RESPONSE_QUEUE_CAPACITY >= 100);
        assert!(DEFAULT_RESPONSE_QUEUE_CAPACITY <= 1_000);
    }

    #[test]
    #[allow(clippy::assertions_on_constants)]
    fn test_frame_size_limit_is_bounded() {
        assert!(DEFAULT_MAX_FRAME_SIZE >= 64 * 1024);
        assert!(DEFAULT_MAX_FRAME_SIZE <= 100 * 1024 * 1024);
    }
}

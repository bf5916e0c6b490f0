//! Connection configuration.
//!
//! A connection's configuration is assembled once through
//! [`ConnectionBuilder`], validated, and then frozen into a
//! [`ConnectionOptions`] snapshot that the pumps read from.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ConnectionBuilder`] | Fluent configuration builder |
//! | [`ConnectionOptions`] | Immutable, validated settings |
//!
//! # Defaults
//!
//! | Setting | Default |
//! |---------|---------|
//! | Outbound queue capacity | 32 frames |
//! | Max frame size | 1 MiB |
//! | Heartbeat interval | 30 s (idle deadline is twice this) |
//! | Buffer pool | [`BufferPool::shared`](crate::BufferPool::shared) |
//! | Error callback | none (always terminate) |
//! | Connect hook | none |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for connection configuration.
pub mod builder;

/// Validated connection settings and callback types.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ConnectionBuilder;
pub use options::{
    ConnectionOptions, DEFAULT_HEARTBEAT, DEFAULT_MAX_FRAME_SIZE, DEFAULT_OUTBOUND_CAPACITY,
    OnConnect, OnError, OnMessage,
};

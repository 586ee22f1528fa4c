//! Storage session contract for ferry.
//!
//! Every backend (local directory, chunked database table, HTTP gateway) is
//! reached through the [`Session`] trait: list a namespace, stream objects in
//! and out, rename and delete. Callers never see which backend they talk to.
//!
//! # Backends in this crate
//!
//! - [`LocalSession`] -- a directory on the local filesystem
//! - [`InMemorySession`] -- `BTreeMap`-based session for tests and embedding
//!
//! # Adapters
//!
//! - [`PrefixedSession`] -- rebases every path under a fixed directory
//!
//! # Contract
//!
//! 1. Streams deliver bytes in write order regardless of read buffer size.
//! 2. Nothing written is visible until the writer is closed successfully.
//! 3. "Not found" is always distinguishable through [`SessionError::is_not_found`].
//! 4. Listing failures propagate; they are never reported as absence.

pub mod error;
pub mod local;
pub mod memory;
pub mod object;
pub mod path;
pub mod prefix;
pub mod traits;

pub use error::{SessionError, SessionResult};
pub use local::LocalSession;
pub use memory::InMemorySession;
pub use object::ObjectInfo;
pub use prefix::{with_prefix, PrefixedSession};
pub use traits::{exists_by_listing, ObjectReader, ObjectWriter, Session};

//! # rollcall-directory
//!
//! Collaborator boundary for the Rollcall server.
//!
//! The server core treats the relational database and the auth service as
//! opaque collaborators. This crate defines the traits it consumes
//! ([`Directory`], [`AuthProvider`]), the row types that cross the boundary,
//! and in-memory implementations used by the development binary and tests.
//!
//! ## Example
//!
//! ```ignore
//! use rollcall_directory::{Directory, MemoryDirectory, NewGuest};
//!
//! let dir = MemoryDirectory::new();
//! let guest = dir.create_guest(&NewGuest::new("evt-1", "client-7")).await?;
//! assert!(dir.find_guest("evt-1", "client-7").await?.is_some());
//! ```

pub mod error;
pub mod memory;
pub mod traits;
pub mod types;

pub use error::DirectoryError;
pub use memory::{MemoryAuthProvider, MemoryDirectory};
pub use traits::{AuthProvider, Directory};
pub use types::{ClientRecord, GuestRecord, NewGuest, Principal, Role};

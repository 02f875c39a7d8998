//! # Incremental IMAP folder synchronization.
//!
//! The crate reconciles the state of one remote folder (UIDs, flags,
//! deletions, MODSEQ) with a locally persisted view. The IMAP session
//! and the message storage are provided by the caller through the
//! [`imap::ImapSession`] and [`store::MessageStore`] traits.

#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::correctness,
    missing_debug_implementations,
    clippy::all,
    clippy::wildcard_imports,
    clippy::needless_borrow,
    clippy::cast_lossless,
    clippy::unused_async,
    clippy::explicit_iter_loop,
    clippy::explicit_into_iter_loop,
    clippy::cloned_instead_of_copied
)]
#![cfg_attr(not(test), warn(clippy::indexing_slicing))]
#![allow(clippy::match_bool, clippy::bool_assert_comparison)]

#[macro_use]
mod log;

pub mod bodystructure;
pub mod config;
pub mod context;
pub mod events;
pub mod imap;
pub mod store;
pub mod sync;

pub use self::context::Context;
pub use self::events::{Event, EventEmitter, EventType, Events};
pub use self::log::LogExt;
pub use self::sync::{FolderSyncEngine, FolderSyncState, SyncState};

#[cfg(test)]
mod test_utils;

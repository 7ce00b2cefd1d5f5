//! rollcall-store — Persistence for the attendance daemon.
//!
//! Two layers: [`Store`], the SQLite roster and attendance ledger, and
//! [`GalleryStore`], the on-disk photo trees (reference photos and event
//! snapshots). Both are deliberately free of recognition logic; they record
//! what the service decided.

pub mod db;
pub mod gallery;

pub use db::{Store, StoreError};
pub use gallery::{EventKind, GalleryError, GalleryStore};

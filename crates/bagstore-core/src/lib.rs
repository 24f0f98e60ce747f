// crates/bagstore-core/src/lib.rs
// ============================================================================
// Module: Bagstore Core Library
// Description: Public API surface for the Bagstore data model and interfaces.
// Purpose: Expose message log types and storage capability traits.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Bagstore core defines the backend-agnostic model of a recorded message log:
//! serialized messages, topic descriptions, replay filters, read orders, and
//! bag-level metadata. Storage engines integrate through the capability
//! traits in [`interfaces`] and report failures through [`StorageError`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::ReadOnlyStorage;
pub use interfaces::ReadWriteStorage;
pub use interfaces::StorageError;
pub use interfaces::StorageInfo;
pub use interfaces::WritableStorage;

//! Core infrastructure for rate-dispatcher.
//!
//! This crate provides the event system shared by the dispatcher crate:
//! - Event trait and listener registry
//! - Panic-isolating dispatch to listeners

pub mod events;

pub use events::{DispatcherEvent, EventListener};

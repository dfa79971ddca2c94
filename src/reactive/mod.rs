//! Observable containers.
//!
//! This module provides the two reactive primitives a synchronized record is
//! built from:
//! - [`Observable`]: a structured value that reports every committed change
//!   together with its full serialized snapshot and origin
//! - [`ReactiveCell`]: a single shared slot (used for the error message)
//!
//! # Example
//!
//! ```ignore
//! let state = Observable::new(Settings { theme: "light".into() })?;
//! state.watch(|m| println!("{:?}: {}", m.origin, m.snapshot));
//! state.update(|s| s.theme = "dark".into())?;
//! ```

mod cell;
mod merge;
mod state;

pub use cell::{ErrorSlot, ReactiveCell};
pub use merge::merge_fields;
pub use state::{Mutation, MutationOrigin, Observable};

/// Handle for removing a registered watcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

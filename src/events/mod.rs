//! Change notification bus.

mod bus;
mod types;

pub use types::{ChangeSet, Observer};

pub(crate) use bus::ChangeBus;

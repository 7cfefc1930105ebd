//! Capture-side API
//!
//! Capture itself runs inside the database (see [`crate::ddl::log_action_function`]). This
//! module holds what the host application drives around it: changeset scopes, the tracking
//! toggle and replay of captured row states.

pub mod changeset;
pub mod replay;
pub mod tracking;

pub use changeset::{Actor, ActorProvider, ChangesetScope, CHANGESET_SETTING};
pub use replay::{diff, replay, state_after, AttributeChange};
pub use tracking::{has_trigger, toggle_tracking};

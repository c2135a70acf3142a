//! whisk-entity — action metadata lookup for the dispatch core.
//!
//! Backed by [redb](https://docs.rs/redb). The load balancer only ever
//! reads through the [`ActionStore`] trait (`get_action` by namespace and
//! name); writes exist so operators and tests can seed actions.
//!
//! Action metadata is JSON-serialized into redb's `&[u8]` value column
//! under a `{namespace}/{name}` key.

pub mod error;
pub mod limits;
pub mod store;
pub mod tables;

pub use error::{EntityError, EntityResult};
pub use limits::check_limits;
pub use store::{ActionStore, EntityStore};

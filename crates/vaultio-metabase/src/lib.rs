//! Vaultio metabase - the index tier of a shard
//!
//! An ordered transactional key/value store holding every index a shard
//! needs: headers by type, parent/child links for split objects, the root
//! marker set, blob back-references, the graveyard, the relocation queue,
//! the attribute index, and lock lists.
//!
//! The metabase holds index state only. Blob-store contents are the ground
//! truth: the whole database can be rebuilt by iterating the blob store
//! ([`Metabase::reset`] followed by re-putting every object).

mod db;
mod delete;
mod graveyard;
mod iterate;
mod select;
mod store;
mod tables;

pub use db::Metabase;
pub use iterate::ListCursor;
pub use select::{AttrFilter, MatchOp, SelectFilters};

//! Protocol-level types shared between the store and its callers:
//! identifiers, timestamps, event kinds, tags, the `Event` value itself,
//! and query `Filter`s. Storage and indexing live in `relay-store`.

pub mod bincode_cfg;
pub mod event;
pub mod filter;
pub mod ids;
pub mod kind;
pub mod tag;
pub mod timestamp;

pub use bincode_cfg::STD_BINCODE_CONFIG;
pub use event::Event;
pub use filter::Filter;
pub use ids::{HexArrayParseError, Id, PubKey, Sig};
pub use kind::{EventKind, DELETION_KIND};
pub use tag::Tag;
pub use timestamp::Timestamp;

//! The document tree: block identity, block payloads, page arenas and the
//! document registry.
//!
//! Blocks never hold references to each other. A parent lists its children
//! as [`BlockId`]s and the owning [`Page`] resolves them, so the tree can be
//! read from many tasks at once and mutated in one place.

mod block;
mod document;
mod ids;
mod page;

pub use block::{
    Block, BlockKind, BlockMetadata, SpanData, SpanFormat, TableCellData, TextData,
};
pub use document::{Document, PAGE_FURNITURE};
pub use ids::{BlockId, BlockType, TextExtractionMethod};
pub use page::Page;

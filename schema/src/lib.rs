//! Field descriptor tables and visibility tags for fieldsync.
//!
//! This crate defines how a replicated record is laid out:
//! - Holder schemas: named, ordered field descriptor tables
//! - Field kinds (scalar, fixed array, dynamic collection, optional) and value codecs
//! - Mask bit and coalescing block bit assignment
//! - Per-field visibility tags
//! - Deterministic schema hashing
//!
//! # Design Principles
//!
//! - **Runtime descriptor tables** - Schemas are built once through a builder and shared by `Arc`.
//! - **Validate at definition time** - Bit aliasing, bad widths and bad block bits are rejected by `build`.
//! - **Deterministic hashing** - Schema hash is stable given the same definition.
//!
//! # Example
//!
//! ```
//! use schema::{FieldCodec, FieldDef, HolderSchema, Visibility};
//!
//! let schema = HolderSchema::builder("profile")
//!     .field(FieldDef::scalar("level", 0, FieldCodec::uint(32)))
//!     .field(FieldDef::scalar("favorite_color", 1, FieldCodec::string(32)))
//!     .field(FieldDef::dynamic("tags", 2, FieldCodec::uint(32)).block_bit(0))
//!     .field(FieldDef::scalar("gm_note", 3, FieldCodec::string(64)).visibility(Visibility::NONE))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(schema.block_count(), 1);
//! ```

mod error;
mod field;
mod hash;
mod schema;
mod visibility;

pub use error::{SchemaError, SchemaResult};
pub use field::{
    ArrayBits, FieldCodec, FieldDef, FieldKind, FixedPoint, OptionalStorage, ValueType,
    DEFAULT_LEN_BITS,
};
pub use hash::schema_hash;
pub use schema::{BitSlot, FieldKey, HolderSchema, HolderSchemaBuilder, MAX_MASK_BITS};
pub use visibility::Visibility;

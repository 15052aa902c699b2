//! Change-tracked field holders and their baseline/diff wire format.
//!
//! A [`Holder`] stores the fields described by a [`schema::HolderSchema`]
//! together with a hierarchical [`ChangeMask`]. Mutations go through
//! accessors ([`HolderMut`] and friends) that mark the written field and
//! every ancestor on the way back to the root, so the replication pass can
//! find dirty state without scanning values.
//!
//! # Features
//!
//! - 128-bit entity GUIDs with per-class bit layouts
//! - Scalar, fixed-array, dynamic and optional field wrappers
//! - Nested holders with dirty propagation through any depth
//! - Per-field visibility filtering
//! - Baseline (full) and diff (changed-only) payloads
//!
//! # Design Principles
//!
//! - **Mark on change** - Writing an equal value marks nothing.
//! - **Bounded decoding** - Every length and depth read from the wire is
//!   checked against [`CodecLimits`].
//! - **Deterministic** - Same holder state and granted set produce the same
//!   bytes.

mod accessor;
mod baseline;
mod diff;
mod dynamic;
mod error;
mod guid;
mod holder;
mod limits;
mod mask;
mod optional;
mod scratch;
mod value;
mod visibility;

pub use accessor::{
    ArrayMut, DynamicMut, ElementMut, FieldMut, HolderMut, OptionalMut, ScalarMut,
};
pub use baseline::{apply_baseline, encode_baseline};
pub use diff::{apply_diff, encode_diff, encode_diff_with_scratch};
pub use dynamic::DynamicField;
pub use error::{CodecError, CodecResult, LimitKind, MaskReason, ValueReason};
pub use guid::{CounterLayout, EntityGuid, GuidScope, GuidWord, IdentityClass, ParseGuidError};
pub use holder::{Element, FieldRef, Holder};
pub use limits::CodecLimits;
pub use mask::{ChangeMask, ElementMask, SetBits, WORD_BITS};
pub use optional::OptionalField;
pub use scratch::CodecScratch;
pub use value::FieldValue;
pub use visibility::{has_visible_changes, visibility_mask, visible_changes};

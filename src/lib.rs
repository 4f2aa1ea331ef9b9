// SPDX-License-Identifier: Apache-2.0

//! Whole-module function folding: finds functions that would lower to
//! identical machine code (treating pointers and same-width integers as
//! interchangeable) and coalesces each equivalence class down to a single
//! implementation, redirecting the rest through aliases, thunks, or direct
//! callsite rewrites.

pub mod comparator;
pub mod fingerprint;
pub mod fold;
pub mod ir;
pub mod ir_parser;
pub mod ir_validate;
pub mod layout;
pub mod rewrite;
pub mod type_order;

pub use fold::{fold_module, FoldOptions, FoldStats};

//! Fixed-capacity arena allocator with conservative garbage collection.
//!
//! An [`Arena`] hands out blocks of memory from a single buffer
//! and takes them back explicitly through [`Arena::deallocate`]
//! or implicitly through [`Arena::collect`], which frees every block
//! that cannot be reached from the registers and the call stack.
//!
//! Most programs use the thread's arena through the [`global`] module.

#![warn(missing_docs)]

pub use self::{arena::*, collect::*, dump::*, error::*};

pub mod global;

mod arena;
mod collect;
mod dump;
mod error;

//! Wire and domain types shared between the newsletter client and its front ends.

pub mod domain;
pub mod error;
pub mod protocol;

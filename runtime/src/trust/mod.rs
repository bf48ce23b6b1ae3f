//! Session credentials used for upstream access.

pub mod identity;

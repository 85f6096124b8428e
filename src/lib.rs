//! psachecker: least-privileged Pod Security level checker.
//!
//! Evaluates workloads and namespaces against the `restricted`, `baseline`
//! and `privileged` Pod Security levels at once and recommends, per
//! namespace, the strictest level that would still admit everything in it.
//!
//! See `DESIGN.md` for the architecture.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod types;

pub mod cluster;
pub mod policy;
pub mod scheme;
pub mod source;

pub mod admission;
pub mod inspect;

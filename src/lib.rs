//! fabricbench - collective bandwidth sweep and all-pairs transfer
//! verification for multi-node fabrics.
//!
//! One process per rank. A [`group::Group`] is bootstrapped over a
//! [`fabric::Fabric`] transport, driven through a warmup/timed all-reduce
//! sweep ([`bench`]), then an ordered all-pairs point-to-point check
//! ([`verify`]). Rank 0 holds the [`report::Reporter`] capability and is
//! the only rank that prints results.

pub mod bench;
pub mod device;
pub mod diag;
pub mod error;
pub mod fabric;
pub mod group;
pub mod report;
pub mod verify;

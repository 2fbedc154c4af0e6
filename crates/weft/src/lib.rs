//! # Weft host helper
//!
//! Command-line front end for [`weft_net`]: provisions the overlay bridge on
//! daemon start and answers device lookups for the overlay's scripts.

pub mod cli;

#![allow(missing_docs)]

//! The Tide finality gadget (BFT-lite voting) and Hydro witness rotation,
//! generalized across independently-finalizing conciliums.

pub mod block_assembly;
pub mod concilium;
pub mod driver;
pub mod hydro;
pub mod signing;
pub mod tide;

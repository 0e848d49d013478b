#![allow(missing_docs)]

//! Key management: Ed25519 keystore with at-rest encryption and an audit trail.

pub mod keystore;

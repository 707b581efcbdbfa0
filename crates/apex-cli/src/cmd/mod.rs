//! Command modules - one file per CLI command

pub mod completions;
pub mod info;
pub mod list;
pub mod pubkey;
pub mod verify;

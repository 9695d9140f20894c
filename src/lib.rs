//! Offline song cache for the Open Music streaming client.
//!
//! - [`cache`]: disk stores for song audio and song lists
//! - [`sources`]: network collaborators the song cache downloads through
//! - [`config`]: environment-driven settings

pub mod cache;
pub mod config;
pub mod sources;

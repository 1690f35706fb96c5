pub mod content_hash;
pub mod error;
pub mod manifest;

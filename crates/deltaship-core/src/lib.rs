pub mod chunker;
pub mod config;
pub mod diff;
pub mod error;
pub mod notify;
pub mod origin;
pub mod patch;
pub mod release;
pub mod transfer;

#[cfg(test)]
mod tests;
#[cfg(test)]
mod testutil;

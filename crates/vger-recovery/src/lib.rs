pub mod archive;
pub mod cache;
pub mod cancel;
pub mod commands;
pub mod compress;
pub mod config;
pub mod crypto;
pub mod error;
pub mod fileset;
pub mod hash;
pub mod index;
pub mod rechunk;
pub mod rewrite;
pub mod storage;
pub mod volume;

#[cfg(test)]
mod tests;
#[cfg(test)]
mod testutil;

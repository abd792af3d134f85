pub mod download;
pub mod index;
pub mod list;
pub mod rechunk;
pub mod recompress;
pub mod restore;
pub mod util;

pub use util::BackupSet;

//! Tiered payload archival and the zip toolbox underneath it.

mod compressor;
mod disk;
pub mod zip;

pub use compressor::{Compressor, EntryLayout, archive_path, entry_name};
pub use disk::{Disk, LocalDisk, normalize_root};
pub use zip::{SkipMode, Zip};

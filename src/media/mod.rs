//! Media download and validation.
//!
//! Files land at a path derived from a hash of their URL
//! ([`media_path`]); [`MediaDownloader`] enforces byte-size bounds while
//! streaming and, for images, minimum pixel dimensions read from the file
//! header.

mod downloader;
mod path;

pub use downloader::{DownloadedFile, MediaDownloader, MediaError};
pub use path::media_path;

//! # kitaboo2pdf
//!
//! Downloads a licensed Kitaboo e-book's page images from its content
//! server using session cookies, optionally decrypts per-page payloads,
//! and rebuilds the book as a single PDF with its table of contents.
//!
//! ## Usage
//!
//! ```bash
//! kitaboo2pdf download 680165 --cookies cookies.txt --key <secret>
//! ```
//!
//! The cookie file holds one line of raw `name=value; ...` text copied from
//! an authenticated browser session; the secret is the value the reader
//! application exposes as its resource-encryption key.

mod assembler;
mod config;
mod downloader;
mod manifest;
mod page;
mod session;
mod toc;

pub use assembler::BookDocument;
pub use config::{Config, DEFAULT_BASE_URL};
pub use downloader::{sanitize_filename, DownloadReport, Downloader, PageOutcome};
pub use manifest::{fetch_package_manifest, Book, PackageManifest, PageImage};
pub use page::{fetch_page, PageError};
pub use session::{cookie_header, Session, COOKIE_ALLOWLIST};
pub use toc::{fetch_toc, flatten_toc, TocEntry, TocItem, TocSection};

//! Page fetch capabilities consumed by the crawler.

pub mod browser;
pub mod fetcher;

pub use browser::BrowserPageFetcher;
pub use fetcher::{FetchedPage, HttpPageFetcher, PageFetcher};

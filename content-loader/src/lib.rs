pub mod types;
pub mod fetcher;
pub mod parser;
pub mod traits;
pub mod sanitizer;
pub mod filter;
pub mod media;
pub mod session_cache;
pub mod sources;
pub mod store;
pub mod loader;

pub use types::*;
pub use fetcher::{Fetcher, WebClient};
pub use parser::FeedParser;
pub use traits::{ItemCursor, Spout, SpoutItem};
pub use media::{IconMemo, MediaCache};
pub use session_cache::SessionCache;
pub use sources::{SpoutInfo, SpoutRegistry};
pub use store::SqliteStore;
pub use loader::ContentLoader;

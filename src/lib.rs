//! cortado: a concurrent, bounded, in-memory cache.
//!
//! The engine decouples the lock-free read path from serialized policy
//! bookkeeping: reads and writes record events into striped/lossless
//! buffers which an amortized maintenance pass drains under one lock into
//! a weighted-LRU policy with time-based expiry.  Single-flight loading,
//! refresh-after-write, removal notifications, and statistics sit on top.
//!
//! ```
//! use cortado::CacheBuilder;
//! use std::time::Duration;
//!
//! let cache: cortado::Cache<String, String> = CacheBuilder::new(10_000)
//!     .expire_after_write(Duration::from_secs(300))
//!     .record_stats()
//!     .build();
//!
//! cache.insert("user:1".to_string(), "ada".to_string());
//! assert_eq!(cache.get(&"user:1".to_string()).as_deref(), Some(&"ada".to_string()));
//!
//! let greeting = cache.get_with(&"user:2".to_string(), || "grace".to_string());
//! assert_eq!(*greeting, "grace");
//! ```

mod buffer;
mod builder;
mod cache;
mod loading;
mod metrics;
mod policy;
mod store;

pub mod error;
pub mod exec;
pub mod listener;
pub mod loader;
pub mod time;
pub mod weigher;

pub use builder::CacheBuilder;
pub use cache::{Cache, Iter};
pub use error::{ConfigError, LoadError};
pub use listener::{RemovalCause, RemovalListener};
pub use loader::CacheLoader;
pub use metrics::stats::CacheStats;

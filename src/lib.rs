//! stackpile core library: decoding, aggregation and storage of profiling
//! samples, plus the HTTP ingestion server built on top of them.

mod cmd;
mod config;
mod decode;
mod error;
mod ingest;
mod labels;
mod params;
mod server;
mod storage;
mod timeexpr;
mod tree;

#[cfg(test)]
mod testing;

pub use cmd::*;
pub use config::*;
pub use decode::*;
pub use error::*;
pub use ingest::*;
pub use labels::*;
pub use params::*;
pub use server::*;
pub use storage::*;
pub use timeexpr::*;
pub use tree::*;

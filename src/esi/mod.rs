//! Edge Side Includes: page assembly from cached fragment trees.
//!
//! [`EsiMiddleware`] sits in a [`Pipeline`](crate::middleware::Pipeline) in
//! front of the handlers that produce pages. A request goes through four
//! stages:
//!
//! 1. **Admission**: [`admit`] lets `304` responses and the layer's own
//!    fragment sub-requests pass straight through.
//! 2. **Capture**: on a cache miss the rest of the chain runs with its body
//!    redirected into memory.
//! 3. **Caching**: the captured body is parsed by a [`BodyParser`] and,
//!    for `200` responses, stored in a [`FragmentCache`] under the full
//!    request URL together with its content type.
//! 4. **Rendering**: a [`FragmentExecutor`] expands the tree, and its
//!    chunks are streamed to the client as they arrive.
//!
//! The three collaborators are traits. [`IncludeParser`],
//! [`IncludeExecutor`] and [`MemoryCache`] are the in-process defaults, wired
//! together by [`EsiMiddleware::in_memory`].

mod cache;
mod capture;
mod error;
mod executor;
mod fragment;
mod gate;
mod middleware;
mod options;
mod orchestrator;
mod parser;
mod render;

pub use cache::{FragmentCache, MemoryCache};
pub use error::{CacheError, ConfigError, EsiError, FetchError, ParseError};
pub use executor::{ChunkStream, FragmentExecutor, FragmentSource, IncludeExecutor, LoopbackSource};
pub use fragment::{CachedPage, Fragment, Include};
pub use gate::{Admission, BypassReason, admit};
pub use middleware::EsiMiddleware;
pub use options::EsiOptions;
pub use parser::{BodyParser, IncludeParser};

//! kgflow store - the knowledge substrate
//!
//! A time-indexed quad store with delta computation, a SPARQL-subset
//! evaluator, and Turtle load/save. Every mutation batch that changes the
//! store gets a new epoch; removed quads keep their history so `since` and
//! `match_at` can look back.

pub mod error;
pub mod persist;
pub mod prefixes;
pub mod sparql;
pub mod store;
pub mod term;
pub mod turtle;

pub use error::{QueryError, TurtleError};
pub use persist::{
    ensure_default_graph, list_turtle_files, list_turtle_files_matching, load_directory,
    load_files, save_default, LoadOutcome, SkippedFile, UriResolver,
};
pub use prefixes::PrefixMap;
pub use sparql::{QueryResponse, QueryResult, UpdateSummary};
pub use store::{Delta, Epoch, QuadStore, SharedStore, StoreStats};
pub use term::{GraphName, Literal, Quad, Term};
pub use turtle::{parse_turtle, serialize_turtle, ParsedTurtle, TurtleOptions};

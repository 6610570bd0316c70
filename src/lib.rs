//! RQG: a random query generator for PostgreSQL-compatible databases.
//!
//! Grammars composed from a small element algebra (choice, template,
//! repeat, maybe, rule references, lambdas, schema-aware picks) are
//! expanded by a pool of seeded workers into a stream of SQL. The stream is
//! deduplicated by a rotating Bloom filter and, when a DSN is configured,
//! executed against the target with per-worker connections, a DDL barrier,
//! transparent reconnects, and rolling throughput reporting. The same
//! `(seed, workers, count)` configuration always reproduces the same
//! multiset of queries, and runs checkpoint and resume deterministically.
//!
//! # Quick start
//!
//! ```no_run
//! use rqg::config::RunConfig;
//! use rqg::grammars;
//!
//! # async fn demo() -> Result<(), rqg::error::RunError> {
//! let config = RunConfig {
//!     grammar: "smoke".to_string(),
//!     count: Some(10_000),
//!     seed: Some(42),
//!     ..RunConfig::default()
//! };
//! let grammar = grammars::builtin("smoke").unwrap();
//! let summary = rqg::run::run(&config, grammar, None).await?;
//! println!("{}", summary.render());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod grammars;
pub mod run;

pub use config::RunConfig;
pub use error::RunError;
pub use run::run;

// The building blocks, re-exported for hosts that assemble their own
// grammars and pipelines.
pub use rqg_endpoint as endpoint;
pub use rqg_grammar as grammar;
pub use rqg_runner as runner;
pub use rqg_schema as schema;
pub use rqg_unique as unique;

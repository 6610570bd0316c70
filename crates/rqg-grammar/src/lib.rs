//! Grammar expansion engine.
//!
//! A grammar is a frozen table of named rules, each rule an [`Element`] tree.
//! Expanding the entry rule against a seeded [`Context`] produces one SQL
//! string; the same `(master_seed, worker, index)` triple always produces the
//! same string.
//!
//! # Example
//!
//! ```
//! use rqg_grammar::{Context, ExpandConfig, GrammarBuilder, dsl::*};
//! use std::sync::Arc;
//!
//! let grammar = GrammarBuilder::new("demo")
//!     .rule("query", template("SELECT {col} FROM {tab};"))
//!     .rule("col", lit("id"))
//!     .rule("tab", lit("t"))
//!     .freeze()
//!     .unwrap();
//!
//! let schema = Arc::new(rqg_schema::SchemaView::empty());
//! let mut ctx = Context::for_query(42, 0, 0, schema, ExpandConfig::default());
//! assert_eq!(grammar.generate(&mut ctx).unwrap(), "SELECT id FROM t;");
//! ```

pub mod context;
pub mod dsl;
pub mod element;
pub mod grammar;
pub mod rng;

pub use context::{Context, ExpandConfig, ExpandWarnings};
pub use element::{ColumnFilter, Element, ExpandError, TableFilter, TemplatePart};
pub use grammar::{Grammar, GrammarBuilder, GrammarError};
pub use rng::derive_seed;

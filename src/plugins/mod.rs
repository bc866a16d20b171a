//! Feature surfaces. Each module owns its rows in `grid.db`, a library API, a
//! clap subcommand and a `schema()` description.

pub mod base;
pub mod builder;
pub mod field;
pub mod marketplace;
pub mod pipeline;
pub mod record;
pub mod table;
pub mod usage;
pub mod workspace;

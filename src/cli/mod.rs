//! CLI command implementations
//!
//! - `session`: selection commands (validate, price, options)
//! - `analysis`: model analysis commands (conflicts, priorities, impact)
//! - `schema`: JSON schema output
//! - `util`: shared argument and file helpers

pub mod analysis;
pub mod schema;
pub mod session;
pub mod util;

pub use analysis::{cmd_conflicts, cmd_impact, cmd_priorities};
pub use schema::cmd_schema;
pub use session::{cmd_options, cmd_price, cmd_validate};

// Export types so one can import only the IR without the rest of the module.
pub mod types;
// Only contains Parser, so re-export it in this module.
mod parser;
// Only contains ParseError, so re-export it in this module.
mod error;

pub use error::ParseError;
pub use parser::Parser;
pub use types::*;

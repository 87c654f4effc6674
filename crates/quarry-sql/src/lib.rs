pub mod ast;
pub use ast::Statement;

pub mod printer;
pub use printer::SqlTreePrinter;

pub mod serializer;
pub use serializer::{Params, Placeholder, Serializer};

//! A small Python syntax tree and its printer.
mod ast;
pub use ast::{Arg, Expr, Stmt};

mod printer;
pub use printer::print_module;

#[cfg(test)]
mod tests;

mod binding;
mod interpreter;
mod manager;
#[cfg(test)]
pub(crate) mod testing;

pub use binding::{python_string, InterpreterBinding};
pub use interpreter::{InterpreterHost, ProcessInterpreter};
pub use manager::{DependentToken, RuntimeManager};

pub mod compiler;
pub mod executor;
pub mod step;

pub use compiler::{compile, compile_lines};
pub use executor::{RunContext, StepExecutor};
pub use step::{Step, WaitUntil};

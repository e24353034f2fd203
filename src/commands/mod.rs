//! Entry points shared by the command-line and cloud-function surfaces.

pub mod gateway;
pub mod run;
pub mod tools;

#![forbid(unsafe_code)]

pub mod capacity;
pub mod cli;
pub mod error;
pub mod listen;
pub mod replay;

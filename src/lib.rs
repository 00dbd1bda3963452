#![recursion_limit = "1024"]

#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate log;

extern crate byteorder;
extern crate memmap;

pub mod core;
pub mod error;

#![no_std]

#[cfg(test)]
extern crate std;

pub mod irq;
pub mod macros;
pub mod spin;

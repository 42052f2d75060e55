//! Cooperative cancellation.
//!
//! A run's token is checked at stage boundaries and between task attempts;
//! it never interrupts an attempt that is already in flight.

mod token;

pub use token::CancellationToken;

//! TSIG algorithm catalog and message signing for the control channel.

mod algorithm;
mod signature;

pub use algorithm::*;
pub use signature::*;

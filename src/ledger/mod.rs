//! Account identity and balance primitives shared by the event, staking and
//! snapshot layers.

pub mod address;
pub mod amount;

pub use address::{AddressEncoder, AddressError, RawAccount};
pub use amount::{Amount, AmountParseError};

#[macro_use]
extern crate serde;

mod authority;
mod config;
mod decryption;
mod election;
mod error;
mod field;
mod hash;
mod merkle;
mod nullifier_set;
mod recovery;
mod secret_share;
mod sparse;
mod store;
mod stream;
mod threshold;
mod util;
mod vote;

pub use authority::*;
pub use config::*;
pub use decryption::*;
pub use election::*;
pub use error::*;
pub use field::*;
pub use hash::*;
pub use merkle::*;
pub use nullifier_set::*;
pub use recovery::*;
pub use secret_share::*;
pub use sparse::*;
pub use store::*;
pub use stream::*;
pub use threshold::*;
pub use util::*;
pub use vote::*;

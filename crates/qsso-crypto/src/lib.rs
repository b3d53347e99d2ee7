#![forbid(unsafe_code)]

pub mod hash;
pub mod channel_key;
pub mod token_envelope;
pub mod cache_key;

pub use channel_key::ChannelKey;
pub use token_envelope::{decrypt_access_token, EnvelopeError, PlaintextToken};

//! # coterie-shared
//!
//! Identifier newtypes, constants, and the crypto adapter shared by the
//! Coterie chat store crates.  Tenants, chats, chunks, and users are numeric
//! ids; messages carry a 128-bit id rendered as a canonical UUID string at
//! every boundary.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod types;

pub use crypto::{ChaChaAdapter, CryptoAdapter};
pub use error::CryptoError;
pub use types::*;

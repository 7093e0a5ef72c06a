//! Fencing tokens and the authority that issues them.
//!
//! ## Contents
//! - [`FencingToken`], [`Lease`] ownership values
//! - [`Keystore`], [`MemoryKeystore`], [`TokenRecord`] storage collaborator
//! - [`TokenAuthority`], [`Grant`] acquire / validate / release

mod authority;
mod keystore;
mod token;

pub use authority::{Grant, TokenAuthority};
pub use keystore::{Keystore, KeystoreRef, MemoryKeystore, TokenRecord};
pub use token::{FencingToken, Lease, ParseTokenError};

pub(crate) use token::random_base36;

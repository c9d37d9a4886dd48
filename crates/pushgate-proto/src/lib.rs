//! Wire format for the pushgate notification service.
//!
//! Every RPC travels as a single CBOR document ([`Request`] inbound,
//! [`Response`] outbound). Framing is the transport's job; this crate only
//! enforces a hard size limit on encoded documents so a hostile peer cannot
//! make the decoder allocate without bound.
//!
//! Besides the RPC payloads the crate owns two formats that other parties
//! must reproduce bit for bit:
//!
//! - [`signing`]: the digests that clients and the permissioning service sign.
//!   Each digest is domain-separated by a [`SignatureTag`] so a signature made
//!   for one operation never verifies for another.
//! - [`csv`]: the compact notification payload handed to push providers and
//!   decoded again on the device.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod csv;
pub mod errors;
pub mod payloads;
pub mod signing;

pub use codec::MAX_DOCUMENT_SIZE;
pub use errors::{ProtocolError, Result};
pub use payloads::{
    NotificationBatch, NotificationData, RegisterForNotificationsRequest, RegisterTokenRequest,
    RegisterTrackedIdRequest, Request, Response, UnregisterForNotificationsRequest,
    UnregisterTokenRequest, UnregisterTrackedIdRequest,
};
pub use signing::{SignatureTag, SigningDigest};

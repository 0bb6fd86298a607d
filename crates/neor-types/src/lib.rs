//! # neor-types
//!
//! Data model shared by the NEOR provisioning service:
//!
//! - [`ServerDescriptor`] — one managed Xray proxy endpoint, loaded from
//!   static configuration.
//! - [`ClientIdentity`] — one provisioned credential inside a server's
//!   client list.
//! - [`RemoteConfigDocument`] — serde model of the remote Xray config,
//!   preserving every field this service does not touch.
//! - [`ConnectionDescriptor`] — the user-facing VLESS link, buildable from a
//!   server + identity and parseable back.

pub mod document;
pub mod identity;
pub mod link;
pub mod server;

pub use document::{ClientEntry, InboundSection, InboundSettings, RemoteConfigDocument};
pub use identity::{ClientIdentity, owner_email};
pub use link::{ConnectionDescriptor, LinkParseError};
pub use server::ServerDescriptor;

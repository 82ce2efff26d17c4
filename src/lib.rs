//! mailgate — delegated-authorization mailbox browsing core.
//!
//! Lets a client browse a remote mailbox (folders, messages, attachments)
//! behind an OAuth2 authorization-code grant without ever holding tokens
//! itself. Two central pieces:
//!
//! - [`auth::Authenticator`]: the authorization-code exchange and token
//!   lifecycle, with single-flight refresh.
//! - [`gateway::Gateway`] plus the traversal services
//!   ([`folders::FolderResolver`], [`messages::MessageService`],
//!   [`attachments::AttachmentService`]): authenticated calls against a
//!   hierarchical-collection API that only exposes parent→child listing and
//!   paginated envelopes.
//!
//! The HTTP route layer consuming this crate is intentionally out of scope;
//! the bundled CLI binary is a thin stand-in for it.

pub mod attachments;
pub mod auth;
pub mod config;
pub mod error;
pub mod folders;
pub mod gateway;
pub mod messages;
pub mod store;

pub use error::{Error, Result};

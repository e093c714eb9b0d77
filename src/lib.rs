//! seafile_client - a client library and CLI for the Seafile web API.
//!
//! This library provides functionality to:
//! - Authenticate against a Seafile server, transparently re-using an
//!   encrypted on-disk token cache and re-authenticating when the server
//!   rejects a token
//! - List libraries and their contents
//! - Stream file uploads through a multipart endpoint with live progress
//!   reporting
//!
//! # Example
//!
//! ```no_run
//! use seafile_client::Session;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let session = Session::new("https://sea.example.com", "me@example.com", Some("secret"));
//!     session.ensure_authenticated().await?;
//!
//!     for library in session.list_libraries().await? {
//!         println!("{}", library.name);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod crypto;
pub mod error;
pub mod models;
pub mod progress;
pub mod session;
pub mod token_store;

// Re-exports for convenience
pub use error::{Result, SeafileError};
pub use models::{FileEntry, LibraryInfo};
pub use progress::ProgressSnapshot;
pub use session::{Library, Session, DEFAULT_TOKEN_MAX_AGE};
pub use token_store::TokenStore;

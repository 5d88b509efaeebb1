//! Built-in endpoint handlers.
//!
//! Each handler is a plain typed function (or a closure capturing its
//! collaborator) and never touches the HTTP layer; the dispatcher owns
//! decoding, classification and framing.

pub mod health;
pub mod secret;
pub mod upload;

pub use health::health_handler;
pub use secret::get_secret_handler;
pub use upload::upload_file_handler;

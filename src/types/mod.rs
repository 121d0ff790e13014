//! Wire types shared by the client channel and the server registry.
//!
//! - [`envelope`]: the `{type, data}` envelope and its type vocabulary
//! - [`payloads`]: typed `data` bodies for each push type
//! - [`identity`]: the opaque identity key
//!
//! Everything is re-exported at the module root.

pub mod envelope;
pub mod identity;
pub mod payloads;

pub use envelope::*;
pub use identity::*;
pub use payloads::*;

//! Protocol extensions: pluggable executors for sources and criteria.
//!
//! The engine never talks to a device directly. Every protocol-backed source
//! or criterion is dispatched through the [`ExtensionRegistry`] to whichever
//! [`ProtocolExtension`] declared the matching capability. Two extensions
//! ship built in: HTTP and local OS commands.

mod http;
mod oscommand;
mod registry;
mod traits;

pub use http::{HTTP_PROTOCOL, HttpExtension, HttpProtocolConfig};
pub use oscommand::{CommandLineConfig, CommandLineExtension, OSCOMMAND_PROTOCOL};
pub use registry::ExtensionRegistry;
pub use traits::{ProtocolConfig, ProtocolError, ProtocolExtension};

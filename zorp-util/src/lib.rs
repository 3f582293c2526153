//! Support utilities used across the zorp runtime crates: URL parsing,
//! hex/text dumps, a typed name registry, and time math. None of these are
//! specific to streams or blobs; they are the small things every other
//! crate in the workspace reaches for.

pub mod dump;
pub mod registry;
pub mod time;
pub mod url;

pub use dump::{hex_dump, text_dump};
pub use registry::Registry;
pub use url::{Url, UrlParseError};

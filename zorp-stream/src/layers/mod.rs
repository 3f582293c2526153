//! Concrete stream layers. Each implements [`crate::core::Stream`] over a
//! generic child, so they compose by nesting: `LineLayer<BufLayer<FdLayer>>`
//! and so on.

pub mod blob;
pub mod buf;
pub mod fd;
pub mod gzip;
pub mod line;
pub mod ssl;
pub mod tee;

pub use blob::BlobLayer;
pub use buf::BufLayer;
pub use fd::FdLayer;
pub use gzip::GzipLayer;
pub use line::{Eol, LineConfig, LineLayer, NulPolicy, OversizePolicy};
pub use ssl::SslLayer;
pub use tee::{TeeDirection, TeeLayer};

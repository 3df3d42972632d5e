//! Protocol layer: the transport seam, wire shapes and their HTTP binding.

pub mod format;
pub mod http;
pub mod qr;
pub mod transport;
pub mod wire;

pub use http::HttpTransport;
pub use transport::{OutboundMessage, Transport, UploadedMedia, Uploader};

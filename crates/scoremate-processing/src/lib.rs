//! Document inspection and page rendering for uploaded scores.
//!
//! - [`inspector`]: page count and Info-dictionary metadata via lopdf
//! - [`render`]: page rasterisation through the `pdftoppm` tool
//! - [`thumbnail`]: fitting a rendered page into a JPEG thumbnail

pub mod inspector;
pub mod render;
pub mod thumbnail;

pub use inspector::{DocumentInfo, DocumentInspector, PdfInspector};
pub use render::{PageRenderer, PdftoppmRenderer};
pub use thumbnail::ThumbnailSpec;

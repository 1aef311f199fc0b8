//! Reading and writing the metadata/binary file pair an image lives in.
//!
//! [`scan`] streams the XML metadata document into a property map and a
//! spectrum catalog, [`ibd`] does offset addressed reads from the binary
//! companion, and [`write`] renders a loaded image back out as a new pair.

pub mod ibd;
pub mod scan;
pub(crate) mod template;
pub(crate) mod utils;
pub mod write;

pub use ibd::{IbdFile, IbdValue, IntensityValue, MassValue};
pub use scan::scan_source;
pub use write::{write_image, ExportOptions};

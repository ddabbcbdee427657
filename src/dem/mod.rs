mod geotiff;
mod http;
mod raster;
mod transform;
mod window;
mod writer;

pub use geotiff::{open_source, GeoTiffSource, RasterMetadata, RasterSource};
pub use raster::ElevationGrid;
pub use transform::GeoTransform;
pub use window::{BoundingBox, Window};
pub use writer::write_geotiff;

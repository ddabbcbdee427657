use std::io::{Seek, Write};
use std::path::Path;

use tiff::encoder::{colortype, TiffEncoder, TiffKind};
use tiff::tags::Tag;

use crate::dem::ElevationGrid;
use crate::error::{Result, Stage};
use crate::utils::write_atomically;


const GEO_KEY_MODEL_TYPE: u16 = 1024;
const GEO_KEY_RASTER_TYPE: u16 = 1025;
const GEO_KEY_GEOGRAPHIC_TYPE: u16 = 2048;
const GEO_KEY_PROJECTED_CS_TYPE: u16 = 3072;
const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

/// Target size of one strip, so the encoder never needs the whole grid twice.
const STRIP_BYTES: usize = 1 << 20;

/// Writes `grid` as a single band float32 BigTIFF with its geo transform,
/// reference system and no-data marker. Returns the file size.
pub fn write_geotiff(path: &Path, grid: &ElevationGrid, epsg: Option<u16>) -> Result<u64> {
    write_atomically(path, Stage::Extract, |buf| {
        let encoder = TiffEncoder::new_big(buf)?;
        encode(encoder, grid, epsg)?;
        Ok(())
    })
}

fn encode<W: Write + Seek, K: TiffKind>(
    mut encoder: TiffEncoder<W, K>,
    grid: &ElevationGrid,
    epsg: Option<u16>,
) -> tiff::TiffResult<()> {
    let (width, height) = grid.dimensions();
    let mut image = encoder.new_image::<colortype::Gray32Float>(width as u32, height as u32)?;

    let transform = grid.transform();
    if transform.is_rectilinear() && transform.a > 0.0 && transform.e < 0.0 {
        let scale = [transform.a, -transform.e, 0.0];
        let tiepoint = [0.0, 0.0, 0.0, transform.c, transform.f, 0.0];
        image.encoder().write_tag(Tag::ModelPixelScaleTag, &scale[..])?;
        image.encoder().write_tag(Tag::ModelTiepointTag, &tiepoint[..])?;
    } else {
        let matrix = [
            transform.a, transform.b, 0.0, transform.c,
            transform.d, transform.e, 0.0, transform.f,
            0.0, 0.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ];
        image.encoder().write_tag(Tag::ModelTransformationTag, &matrix[..])?;
    }

    let geo_keys = geo_key_directory(epsg);
    image.encoder().write_tag(Tag::GeoKeyDirectoryTag, &geo_keys[..])?;

    if let Some(no_data) = grid.no_data() {
        image.encoder().write_tag(Tag::GdalNodata, no_data.to_string().as_str())?;
    }

    let rows_per_strip = (STRIP_BYTES / (width.max(1) * 4)).max(1);
    image.rows_per_strip(rows_per_strip as u32)?;

    let values = grid.values();
    let mut offset = 0usize;
    loop {
        let samples = image.next_strip_sample_count() as usize;
        if samples == 0 {
            break;
        }
        image.write_strip(&values[offset..offset + samples])?;
        offset += samples;
    }

    image.finish()
}

fn geo_key_directory(epsg: Option<u16>) -> Vec<u16> {
    let mut keys: Vec<[u16; 4]> = vec![[GEO_KEY_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA]];

    match epsg {
        Some(code) if is_geographic(code) => {
            keys.push([GEO_KEY_MODEL_TYPE, 0, 1, MODEL_TYPE_GEOGRAPHIC]);
            keys.push([GEO_KEY_GEOGRAPHIC_TYPE, 0, 1, code]);
        }
        Some(code) => {
            keys.push([GEO_KEY_MODEL_TYPE, 0, 1, MODEL_TYPE_PROJECTED]);
            keys.push([GEO_KEY_PROJECTED_CS_TYPE, 0, 1, code]);
        }
        None => {}
    }

    keys.sort_by_key(|k| k[0]);

    let mut directory = vec![1, 1, 0, keys.len() as u16];
    directory.extend(keys.iter().flatten());
    directory
}

fn is_geographic(code: u16) -> bool {
    (4000..5000).contains(&code)
}

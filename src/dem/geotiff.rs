use std::cell::Cell;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use std::rc::Rc;

use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tiff::{ColorType, TiffError};

use crate::dem::http::{HttpRangeReader, TransportFailure};
use crate::dem::{ElevationGrid, GeoTransform, Window};
use crate::error::{MapError, Result};


const GEO_KEY_RASTER_TYPE: u16 = 1025;
const GEO_KEY_GEOGRAPHIC_TYPE: u16 = 2048;
const GEO_KEY_PROJECTED_CS_TYPE: u16 = 3072;
const RASTER_PIXEL_IS_POINT: u16 = 2;
/// GeoKey value meaning "user defined", which we cannot reproject into.
const USER_DEFINED: u16 = 32767;

#[derive(Debug, Clone, PartialEq)]
pub struct RasterMetadata {
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub no_data: Option<f32>,
    /// EPSG code of the raster's reference system, if the file declares one.
    pub epsg: Option<u16>,
}

/// Network traffic of a remote raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    /// bytes fetched so far
    pub downloaded: u64,
    /// size of the remote file
    pub total: u64,
}

/// Anything that can hand out rectangular pieces of a single band elevation
/// raster without loading all of it.
pub trait RasterSource {
    fn metadata(&self) -> &RasterMetadata;

    /// `None` for local rasters.
    fn transfer(&self) -> Option<Transfer> {
        None
    }

    /// Human readable location, used in progress output and errors.
    fn location(&self) -> &str;

    /// Reads `window`, which must lie inside the raster.
    fn read_window(&mut self, window: &Window) -> Result<ElevationGrid>;
}

struct DecodedChunk {
    width: usize,
    height: usize,
    stride: usize,
    samples: Vec<f32>,
}

/// GeoTIFF reader decoding only the strips or tiles a window touches.
pub struct GeoTiffSource<R: Read + Seek> {
    decoder: Decoder<R>,
    location: String,
    metadata: RasterMetadata,
    chunk_width: usize,
    chunk_height: usize,
    chunks_across: usize,
    /// decoded chunks of the chunk row the last read ended in
    cache: HashMap<u32, Rc<DecodedChunk>>,
    /// download counter and file size of a remote raster
    remote: Option<(Rc<Cell<u64>>, u64)>,
}

impl GeoTiffSource<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        GeoTiffSource::from_reader(BufReader::new(file), path.display().to_string())
    }
}

impl GeoTiffSource<HttpRangeReader> {
    pub fn open_url(url: &str) -> Result<Self> {
        let reader = HttpRangeReader::open(url)?;
        let location = reader.url().to_string();
        let remote = (reader.downloaded(), reader.len());

        let mut source = GeoTiffSource::from_reader(reader, location)?;
        source.remote = Some(remote);
        Ok(source)
    }
}

/// Opens a local path or a remote (`http(s)://`, `/vsicurl/`) raster.
pub fn open_source(location: &str) -> Result<Box<dyn RasterSource>> {
    if HttpRangeReader::is_remote(location) {
        Ok(Box::new(GeoTiffSource::open_url(location)?))
    } else {
        Ok(Box::new(GeoTiffSource::open(Path::new(location))?))
    }
}

impl<R: Read + Seek> GeoTiffSource<R> {
    pub fn from_reader(reader: R, location: String) -> Result<Self> {
        // offset tables of huge rasters are larger than the default limits allow
        let mut decoder = Decoder::new(reader)
            .map_err(map_tiff_error)?
            .with_limits(Limits::unlimited());

        match decoder.colortype().map_err(map_tiff_error)? {
            ColorType::Gray(_) => {}
            other => {
                return Err(MapError::InvalidRaster(format!(
                    "{} is not a single band raster ({:?})",
                    location, other
                )))
            }
        }

        let (width, height) = decoder.dimensions().map_err(map_tiff_error)?;
        let geo_keys = match decoder.find_tag(Tag::GeoKeyDirectoryTag).map_err(map_tiff_error)? {
            Some(value) => parse_geo_keys(&value.into_u16_vec().map_err(map_tiff_error)?),
            None => HashMap::new(),
        };
        let transform = read_transform(&mut decoder, &geo_keys)?;
        let no_data = read_no_data(&mut decoder)?;
        let epsg = geo_keys
            .get(&GEO_KEY_PROJECTED_CS_TYPE)
            .or_else(|| geo_keys.get(&GEO_KEY_GEOGRAPHIC_TYPE))
            .copied()
            .filter(|code| *code != 0 && *code != USER_DEFINED);

        let (chunk_width, chunk_height) = decoder.chunk_dimensions();
        let chunk_width = chunk_width.max(1) as usize;
        let chunk_height = chunk_height.max(1) as usize;
        let chunks_across = (width as usize + chunk_width - 1) / chunk_width;

        tracing::debug!(
            %location,
            width,
            height,
            chunk_width,
            chunk_height,
            ?epsg,
            "opened GeoTIFF"
        );

        Ok(GeoTiffSource {
            decoder,
            location,
            metadata: RasterMetadata {
                width: width as usize,
                height: height as usize,
                transform,
                no_data,
                epsg,
            },
            chunk_width,
            chunk_height,
            chunks_across,
            cache: HashMap::new(),
            remote: None,
        })
    }

    fn chunk(&mut self, index: u32) -> Result<Rc<DecodedChunk>> {
        if let Some(chunk) = self.cache.get(&index) {
            return Ok(Rc::clone(chunk));
        }

        let (width, height) = self.decoder.chunk_data_dimensions(index);
        let samples = to_f32(self.decoder.read_chunk(index).map_err(map_tiff_error)?);
        let height = (height as usize).max(1);
        let chunk = Rc::new(DecodedChunk {
            width: width as usize,
            height,
            stride: samples.len() / height,
            samples,
        });
        self.cache.insert(index, Rc::clone(&chunk));

        Ok(chunk)
    }

    #[cfg(test)]
    fn cached_chunks(&self) -> usize {
        self.cache.len()
    }
}

impl<R: Read + Seek> RasterSource for GeoTiffSource<R> {
    fn metadata(&self) -> &RasterMetadata {
        &self.metadata
    }

    fn location(&self) -> &str {
        &self.location
    }

    fn transfer(&self) -> Option<Transfer> {
        self.remote.as_ref().map(|(downloaded, total)| Transfer {
            downloaded: downloaded.get(),
            total: *total,
        })
    }

    fn read_window(&mut self, window: &Window) -> Result<ElevationGrid> {
        let meta = self.metadata.clone();
        if window.col_off < 0
            || window.row_off < 0
            || window.col_end() > meta.width as i64
            || window.row_end() > meta.height as i64
            || window.pixel_count() == 0
        {
            return Err(MapError::InvalidRaster(format!(
                "window {} is not inside the {}x{} raster {}",
                window, meta.width, meta.height, self.location
            )));
        }

        let col_start = window.col_start();
        let row_start = window.row_start();
        let col_end = col_start + window.width;
        let row_end = row_start + window.height;
        let mut values = vec![meta.no_data.unwrap_or(f32::NAN); window.pixel_count()];

        let chunk_cols = col_start / self.chunk_width..=(col_end - 1) / self.chunk_width;
        let across = self.chunks_across;

        for chunk_row in row_start / self.chunk_height..=(row_end - 1) / self.chunk_height {
            // band-wise reads revisit the current chunk row, nothing else is reused
            self.cache.retain(|index, _| {
                let index = *index as usize;
                index / across == chunk_row && chunk_cols.contains(&(index % across))
            });

            for chunk_col in chunk_cols.clone() {
                let index = (chunk_row * self.chunks_across + chunk_col) as u32;
                let chunk = self.chunk(index)?;

                let chunk_x = chunk_col * self.chunk_width;
                let chunk_y = chunk_row * self.chunk_height;
                let x0 = col_start.max(chunk_x);
                let x1 = col_end.min(chunk_x + chunk.width);
                let y0 = row_start.max(chunk_y);
                let y1 = row_end.min(chunk_y + chunk.height);

                for y in y0..y1 {
                    let src = (y - chunk_y) * chunk.stride + (x0 - chunk_x);
                    let dst = (y - row_start) * window.width + (x0 - col_start);
                    values[dst..dst + (x1 - x0)].copy_from_slice(&chunk.samples[src..src + (x1 - x0)]);
                }
            }
        }

        ElevationGrid::from_values(
            window.width,
            window.height,
            meta.transform.translated(col_start, row_start),
            meta.no_data,
            values,
        )
    }
}

/// Key id -> short value of a GeoKeyDirectory. Keys stored in other tags are skipped.
pub(crate) fn parse_geo_keys(directory: &[u16]) -> HashMap<u16, u16> {
    let mut keys = HashMap::new();
    if directory.len() < 4 {
        return keys;
    }

    let count = directory[3] as usize;
    if directory.len() < 4 + count * 4 {
        return keys;
    }

    for entry in directory[4..4 + count * 4].chunks(4) {
        if entry[1] == 0 {
            keys.insert(entry[0], entry[3]);
        }
    }

    keys
}

fn read_transform<R: Read + Seek>(decoder: &mut Decoder<R>, geo_keys: &HashMap<u16, u16>) -> Result<GeoTransform> {
    if let Some(value) = decoder.find_tag(Tag::ModelTransformationTag).map_err(map_tiff_error)? {
        let m = value.into_f64_vec().map_err(map_tiff_error)?;
        if m.len() >= 8 {
            return Ok(GeoTransform::new(m[0], m[1], m[3], m[4], m[5], m[7]));
        }
    }

    let tiepoint = decoder.find_tag(Tag::ModelTiepointTag).map_err(map_tiff_error)?;
    let scale = decoder.find_tag(Tag::ModelPixelScaleTag).map_err(map_tiff_error)?;

    match (tiepoint, scale) {
        (Some(tiepoint), Some(scale)) => {
            let tiepoint = tiepoint.into_f64_vec().map_err(map_tiff_error)?;
            let scale = scale.into_f64_vec().map_err(map_tiff_error)?;
            if tiepoint.len() < 6 || scale.len() < 2 {
                return Err(MapError::InvalidRaster(
                    "malformed ModelTiepoint/ModelPixelScale tags".to_string(),
                ));
            }

            // tiepoint: [i, j, k, x, y, z], pixel (i, j) sits at planar (x, y)
            let (sx, sy) = (scale[0], scale[1]);
            let mut left = tiepoint[3] - tiepoint[0] * sx;
            let mut top = tiepoint[4] + tiepoint[1] * sy;

            if geo_keys.get(&GEO_KEY_RASTER_TYPE) == Some(&RASTER_PIXEL_IS_POINT) {
                left -= sx / 2.0;
                top += sy / 2.0;
            }

            Ok(GeoTransform::new(sx, 0.0, left, 0.0, -sy, top))
        }
        // no georeferencing at all: plain pixel space, y pointing down
        _ => Ok(GeoTransform::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0)),
    }
}

fn read_no_data<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Option<f32>> {
    match decoder.find_tag(Tag::GdalNodata).map_err(map_tiff_error)? {
        Some(value) => {
            let text = value.into_string().map_err(map_tiff_error)?;
            let text = text.trim_matches(char::from(0)).trim();
            if text.eq_ignore_ascii_case("nan") {
                return Ok(None);
            }
            text.parse::<f32>().map(Some).map_err(|_| {
                MapError::InvalidRaster(format!("unparsable GDAL_NODATA value '{}'", text))
            })
        }
        None => Ok(None),
    }
}

fn to_f32(result: DecodingResult) -> Vec<f32> {
    match result {
        DecodingResult::F32(data) => data,
        DecodingResult::F64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I8(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I16(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U8(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U16(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U64(data) => data.into_iter().map(|v| v as f32).collect(),
    }
}

/// Transport failures travel through the decoder as I/O errors; unwrap them
/// again so they surface as such.
pub(crate) fn map_tiff_error(e: TiffError) -> MapError {
    match e {
        TiffError::IoError(io) => {
            let transport = io
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<TransportFailure>())
                .map(|t| MapError::Transport {
                    url: t.url.clone(),
                    reason: t.reason.clone(),
                });
            transport.unwrap_or(MapError::Io(io))
        }
        other => MapError::Tiff(other),
    }
}

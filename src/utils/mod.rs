use image::{codecs::png::PngEncoder, DynamicImage, GenericImageView};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{MapError, Result, Stage};


pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Writes through `<path>.partial` and renames once `write` succeeded, so a
/// failed write never leaves a truncated file at `path`. Returns the size of
/// the finished file.
pub fn write_atomically<F>(path: &Path, stage: Stage, write: F) -> Result<u64>
where
    F: FnOnce(&mut BufWriter<File>) -> std::result::Result<(), BoxedError>,
{
    let partial = partial_path(path);
    let write_error = |reason: String| MapError::Write {
        stage,
        path: path.to_path_buf(),
        reason,
    };

    let result = File::create(&partial)
        .map_err(|e| write_error(e.to_string()))
        .and_then(|file| {
            let mut buf = BufWriter::new(file);
            write(&mut buf).map_err(|e| write_error(e.to_string()))?;
            buf.flush().map_err(|e| write_error(e.to_string()))
        })
        .and_then(|_| fs::rename(&partial, path).map_err(|e| write_error(e.to_string())));

    if let Err(e) = result {
        // nothing useful to report if the partial file is already gone
        let _ = fs::remove_file(&partial);
        return Err(e);
    }

    Ok(fs::metadata(path)?.len())
}

pub(crate) fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

pub fn encode_png(file_path: &Path, img: &DynamicImage) -> Result<u64> {
    write_atomically(file_path, Stage::Render, |buf| {
        let encoder = PngEncoder::new(buf);
        let dim = img.dimensions();
        encoder.encode(&img.to_bytes(), dim.0, dim.1, img.color())?;
        Ok(())
    })
}

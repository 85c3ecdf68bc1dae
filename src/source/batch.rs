use crate::error::SourceError;
use crate::frame::Frame;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, trace};

/// Decode collaborator turning one file into a frame
pub trait FrameDecoder: Send + Sync {
    fn decode(&self, id: u64, path: &Path) -> Result<Frame, SourceError>;
}

/// Decodes any format the `image` crate reads and converts it to 8-bit luminance
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageFileDecoder;

impl FrameDecoder for ImageFileDecoder {
    fn decode(&self, id: u64, path: &Path) -> Result<Frame, SourceError> {
        let image = image::open(path).map_err(|e| SourceError::Decode {
            path: path.to_path_buf(),
            details: e.to_string(),
        })?;

        let luma = image.to_luma8();
        let (width, height) = luma.dimensions();
        trace!("Decoded {} ({}x{})", path.display(), width, height);

        let timestamp = std::fs::metadata(path)
            .and_then(|meta| meta.modified())
            .unwrap_or_else(|_| SystemTime::now());

        Frame::from_luma8(id, timestamp, width, height, luma.as_raw()).map_err(|e| {
            SourceError::Decode {
                path: path.to_path_buf(),
                details: e.to_string(),
            }
        })
    }
}

/// Finite, ordered collection of image files. Frame ids follow path order.
#[derive(Debug, Clone, Default)]
pub struct BatchSource {
    paths: Vec<PathBuf>,
}

impl BatchSource {
    /// Recursively collect files under `dir` whose extension matches one of
    /// `extensions` (case-insensitive, leading dot optional)
    pub fn from_dir<P: AsRef<Path>>(dir: P, extensions: &[String]) -> Result<Self, SourceError> {
        let dir = dir.as_ref();
        let wanted: Vec<String> = extensions
            .iter()
            .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
            .collect();

        let mut paths = Vec::new();
        collect_files(dir, &wanted, &mut paths)?;
        paths.sort();

        info!(
            "Found {} image files under {} ({})",
            paths.len(),
            dir.display(),
            wanted.join(", ")
        );
        Ok(Self { paths })
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Decode files on the current rayon pool, in no particular completion order
    pub fn par_frames<'a>(
        &'a self,
        decoder: &'a dyn FrameDecoder,
    ) -> impl ParallelIterator<Item = Result<Frame, SourceError>> + 'a {
        self.paths
            .par_iter()
            .enumerate()
            .map(move |(id, path)| decoder.decode(id as u64, path))
    }
}

fn collect_files(dir: &Path, extensions: &[String], out: &mut Vec<PathBuf>) -> Result<(), SourceError> {
    let entries = std::fs::read_dir(dir).map_err(|source| SourceError::DirectoryRead {
        path: dir.to_path_buf(),
        source,
    })?;

    for entry in entries {
        let entry = entry.map_err(|source| SourceError::DirectoryRead {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();

        if path.is_dir() {
            collect_files(&path, extensions, out)?;
            continue;
        }

        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| extensions.iter().any(|wanted| ext.eq_ignore_ascii_case(wanted)))
            .unwrap_or(false);

        if matches {
            out.push(path);
        } else {
            debug!("Ignoring {}", path.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};
    use std::fs;

    fn write_gray(path: &Path, width: u32, height: u32, value: u8) {
        GrayImage::from_fn(width, height, |_, _| Luma([value]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn test_directory_walk_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("b.bmp"), b"x").unwrap();
        fs::write(dir.path().join("a.BMP"), b"x").unwrap();
        fs::write(dir.path().join("nested").join("c.bmp"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        fs::write(dir.path().join("d.png"), b"x").unwrap();

        let source = BatchSource::from_dir(dir.path(), &["bmp".to_string()]).unwrap();
        let names: Vec<_> = source
            .paths()
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();

        assert_eq!(
            names,
            vec![
                PathBuf::from("a.BMP"),
                PathBuf::from("b.bmp"),
                PathBuf::from("nested").join("c.bmp"),
            ]
        );

        let both = BatchSource::from_dir(dir.path(), &[".png".to_string(), "bmp".to_string()])
            .unwrap();
        assert_eq!(both.len(), 4);
    }

    #[test]
    fn test_missing_directory() {
        let err = BatchSource::from_dir("/nonexistent/ioncount", &["bmp".to_string()]).unwrap_err();
        assert!(matches!(err, SourceError::DirectoryRead { .. }));
    }

    #[test]
    fn test_decode_converts_to_luminance() {
        let dir = tempfile::tempdir().unwrap();
        let gray = dir.path().join("gray.png");
        let color = dir.path().join("color.png");
        write_gray(&gray, 5, 3, 200);
        RgbImage::from_fn(4, 2, |_, _| Rgb([255, 255, 255]))
            .save(&color)
            .unwrap();

        let frame = ImageFileDecoder.decode(3, &gray).unwrap();
        assert_eq!(frame.id, 3);
        assert_eq!(frame.shape(), (3, 5));
        assert!(frame.pixels().iter().all(|&v| v == 200.0));

        let frame = ImageFileDecoder.decode(4, &color).unwrap();
        assert_eq!(frame.shape(), (2, 4));
        assert!(frame.pixels().iter().all(|&v| v == 255.0));
    }

    #[test]
    fn test_decode_bmp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.bmp");
        write_gray(&path, 8, 6, 90);

        let frame = ImageFileDecoder.decode(0, &path).unwrap();
        assert_eq!(frame.shape(), (6, 8));
        assert_eq!(frame.pixels()[[5, 7]], 90.0);
    }

    #[test]
    fn test_decode_failure_is_reported_per_file() {
        let dir = tempfile::tempdir().unwrap();
        write_gray(&dir.path().join("0.png"), 4, 4, 1);
        fs::write(dir.path().join("1.png"), b"not an image").unwrap();
        write_gray(&dir.path().join("2.png"), 4, 4, 2);

        let source = BatchSource::from_dir(dir.path(), &["png".to_string()]).unwrap();
        let results: Vec<_> = source.par_frames(&ImageFileDecoder).collect();
        assert_eq!(results.len(), 3);

        let mut ids: Vec<u64> = results
            .iter()
            .filter_map(|result| result.as_ref().ok().map(|frame| frame.id))
            .collect();
        ids.sort();
        assert_eq!(ids, vec![0, 2]);

        let failures: Vec<_> = results.iter().filter_map(|result| result.as_ref().err()).collect();
        assert_eq!(failures.len(), 1);
        match failures[0] {
            SourceError::Decode { path, .. } => assert!(path.ends_with("1.png")),
            other => panic!("expected decode error, got {}", other),
        }
    }

    #[test]
    fn test_parallel_frames_cover_every_path() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..12u8 {
            write_gray(&dir.path().join(format!("{:02}.png", i)), 6, 6, i);
        }

        let source = BatchSource::from_dir(dir.path(), &["png".to_string()]).unwrap();
        let mut ids: Vec<u64> = source
            .par_frames(&ImageFileDecoder)
            .map(|frame| frame.unwrap().id)
            .collect();
        ids.sort();

        assert_eq!(ids, (0..12).collect::<Vec<_>>());
    }
}

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use image::RgbImage;
use std::fs;
use std::path::PathBuf;

use crate::render::encode_jpeg;

const SCREENSHOT_QUALITY: u8 = 90;

/// Writes alert screenshots as `detection_<YYYYmmdd_HHMMSS>.jpg`.
#[derive(Clone, Debug)]
pub struct ScreenshotStore {
    dir: PathBuf,
}

impl ScreenshotStore {
    /// Creates the directory if it does not exist.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("create screenshot dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, at: &DateTime<Local>) -> PathBuf {
        self.dir
            .join(format!("detection_{}.jpg", at.format("%Y%m%d_%H%M%S")))
    }

    pub fn save(&self, image: &RgbImage, at: &DateTime<Local>) -> Result<PathBuf> {
        let path = self.path_for(at);
        let jpeg = encode_jpeg(image, SCREENSHOT_QUALITY)?;
        fs::write(&path, jpeg).with_context(|| format!("write screenshot {}", path.display()))?;
        log::info!("screenshot saved to {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn saves_timestamped_jpeg_in_created_dir() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let store = ScreenshotStore::new(temp.path().join("shots/nested"))?;
        let at = Local
            .with_ymd_and_hms(2024, 3, 9, 14, 5, 7)
            .single()
            .context("unambiguous local time")?;

        let path = store.save(&RgbImage::new(16, 8), &at)?;
        assert_eq!(
            path.file_name().and_then(|name| name.to_str()),
            Some("detection_20240309_140507.jpg")
        );
        let bytes = fs::read(&path)?;
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        Ok(())
    }
}

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::hal::FirmwareSource;

/// Reads container images from a firmware directory
pub struct FileFirmwareSource {
    dir: PathBuf,
}

impl FileFirmwareSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn resolve(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        if name.is_empty() || relative.components().count() != 1 || relative.is_absolute() {
            return Err(anyhow!("invalid firmware name {:?}", name));
        }
        Ok(self.dir.join(relative))
    }
}

#[async_trait]
impl FirmwareSource for FileFirmwareSource {
    async fn fetch(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.resolve(name)?;

        tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let file = File::open(&path)
                .context(format!("Failed to open firmware {:?}", path))?;
            let len = file.metadata()?.len();
            if len == 0 {
                return Err(anyhow!("firmware {:?} is empty", path));
            }
            let map = unsafe { Mmap::map(&file) }
                .context(format!("Failed to map firmware {:?}", path))?;
            Ok(map.to_vec())
        })
        .await
        .context("firmware read task panicked")?
    }
}

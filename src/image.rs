// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Sequential sink for accepted payloads. Truncates any previous image.
pub struct ImageWriter {
    path: PathBuf,
    file: BufWriter<File>,
    written: u64,
}

impl ImageWriter {
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(ImageWriter {
            path: path.to_path_buf(),
            file: BufWriter::new(file),
            written: 0,
        })
    }

    pub fn append(&mut self, payload: &[u8]) -> io::Result<()> {
        self.file.write_all(payload)?;
        self.written += payload.len() as u64;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes and closes the image, returning its size.
    pub fn finish(self) -> io::Result<u64> {
        let file = self.file.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(self.written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_in_order() {
        let dir = tempfile::tempdir().expect("Should create temp dir");
        let path = dir.path().join("disk.img");

        let mut image = ImageWriter::create(&path).expect("Should create image");
        image.append(b"first ").unwrap();
        image.append(b"").unwrap();
        image.append(b"second").unwrap();
        assert_eq!(image.written(), 12);
        assert_eq!(image.path(), path.as_path());
        assert_eq!(image.finish().unwrap(), 12);

        assert_eq!(std::fs::read(&path).unwrap(), b"first second");
    }

    #[test]
    fn test_create_truncates_previous_image() {
        let dir = tempfile::tempdir().expect("Should create temp dir");
        let path = dir.path().join("disk.img");
        std::fs::write(&path, b"stale contents from an older dump").unwrap();

        let mut image = ImageWriter::create(&path).unwrap();
        image.append(b"new").unwrap();
        image.finish().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"new");
    }
}

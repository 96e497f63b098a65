//! Release archive extraction (tar.gz and zip).
//!
//! Both run on the blocking pool. Entries whose paths would land outside
//! the destination directory are skipped by the underlying crates.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use tracing::info;

/// Stream-gunzip and untar `archive` into `dest_dir`.
pub async fn extract_tar_gz(archive: &Path, dest_dir: &Path) -> io::Result<()> {
    let (archive, dest_dir) = owned(archive, dest_dir);
    run_blocking(move || {
        std::fs::create_dir_all(&dest_dir)?;
        let gz = GzDecoder::new(File::open(&archive)?);
        let mut tar = Archive::new(gz);
        tar.set_preserve_permissions(true);
        tar.unpack(&dest_dir)?;
        info!(archive = %archive.display(), dest = %dest_dir.display(), "Extracted tar.gz");
        Ok(())
    })
    .await
}

/// Unpack a zip `archive` into `dest_dir`.
pub async fn extract_zip(archive: &Path, dest_dir: &Path) -> io::Result<()> {
    let (archive, dest_dir) = owned(archive, dest_dir);
    run_blocking(move || {
        std::fs::create_dir_all(&dest_dir)?;
        let mut zip = zip::ZipArchive::new(File::open(&archive)?)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        zip.extract(&dest_dir)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        info!(archive = %archive.display(), dest = %dest_dir.display(), "Extracted zip");
        Ok(())
    })
    .await
}

fn owned(archive: &Path, dest_dir: &Path) -> (PathBuf, PathBuf) {
    (archive.to_path_buf(), dest_dir.to_path_buf())
}

async fn run_blocking<F>(f: F) -> io::Result<()>
where
    F: FnOnce() -> io::Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn write_tar_gz(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[tokio::test]
    async fn test_extract_tar_gz() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("piper.tar.gz");
        write_tar_gz(
            &archive,
            &[("piper/piper", b"#!/bin/sh\n"), ("piper/libpiper.so", b"lib")],
        );

        let out = dir.path().join("out");
        extract_tar_gz(&archive, &out).await.unwrap();
        assert_eq!(std::fs::read(out.join("piper/piper")).unwrap(), b"#!/bin/sh\n");
        assert!(out.join("piper/libpiper.so").exists());
    }

    #[tokio::test]
    async fn test_extract_zip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("piper.zip");
        {
            let mut zip = zip::ZipWriter::new(File::create(&archive).unwrap());
            let options = zip::write::SimpleFileOptions::default();
            zip.start_file("piper/piper.exe", options).unwrap();
            zip.write_all(b"MZ").unwrap();
            zip.finish().unwrap();
        }

        let out = dir.path().join("out");
        extract_zip(&archive, &out).await.unwrap();
        assert_eq!(std::fs::read(out.join("piper/piper.exe")).unwrap(), b"MZ");
    }

    #[tokio::test]
    async fn test_corrupt_archive_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bad.tar.gz");
        std::fs::write(&archive, b"definitely not gzip").unwrap();
        assert!(extract_tar_gz(&archive, &dir.path().join("out")).await.is_err());

        let archive = dir.path().join("bad.zip");
        std::fs::write(&archive, b"definitely not zip").unwrap();
        assert!(extract_zip(&archive, &dir.path().join("out")).await.is_err());
    }
}

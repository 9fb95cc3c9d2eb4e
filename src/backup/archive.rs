// s3-db-backup/src/backup/archive.rs
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{AesMode, CompressionMethod, ZipWriter};

use crate::config::ArchiveFormat;
use crate::errors::{AppError, Result};

/// Packages a finished dump for upload.
#[derive(Clone)]
pub struct Archiver {
    format: ArchiveFormat,
    passphrase: Option<String>,
}

impl Archiver {
    pub fn new(format: ArchiveFormat, passphrase: Option<String>) -> Self {
        Archiver { format, passphrase }
    }

    pub fn extension(&self) -> &'static str {
        self.format.extension()
    }

    /// Packages `input` into `output_dir` as `<stem>.<extension>` and removes `input`.
    ///
    /// Inside a zip the dump is stored as `entry_name`.
    pub fn archive(&self, input: &Path, output_dir: &Path, stem: &str, entry_name: &str) -> Result<PathBuf> {
        let output = output_dir.join(format!("{}.{}", stem, self.extension()));
        let wrap = |e: &dyn std::fmt::Display| AppError::Archive {
            path: output.display().to_string(),
            message: e.to_string(),
        };

        match self.format {
            ArchiveFormat::Zip => self.write_zip(input, &output, entry_name).map_err(|e| wrap(&e))?,
            ArchiveFormat::Gzip => write_gzip(input, &output).map_err(|e| wrap(&e))?,
            ArchiveFormat::None => {
                fs::rename(input, &output).map_err(|e| wrap(&e))?;
                return Ok(output);
            }
        }

        fs::remove_file(input).map_err(|e| wrap(&e))?;
        debug!(archive = %output.display(), "Dump archived");
        Ok(output)
    }

    fn write_zip(&self, input: &Path, output: &Path, entry_name: &str) -> Result<()> {
        let mut reader = BufReader::new(File::open(input)?);
        let mut zip = ZipWriter::new(BufWriter::new(File::create(output)?));

        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(true);
        match &self.passphrase {
            Some(passphrase) => {
                zip.start_file(entry_name, options.with_aes_encryption(AesMode::Aes256, passphrase))?
            }
            None => zip.start_file(entry_name, options)?,
        }

        io::copy(&mut reader, &mut zip)?;
        zip.finish()?.flush()?;
        Ok(())
    }
}

fn write_gzip(input: &Path, output: &Path) -> io::Result<()> {
    let mut reader = BufReader::new(File::open(input)?);
    let mut encoder = GzEncoder::new(BufWriter::new(File::create(output)?), Compression::default());
    io::copy(&mut reader, &mut encoder)?;
    encoder.finish()?.flush()
}

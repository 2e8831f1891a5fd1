use crate::backup::archive::{ArchiveEntry, EntryKind};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;

use zip::write::{FileOptions, SimpleFileOptions};
use zip::{AesMode, CompressionMethod, ZipArchive, ZipWriter};

use std::collections::HashSet;
use std::fs::File;
use std::io::{Seek, Write};
use std::path::Path;

/// Entries at or above this size need zip64 headers
static LARGE_FILE_THRESHOLD: u64 = u32::MAX as u64;

/// Writes archive entries into a zip stream, all with the same options
///
/// With a password every entry is AES-256 encrypted using that password.
pub struct ZipEntryWriter<'k, W: Write + Seek> {
    zip: ZipWriter<W>,
    options: FileOptions<'k, ()>,
    encrypted: bool,
    names: Vec<String>,
    seen: HashSet<String>,
}

impl<'k, W: Write + Seek> ZipEntryWriter<'k, W> {
    pub fn new(writer: W, password: Option<&'k str>) -> Self {
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let options = match password {
            Some(password) => {
                tracing::debug!("Entries will be encrypted with AES-256");
                options.with_aes_encryption(AesMode::Aes256, password)
            }
            None => options,
        };

        Self {
            zip: ZipWriter::new(writer),
            options,
            encrypted: password.is_some(),
            names: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Adds one entry; a name that was already written is skipped.
    pub fn add(&mut self, entry: &ArchiveEntry) -> Result<()> {
        let name = entry.entry_name();
        if !self.seen.insert(name.clone()) {
            tracing::warn!("Skipping duplicate archive entry {:?} from {:?}", name, entry.src);
            return Ok(());
        }

        match entry.kind {
            EntryKind::File => {
                let mut src = File::open(&entry.src)
                    .map_err(Error::from)
                    .add_msg(format!("Cannot open {:?}", entry.src))?;
                let size = src.metadata()?.len();
                let options = self.options.clone().large_file(size >= LARGE_FILE_THRESHOLD);
                self.zip
                    .start_file(name.as_str(), options)
                    .map_err(Error::from)
                    .add_msg(format!("Cannot add entry {:?}", name))?;
                std::io::copy(&mut src, &mut self.zip)
                    .map_err(Error::from)
                    .add_msg(format!("Cannot write entry {:?}", name))?;
            }
            // add_directory drops the AES extra field, an empty entry named `dir/` keeps it
            EntryKind::Directory if self.encrypted => {
                self.zip
                    .start_file(name.as_str(), self.options.clone())
                    .map_err(Error::from)
                    .add_msg(format!("Cannot add directory entry {:?}", name))?;
            }
            EntryKind::Directory => {
                self.zip
                    .add_directory(name.as_str(), self.options.clone())
                    .map_err(Error::from)
                    .add_msg(format!("Cannot add directory entry {:?}", name))?;
            }
        }

        tracing::trace!("Archived {:?} as {:?}", entry.src, name);
        self.names.push(name);
        Ok(())
    }

    /// Writes the central directory and returns the inner writer with the entry names.
    pub fn finish(self) -> Result<(W, Vec<String>)> {
        let inner = self.zip.finish()?;
        Ok((inner, self.names))
    }
}

/// Lists `(name, encrypted)` for every entry in the zip at `path`, in archive order.
pub fn read_entries<P: AsRef<Path>>(path: P) -> Result<Vec<(String, bool)>> {
    let mut archive = ZipArchive::new(File::open(path.as_ref())?)?;
    (0..archive.len())
        .map(|i| -> Result<(String, bool)> {
            let file = archive.by_index_raw(i)?;
            Ok((file.name().to_string(), file.encrypted()))
        })
        .collect()
}

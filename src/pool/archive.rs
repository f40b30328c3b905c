use crate::jvm::Error;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use walkdir::WalkDir;
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const CLASS_SUFFIX: &str = ".class";

/// Class file entry, as found in a container
pub struct ClassEntry {
    /// Where the entry was found (archive entry name, or path relative to the root directory)
    pub location: String,
    pub bytes: Vec<u8>,
}

fn check_exists(path: &Path) -> Result<(), Error> {
    if path.exists() {
        Ok(())
    } else {
        Err(Error::NotFound(path.to_path_buf()))
    }
}

/// Entries read from a container, up to the first one that could not be read
pub struct ClassEntries {
    pub entries: Vec<ClassEntry>,

    /// Why reading stopped before the end of the container
    pub failure: Option<Error>,
}

impl ClassEntries {
    fn new() -> ClassEntries {
        ClassEntries {
            entries: vec![],
            failure: None,
        }
    }

    /// All entries, or the error that cut reading short
    pub fn into_result(self) -> Result<Vec<ClassEntry>, Error> {
        match self.failure {
            Some(err) => Err(err),
            None => Ok(self.entries),
        }
    }
}

/// Read the `.class` entries of a JAR or ZIP archive, in archive order
///
/// Failing to open the archive is an error. An entry that cannot be read (bad checksum, broken
/// compressed data) ends reading, with the entries before it kept.
pub fn read_archive(path: &Path) -> Result<ClassEntries, Error> {
    check_exists(path)?;
    let mut archive = ZipArchive::new(File::open(path)?)?;
    let mut read = ClassEntries::new();
    for idx in 0..archive.len() {
        match read_archive_class(&mut archive, idx) {
            Ok(Some(entry)) => {
                log::trace!(
                    "Read '{}' ({} bytes) from '{}'",
                    entry.location,
                    entry.bytes.len(),
                    path.display()
                );
                read.entries.push(entry);
            }
            Ok(None) => (),
            Err(err) => {
                log::warn!("Stopped reading '{}' at entry {}: {:?}", path.display(), idx, err);
                read.failure = Some(err);
                break;
            }
        }
    }
    Ok(read)
}

fn read_archive_class(
    archive: &mut ZipArchive<File>,
    idx: usize,
) -> Result<Option<ClassEntry>, Error> {
    let mut file = archive.by_index(idx)?;
    if !file.is_file() || !file.name().ends_with(CLASS_SUFFIX) {
        return Ok(None);
    }
    let location = file.name().to_string();
    let mut bytes = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut bytes).map_err(|err| corrupt_entry(&location, err))?;
    Ok(Some(ClassEntry { location, bytes }))
}

/// The archive itself was readable, so a failure decompressing an entry means the entry is broken
fn corrupt_entry(location: &str, err: std::io::Error) -> Error {
    Error::ArchiveFormat(format!("{}: {}", location, err))
}

/// Read one class out of an archive, if the archive has it
pub fn read_archive_entry(path: &Path, class_name: &str) -> Result<Option<Vec<u8>>, Error> {
    check_exists(path)?;
    let mut archive = ZipArchive::new(File::open(path)?)?;
    let entry_name = format!("{}{}", class_name, CLASS_SUFFIX);
    let mut file = match archive.by_name(&entry_name) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let mut bytes = vec![];
    file.read_to_end(&mut bytes).map_err(|err| corrupt_entry(&entry_name, err))?;
    Ok(Some(bytes))
}

/// Read every `.class` file under a directory tree, sorted by path
///
/// Like [`read_archive`], a file that cannot be read ends reading with the earlier files kept.
pub fn read_directory(root: &Path) -> Result<ClassEntries, Error> {
    check_exists(root)?;
    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()));

    let mut read = ClassEntries::new();
    for entry in walker {
        match read_directory_class(root, entry) {
            Ok(Some(entry)) => read.entries.push(entry),
            Ok(None) => (),
            Err(err) => {
                log::warn!("Stopped reading '{}': {:?}", root.display(), err);
                read.failure = Some(err);
                break;
            }
        }
    }
    Ok(read)
}

fn read_directory_class(
    root: &Path,
    entry: walkdir::Result<walkdir::DirEntry>,
) -> Result<Option<ClassEntry>, Error> {
    let entry = entry?;
    let is_class = entry
        .path()
        .extension()
        .map_or(false, |extension| extension == "class");
    if !entry.file_type().is_file() || !is_class {
        return Ok(None);
    }
    let location = entry
        .path()
        .strip_prefix(root)
        .unwrap_or_else(|_| entry.path())
        .to_string_lossy()
        .into_owned();
    let bytes = fs::read(entry.path())?;
    log::trace!("Read '{}' ({} bytes)", entry.path().display(), bytes.len());
    Ok(Some(ClassEntry { location, bytes }))
}

/// Create (or truncate) an archive with one `<name>.class` entry per class
pub fn write_archive<'a, I>(path: &Path, classes: I) -> Result<(), Error>
where
    I: IntoIterator<Item = (&'a str, Vec<u8>)>,
{
    let mut writer = ZipWriter::new(File::create(path)?);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, bytes) in classes {
        writer.start_file(format!("{}{}", name, CLASS_SUFFIX), options)?;
        writer.write_all(&bytes)?;
    }
    writer.finish()?;
    Ok(())
}

/// Write `<root>/<name>.class` for every class, creating package directories as needed
pub fn write_directory<'a, I>(root: &Path, classes: I) -> Result<(), Error>
where
    I: IntoIterator<Item = (&'a str, Vec<u8>)>,
{
    for (name, bytes) in classes {
        let path = root.join(format!("{}{}", name, CLASS_SUFFIX));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
    }
    Ok(())
}

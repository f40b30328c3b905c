use super::archive;
use crate::jvm::class_file::ClassReader;
use crate::jvm::Error;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

/// Class that has been defined by a loader
#[derive(Debug, PartialEq, Eq)]
pub struct LoadedClass {
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,

    /// Class file the definition came from
    pub bytes: Vec<u8>,
}

impl LoadedClass {
    /// Define a class from its class file, reading only the header
    pub fn define(bytes: Vec<u8>) -> Result<LoadedClass, Error> {
        let reader = ClassReader::new(&bytes)?;
        let name = reader.name()?.to_string();
        let super_name = reader.super_name()?.map(String::from);
        let interfaces = reader.interfaces()?;
        Ok(LoadedClass {
            name,
            super_name,
            interfaces,
            bytes,
        })
    }

    fn define_named(name: &str, bytes: Vec<u8>) -> Result<LoadedClass, Error> {
        let class = LoadedClass::define(bytes)?;
        if class.name != name {
            return Err(Error::ClassNameMismatch {
                expected: name.to_string(),
                found: class.name,
            });
        }
        Ok(class)
    }
}

/// Something that turns class names into defined classes
pub trait Loader {
    /// Find and define a class. Loading the same name twice produces the same class.
    fn load(&mut self, name: &str) -> Result<Arc<LoadedClass>, Error>;
}

/// Loader that never finds anything (the root of a delegation chain)
#[derive(Debug, Default)]
pub struct NullLoader;

impl Loader for NullLoader {
    fn load(&mut self, name: &str) -> Result<Arc<LoadedClass>, Error> {
        Err(Error::ClassNotFound(name.to_string()))
    }
}

/// Loader over registered class file bytes, delegating unknown names to a parent
pub struct BytecodeLoader {
    parent: Box<dyn Loader>,

    /// Bytes waiting to be defined
    registered: HashMap<String, Vec<u8>>,
    defined: HashMap<String, Arc<LoadedClass>>,
}

impl BytecodeLoader {
    pub fn new(parent: Box<dyn Loader>) -> BytecodeLoader {
        BytecodeLoader {
            parent,
            registered: HashMap::new(),
            defined: HashMap::new(),
        }
    }

    /// Register the class file for a name
    ///
    /// Registering again before the class is loaded overwrites the earlier bytes.
    pub fn define_class(&mut self, name: &str, bytes: Vec<u8>) -> Result<(), Error> {
        if self.defined.contains_key(name) {
            return Err(Error::DuplicateClass(name.to_string()));
        }
        if self.registered.insert(name.to_string(), bytes).is_some() {
            log::debug!("Overwriting registered bytes for '{}'", name);
        }
        Ok(())
    }

    /// Has the class been registered or defined here (ignoring the parent)?
    pub fn has_class(&self, name: &str) -> bool {
        self.registered.contains_key(name) || self.defined.contains_key(name)
    }
}

impl Loader for BytecodeLoader {
    fn load(&mut self, name: &str) -> Result<Arc<LoadedClass>, Error> {
        if let Some(class) = self.defined.get(name) {
            return Ok(class.clone());
        }

        if let Some(bytes) = self.registered.get(name) {
            let class = Arc::new(LoadedClass::define_named(name, bytes.clone())?);
            self.registered.remove(name);
            log::debug!("Defined '{}'", name);
            self.defined.insert(name.to_string(), class.clone());
            return Ok(class);
        }

        log::trace!("Delegating '{}' to the parent loader", name);
        self.parent.load(name)
    }
}

/// Loader that looks for `<name>.class` in classpath directories and archives, in order
#[derive(Debug, Default)]
pub struct ClasspathLoader {
    entries: Vec<PathBuf>,
    defined: HashMap<String, Arc<LoadedClass>>,
}

impl ClasspathLoader {
    pub fn new(entries: Vec<PathBuf>) -> ClasspathLoader {
        ClasspathLoader {
            entries,
            defined: HashMap::new(),
        }
    }

    /// Parse a `:`-separated classpath (the format used by `java -cp`)
    pub fn from_classpath(classpath: &str) -> ClasspathLoader {
        let entries = classpath
            .lines()
            .flat_map(|line| line.split(':'))
            .filter(|entry| !entry.is_empty())
            .map(PathBuf::from)
            .collect();
        ClasspathLoader::new(entries)
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    fn find_bytes(&self, name: &str) -> Result<Option<Vec<u8>>, Error> {
        for entry in &self.entries {
            if entry.is_dir() {
                let path = entry.join(format!("{}.class", name));
                if path.is_file() {
                    log::trace!("Found '{}' at '{}'", name, path.display());
                    return Ok(Some(fs::read(path)?));
                }
            } else if entry.is_file() {
                if let Some(bytes) = archive::read_archive_entry(entry, name)? {
                    log::trace!("Found '{}' in '{}'", name, entry.display());
                    return Ok(Some(bytes));
                }
            }
        }
        Ok(None)
    }
}

impl Loader for ClasspathLoader {
    fn load(&mut self, name: &str) -> Result<Arc<LoadedClass>, Error> {
        if let Some(class) = self.defined.get(name) {
            return Ok(class.clone());
        }
        let bytes = self
            .find_bytes(name)?
            .ok_or_else(|| Error::ClassNotFound(name.to_string()))?;
        let class = Arc::new(LoadedClass::define_named(name, bytes)?);
        self.defined.insert(name.to_string(), class.clone());
        Ok(class)
    }
}

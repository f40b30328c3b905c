//! Collections of classes: loading them from and saving them to archives and directories, and
//! turning them into [`Loader`]s.

pub mod archive;
mod loader;

pub use loader::*;

use crate::jvm::model::ClassModel;
use crate::jvm::Error;
use archive::ClassEntries;
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::Path;

/// Insertion-ordered set of classes, keyed by class name
///
/// Adding a class whose name is already present replaces the old model in place.
#[derive(Default)]
pub struct ClassPool {
    classes: Vec<ClassModel>,

    /// Position of each class in `classes`
    index: HashMap<String, usize>,
}

impl ClassPool {
    pub fn new() -> ClassPool {
        ClassPool::default()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Decode a class file and add it
    pub fn add_class_from_bytes(&mut self, bytes: &[u8]) -> Result<&mut ClassModel, Error> {
        let class = ClassModel::from_bytes(bytes)?;
        Ok(self.add_class(class))
    }

    /// Add a class, replacing any class with the same name
    pub fn add_class(&mut self, class: ClassModel) -> &mut ClassModel {
        let idx = match self.index.get(&class.name) {
            Some(&idx) => {
                log::debug!("Replacing '{}' in the class pool", class.name);
                self.classes[idx] = class;
                idx
            }
            None => {
                let idx = self.classes.len();
                self.index.insert(class.name.clone(), idx);
                self.classes.push(class);
                idx
            }
        };
        &mut self.classes[idx]
    }

    pub fn remove(&mut self, name: &str) -> Option<ClassModel> {
        let idx = self.index.remove(name)?;
        let class = self.classes.remove(idx);
        for later in &self.classes[idx..] {
            if let Some(position) = self.index.get_mut(&later.name) {
                *position -= 1;
            }
        }
        Some(class)
    }

    pub fn find(&self, name: &str) -> Option<&ClassModel> {
        self.index.get(name).map(|&idx| &self.classes[idx])
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut ClassModel> {
        match self.index.get(name) {
            Some(&idx) => Some(&mut self.classes[idx]),
            None => None,
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ClassModel> {
        self.classes.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, ClassModel> {
        self.classes.iter_mut()
    }

    /// First class (in insertion order) matching the predicate
    pub fn first<P: FnMut(&ClassModel) -> bool>(&self, mut predicate: P) -> Option<&ClassModel> {
        self.classes.iter().find(|class| predicate(*class))
    }

    pub fn filter<P: FnMut(&ClassModel) -> bool>(&self, mut predicate: P) -> Vec<&ClassModel> {
        self.classes.iter().filter(|class| predicate(*class)).collect()
    }

    pub fn for_each<F: FnMut(&ClassModel)>(&self, f: F) {
        self.classes.iter().for_each(f)
    }

    pub fn map<T, F: FnMut(&ClassModel) -> T>(&self, f: F) -> Vec<T> {
        self.classes.iter().map(f).collect()
    }

    /// Add every class in a JAR or ZIP archive, returning how many were added
    ///
    /// Loading stops at the first entry that cannot be read or decoded. The classes before it
    /// stay in the pool.
    pub fn load_archive<P: AsRef<Path>>(&mut self, path: P) -> Result<usize, Error> {
        let path = path.as_ref();
        log::info!("Loading classes from archive '{}'", path.display());
        let read = archive::read_archive(path)?;
        self.add_entries(read)
    }

    /// Add every `.class` file under a directory, returning how many were added
    pub fn load_directory<P: AsRef<Path>>(&mut self, path: P) -> Result<usize, Error> {
        let path = path.as_ref();
        log::info!("Loading classes from directory '{}'", path.display());
        let read = archive::read_directory(path)?;
        self.add_entries(read)
    }

    fn add_entries(&mut self, read: ClassEntries) -> Result<usize, Error> {
        let ClassEntries { entries, failure } = read;
        let decoded: Vec<Result<ClassModel, Error>> = entries
            .par_iter()
            .map(|entry| ClassModel::from_bytes(&entry.bytes))
            .collect();

        let mut added = 0;
        for (entry, class) in entries.iter().zip(decoded) {
            let class = class.map_err(|err| match err {
                Error::MalformedInput(msg) => {
                    Error::MalformedInput(format!("{}: {}", entry.location, msg))
                }
                other => other,
            })?;
            self.add_class(class);
            added += 1;
        }
        log::debug!("Added {} classes", added);
        match failure {
            Some(err) => Err(err),
            None => Ok(added),
        }
    }

    /// Encode every class, in insertion order
    fn encode_all(&self) -> Result<Vec<(&str, Vec<u8>)>, Error> {
        self.classes
            .par_iter()
            .map(|class| class.to_bytes().map(|bytes| (class.name.as_str(), bytes)))
            .collect()
    }

    /// Write all classes into a new archive (truncating any existing file)
    pub fn save_archive<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let path = path.as_ref();
        log::info!("Saving {} classes to '{}'", self.len(), path.display());
        archive::write_archive(path, self.encode_all()?)
    }

    /// Write all classes as `.class` files under a directory
    pub fn save_directory<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let path = path.as_ref();
        log::info!("Saving {} classes under '{}'", self.len(), path.display());
        archive::write_directory(path, self.encode_all()?)
    }

    /// Loader that defines the classes of this pool, delegating everything else to `parent`
    pub fn build_loader(&self, parent: Box<dyn Loader>) -> Result<BytecodeLoader, Error> {
        let mut loader = BytecodeLoader::new(parent);
        for (name, bytes) in self.encode_all()? {
            loader.define_class(name, bytes)?;
        }
        Ok(loader)
    }
}

impl<'a> IntoIterator for &'a ClassPool {
    type Item = &'a ClassModel;
    type IntoIter = std::slice::Iter<'a, ClassModel>;

    fn into_iter(self) -> Self::IntoIter {
        self.classes.iter()
    }
}

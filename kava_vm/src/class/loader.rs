use std::fmt::{self, Display, Formatter};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use kava_classfile::{AccessFlags, ClassRead, JavaType, MethodDescriptor, RawClass};
use parking_lot::{Mutex, RwLock};

use crate::class::{Class, ClassId, ClassStatus, Field, Method};
use crate::mem::object::HEADER_SIZE;

#[derive(Debug)]
pub enum LoadError {
    NotFound(String),
    /// A class was re-entered while still being wired up: a cyclic class
    /// dependency.
    Cyclic(String),
    Malformed(String, io::Error),
}

impl LoadError {
    pub fn class_name(&self) -> &str {
        match self {
            LoadError::NotFound(name) => name,
            LoadError::Cyclic(name) => name,
            LoadError::Malformed(name, _) => name,
        }
    }
}

impl Display for LoadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::NotFound(name) => write!(f, "failed to find class: {}", name),
            LoadError::Cyclic(name) => {
                write!(f, "failed to load class due to a cyclic dependency: {}", name)
            }
            LoadError::Malformed(name, e) => write!(f, "failed to load class {}: {}", name, e),
        }
    }
}

/// Ordered list of directories searched for `<name>.class`; first match
/// wins. Defaults to the working directory plus a `runtime` directory.
#[derive(Debug, Clone)]
pub struct ClassPath {
    entries: Vec<PathBuf>,
}

impl Default for ClassPath {
    fn default() -> Self {
        ClassPath {
            entries: vec![PathBuf::from("./"), PathBuf::from("runtime")],
        }
    }
}

impl ClassPath {
    pub fn new(extra: &[PathBuf]) -> Self {
        let mut path = ClassPath::default();
        path.entries.extend(extra.iter().cloned());
        path
    }

    pub fn push(&mut self, entry: PathBuf) {
        self.entries.push(entry);
    }

    pub fn find_class(&self, name: &str) -> Option<PathBuf> {
        let relative = format!("{}.class", name);
        self.entries
            .iter()
            .map(|dir| dir.join(&relative))
            .find(|candidate| candidate.is_file())
    }
}

/// Process-wide registry of loaded classes. The arena is append-only: a
/// `ClassId` is an index that stays valid forever. A single load mutex
/// serialises loading; the per-class status drives initialisation.
pub struct ClassRegistry {
    classes: RwLock<Vec<Arc<Class>>>,
    by_name: RwLock<HashMap<String, ClassId>>,
    class_path: RwLock<ClassPath>,
    load_lock: Mutex<LoadState>,
}

#[derive(Default)]
struct LoadState {
    /// Names currently being wired up, for cyclic-dependency detection.
    loading: HashSet<String>,
}

impl ClassRegistry {
    pub fn new(class_path: ClassPath) -> ClassRegistry {
        ClassRegistry {
            classes: RwLock::new(Vec::new()),
            by_name: RwLock::new(HashMap::new()),
            class_path: RwLock::new(class_path),
            load_lock: Mutex::new(LoadState::default()),
        }
    }

    pub fn add_class_path(&self, entry: PathBuf) {
        self.class_path.write().push(entry);
    }

    pub fn class(&self, id: ClassId) -> Arc<Class> {
        Arc::clone(&self.classes.read()[id.0 as usize])
    }

    pub fn by_name(&self, name: &str) -> Option<ClassId> {
        self.by_name.read().get(name).copied()
    }

    pub fn class_count(&self) -> usize {
        self.classes.read().len()
    }

    /// Snapshot of every loaded class, for the collector's static-root scan.
    pub fn all_classes(&self) -> Vec<Arc<Class>> {
        self.classes.read().clone()
    }

    /// Loads a class (and, transitively, its superclasses and interfaces),
    /// returning the existing entry when present.
    pub fn load(&self, name: &str) -> Result<ClassId, LoadError> {
        let mut state = self.load_lock.lock();
        self.load_locked(&mut state, name)
    }

    fn load_locked(&self, state: &mut LoadState, name: &str) -> Result<ClassId, LoadError> {
        if let Some(id) = self.by_name(name) {
            return Ok(id);
        }
        if state.loading.contains(name) {
            error!("cyclic class dependency detected while loading {}", name);
            return Err(LoadError::Cyclic(name.to_string()));
        }

        if let Some(first) = name.chars().next() {
            if first == '[' {
                return self.load_array_class(state, name);
            }
            if name.len() == 1 && "ZBCSIJFD".contains(first) {
                return Ok(self.load_primitive_class(first));
            }
        }

        let path = {
            let class_path = self.class_path.read();
            class_path
                .find_class(name)
                .ok_or_else(|| LoadError::NotFound(name.to_string()))?
        };

        let bytes = fs::read(&path).map_err(|e| LoadError::Malformed(name.to_string(), e))?;
        let raw = RawClass::from_bytes(&bytes)
            .map_err(|e| LoadError::Malformed(name.to_string(), e))?;

        debug!("loading {} from {}", name, path.display());

        state.loading.insert(name.to_string());
        let result = self.link_class(state, name, raw);
        state.loading.remove(name);
        result
    }

    /// Wires a parsed class into the registry: loads the superclass and
    /// interfaces, lays out fields, and publishes the class as `Loaded`.
    fn link_class(
        &self,
        state: &mut LoadState,
        name: &str,
        raw: RawClass,
    ) -> Result<ClassId, LoadError> {
        let super_class = match raw.super_name() {
            Some(super_name) => {
                let super_name = super_name.to_string();
                Some(self.load_locked(state, &super_name)?)
            }
            None => None,
        };

        let interface_names: Vec<String> =
            raw.interface_names().map(str::to_string).collect();
        let mut interfaces = Vec::with_capacity(interface_names.len());
        for interface in &interface_names {
            interfaces.push(self.load_locked(state, interface)?);
        }

        let mut fields = Vec::with_capacity(raw.fields.len());
        for info in &raw.fields {
            let descriptor = JavaType::parse(&info.descriptor)
                .map_err(|e| LoadError::Malformed(name.to_string(), e))?;
            fields.push(Field {
                name: info.name.clone(),
                size: descriptor.data_size(),
                descriptor,
                desc_str: info.descriptor.clone(),
                access: info.access,
                offset: 0,
                constant_value: info.constant_value(),
            });
        }

        // Offsets are assigned in decreasing size order to minimise padding
        // and never change afterwards.
        fields.sort_by(|a, b| b.size.cmp(&a.size));

        let instance_base = match super_class {
            Some(id) => self.class(id).object_size,
            None => HEADER_SIZE,
        };
        let mut object_size = instance_base;
        let mut static_size = 0;
        for field in &mut fields {
            if field.is_static() {
                field.offset = static_size;
                static_size += field.size;
            } else {
                field.offset = object_size;
                object_size += field.size;
            }
        }

        let mut methods = Vec::with_capacity(raw.methods.len());
        for info in &raw.methods {
            let descriptor = MethodDescriptor::parse(&info.descriptor)
                .map_err(|e| LoadError::Malformed(name.to_string(), e))?;
            let param_cells = descriptor.parameter_cells(info.access.contains(AccessFlags::STATIC));
            methods.push(Method {
                name: info.name.clone(),
                desc_str: info.descriptor.clone(),
                descriptor,
                access: info.access,
                param_cells,
                code: info.code().cloned(),
            });
        }

        self.register(
            name,
            raw.access,
            super_class,
            interfaces,
            raw.constants,
            fields,
            methods,
            object_size,
            static_size,
            None,
            ClassStatus::Loaded,
        )
    }

    /// Array classes are synthesised: superclass `java/lang/Object`, no
    /// fields or methods, initialised immediately.
    fn load_array_class(&self, state: &mut LoadState, name: &str) -> Result<ClassId, LoadError> {
        let super_class = self.load_locked(state, "java/lang/Object")?;
        let element = JavaType::parse(&name[1..])
            .map_err(|e| LoadError::Malformed(name.to_string(), e))?;

        self.register(
            name,
            AccessFlags::PUBLIC | AccessFlags::FINAL | AccessFlags::SYNTHETIC,
            Some(super_class),
            Vec::new(),
            Default::default(),
            Vec::new(),
            Vec::new(),
            HEADER_SIZE,
            0,
            Some(element),
            ClassStatus::Initialized,
        )
    }

    /// Primitive classes are singletons keyed by their one-character
    /// descriptor.
    fn load_primitive_class(&self, primitive: char) -> ClassId {
        self.register(
            &primitive.to_string(),
            AccessFlags::PUBLIC | AccessFlags::FINAL | AccessFlags::SYNTHETIC,
            None,
            Vec::new(),
            Default::default(),
            Vec::new(),
            Vec::new(),
            HEADER_SIZE,
            0,
            None,
            ClassStatus::Initialized,
        )
        .expect("primitive classes have no failure mode")
    }

    #[allow(clippy::too_many_arguments)]
    fn register(
        &self,
        name: &str,
        access: AccessFlags,
        super_class: Option<ClassId>,
        interfaces: Vec<ClassId>,
        constants: kava_classfile::ConstantPool,
        fields: Vec<Field>,
        methods: Vec<Method>,
        object_size: usize,
        static_size: usize,
        element: Option<JavaType>,
        status: ClassStatus,
    ) -> Result<ClassId, LoadError> {
        let mut classes = self.classes.write();
        let id = ClassId(classes.len() as u32);

        let class = Class::new(
            id,
            name.to_string(),
            access,
            super_class,
            interfaces,
            constants,
            fields,
            methods,
            object_size,
            static_size,
            element,
            status,
        )
        .ok_or_else(|| {
            LoadError::Malformed(
                name.to_string(),
                io::Error::new(io::ErrorKind::Other, "static blob allocation failed"),
            )
        })?;

        classes.push(Arc::new(class));
        self.by_name.write().insert(name.to_string(), id);
        trace!("registered {} as {:?}", name, id);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kava_classfile::ClassBuilder;
    use std::fs;
    use std::path::Path;

    fn write_class(dir: &Path, name: &str, image: &[u8]) {
        let path = dir.join(format!("{}.class", name));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, image).unwrap();
    }

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kava-loader-{}-{}", tag, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn object_image() -> Vec<u8> {
        ClassBuilder::new("java/lang/Object", None)
            .method(AccessFlags::PUBLIC, "<init>", "()V", 0, 1, &[0xb1])
            .build()
    }

    fn registry_for(dir: &Path) -> ClassRegistry {
        ClassRegistry::new(ClassPath::new(&[dir.to_path_buf()]))
    }

    #[test]
    fn loads_class_with_super_chain() {
        let dir = scratch_dir("super");
        write_class(&dir, "java/lang/Object", &object_image());
        write_class(
            &dir,
            "Base",
            &ClassBuilder::new("Base", Some("java/lang/Object"))
                .field(AccessFlags::PROTECTED, "a", "J")
                .build(),
        );
        write_class(
            &dir,
            "Derived",
            &ClassBuilder::new("Derived", Some("Base"))
                .field(AccessFlags::PRIVATE, "b", "I")
                .build(),
        );

        let registry = registry_for(&dir);
        let derived = registry.load("Derived").unwrap();
        let class = registry.class(derived);

        let base = registry.by_name("Base").unwrap();
        assert_eq!(class.super_class, Some(base));

        // Base's long begins at the header; Derived's int follows it.
        let base_class = registry.class(base);
        assert_eq!(base_class.fields[0].offset, HEADER_SIZE);
        assert_eq!(base_class.object_size, HEADER_SIZE + 8);
        assert_eq!(class.fields[0].offset, HEADER_SIZE + 8);
        assert_eq!(class.object_size, HEADER_SIZE + 12);
    }

    #[test]
    fn field_layout_sorts_by_descending_size() {
        let dir = scratch_dir("layout");
        write_class(&dir, "java/lang/Object", &object_image());
        write_class(
            &dir,
            "Mixed",
            &ClassBuilder::new("Mixed", Some("java/lang/Object"))
                .field(AccessFlags::PRIVATE, "flag", "Z")
                .field(AccessFlags::PRIVATE, "time", "J")
                .field(AccessFlags::PRIVATE, "count", "S")
                .field(AccessFlags::STATIC, "shared", "D")
                .field(AccessFlags::STATIC, "mark", "B")
                .build(),
        );

        let registry = registry_for(&dir);
        let class = registry.class(registry.load("Mixed").unwrap());

        let time = class.find_field("time", "J", false).unwrap();
        let count = class.find_field("count", "S", false).unwrap();
        let flag = class.find_field("flag", "Z", false).unwrap();
        assert_eq!(time.offset, HEADER_SIZE);
        assert_eq!(count.offset, HEADER_SIZE + 8);
        assert_eq!(flag.offset, HEADER_SIZE + 10);
        assert_eq!(class.object_size, HEADER_SIZE + 11);

        let shared = class.find_field("shared", "D", true).unwrap();
        let mark = class.find_field("mark", "B", true).unwrap();
        assert_eq!(shared.offset, 0);
        assert_eq!(mark.offset, 8);
        assert_eq!(class.static_size, 9);
    }

    #[test]
    fn array_and_primitive_classes_are_synthesised() {
        let dir = scratch_dir("array");
        write_class(&dir, "java/lang/Object", &object_image());

        let registry = registry_for(&dir);
        let ints = registry.class(registry.load("[[I").unwrap());
        assert!(ints.is_array());
        assert_eq!(ints.element, Some(JavaType::Array(Box::new(JavaType::Int))));
        assert_eq!(ints.status(), ClassStatus::Initialized);
        assert_eq!(
            ints.super_class,
            Some(registry.by_name("java/lang/Object").unwrap())
        );

        let int = registry.class(registry.load("I").unwrap());
        assert_eq!(int.name, "I");
        assert_eq!(int.status(), ClassStatus::Initialized);
    }

    #[test]
    fn missing_class_reports_not_found() {
        let dir = scratch_dir("missing");
        let registry = registry_for(&dir);
        match registry.load("does/not/Exist") {
            Err(LoadError::NotFound(name)) => assert_eq!(name, "does/not/Exist"),
            x => panic!("expected NotFound, got {:?}", x.map(|_| ())),
        }
    }

    #[test]
    fn cyclic_superclasses_are_detected() {
        let dir = scratch_dir("cyclic");
        write_class(
            &dir,
            "First",
            &ClassBuilder::new("First", Some("Second")).build(),
        );
        write_class(
            &dir,
            "Second",
            &ClassBuilder::new("Second", Some("First")).build(),
        );

        let registry = registry_for(&dir);
        match registry.load("First") {
            Err(LoadError::Cyclic(name)) => assert_eq!(name, "First"),
            x => panic!("expected Cyclic, got {:?}", x.map(|_| ())),
        }
    }
}

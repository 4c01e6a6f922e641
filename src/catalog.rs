//! Signatures of Python packages.
//!
//! A [`Catalog`] maps dotted module paths to the classes and functions they declare. It is
//! populated from embedded stubs of torch and torchvision ([`Catalog::builtin`]), from Python
//! packages on disk ([`Catalog::scan_package`]), or from a saved JSON file.
use crate::{typing::TypeInfo, Error, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashSet},
    fs,
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

mod parse;
pub use parse::parse_module;


/// A parameter of a function.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_hint: Option<TypeInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_value: Option<String>,
    /// `*args`
    #[serde(default)]
    pub star: bool,
    /// `**kwargs`
    #[serde(default)]
    pub power: bool,
}

impl ParameterInfo {
    /// Whether the parameter can be left unconnected.
    pub fn is_optional(&self) -> bool {
        self.initial_value.is_some() || self.name == "self" || self.star || self.power
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuncInfo {
    /// Top level functions are suffixed with their overload index, ie `sum$2`.
    pub name: String,
    pub parameters: Vec<ParameterInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<TypeInfo>,
}

impl FuncInfo {
    /// The name without the overload suffix.
    pub fn base_name(&self) -> &str {
        base_name(&self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub name: String,
    #[serde(default)]
    pub bases: Vec<String>,
    pub functions: Vec<FuncInfo>,
}

impl ClassInfo {
    /// The first method named `name`.
    pub fn function(&self, name: &str) -> Option<&FuncInfo> {
        self.functions.iter().find(|x| x.name == name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportName {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl ImportName {
    /// The name bound in the importing module.
    pub fn bound(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Importees {
    /// `from x import *`
    All,
    Names(Vec<ImportName>),
}

/// An `import` or `from ... import` statement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportInfo {
    /// Number of leading dots.
    #[serde(default)]
    pub level: usize,
    pub source: Vec<String>,
    /// `None` for plain `import x`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importees: Option<Importees>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub path: Vec<String>,
    /// Whether the module is a folder (`__init__.py`). Relative imports resolve from the folder
    /// itself instead of the parent.
    #[serde(default)]
    pub is_package: bool,
    #[serde(default)]
    pub classes: Vec<ClassInfo>,
    #[serde(default)]
    pub functions: Vec<FuncInfo>,
    #[serde(default)]
    pub imports: Vec<ImportInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all: Option<Vec<String>>,
}

impl ModuleInfo {
    pub fn dotted(&self) -> String {
        self.path.join(".")
    }
    pub fn class(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.iter().find(|x| x.name == name)
    }
    /// Finds a function by `name$k`, or the first overload by plain `name`.
    pub fn function(&self, name: &str) -> Option<&FuncInfo> {
        if name.contains('$') {
            self.functions.iter().find(|x| x.name == name)
        } else {
            self.functions.iter().find(|x| x.base_name() == name)
        }
    }
}

fn base_name(name: &str) -> &str {
    name.split('$').next().unwrap_or(name)
}

trait Member: Sized {
    fn find<'m>(module: &'m ModuleInfo, name: &str) -> Option<&'m Self>;
}

impl Member for ClassInfo {
    fn find<'m>(module: &'m ModuleInfo, name: &str) -> Option<&'m Self> {
        module.class(name)
    }
}

impl Member for FuncInfo {
    fn find<'m>(module: &'m ModuleInfo, name: &str) -> Option<&'m Self> {
        module.function(name)
    }
}

const MAX_INHERITANCE_DEPTH: usize = 16;

const BUILTIN_STUBS: &[(&str, bool, &str)] = &[
    ("torch", true, include_str!("catalog/stubs/torch/__init__.pyi")),
    ("torch.nn", true, include_str!("catalog/stubs/torch/nn/__init__.pyi")),
    ("torch.nn.modules", false, include_str!("catalog/stubs/torch/nn/modules.pyi")),
    (
        "torch.nn.functional",
        false,
        include_str!("catalog/stubs/torch/nn/functional.pyi"),
    ),
    ("torch.optim", false, include_str!("catalog/stubs/torch/optim.pyi")),
    ("torch.utils", true, ""),
    ("torch.utils.data", false, include_str!("catalog/stubs/torch/utils/data.pyi")),
    ("torchvision", true, ""),
    (
        "torchvision.datasets",
        false,
        include_str!("catalog/stubs/torchvision/datasets.pyi"),
    ),
    (
        "torchvision.transforms",
        false,
        include_str!("catalog/stubs/torchvision/transforms.pyi"),
    ),
];

/// Signatures of every known module, keyed by dotted path.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Catalog {
    modules: BTreeMap<String, ModuleInfo>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }
    /// The embedded torch and torchvision stubs.
    pub fn builtin() -> Result<Self> {
        let mut catalog = Self::new();
        for (path, is_package, source) in BUILTIN_STUBS.iter().copied() {
            let mut module = parse_module(path, source)?;
            module.is_package = is_package;
            catalog.insert(module);
        }
        Ok(catalog)
    }
    /// Adds or replaces a module.
    pub fn insert(&mut self, module: ModuleInfo) {
        self.modules.insert(module.dotted(), module);
    }
    pub fn remove(&mut self, path: &str) -> Option<ModuleInfo> {
        self.modules.remove(path)
    }
    pub fn module(&self, path: &str) -> Option<&ModuleInfo> {
        self.modules.get(path)
    }
    pub fn modules(&self) -> impl Iterator<Item = &ModuleInfo> {
        self.modules.values()
    }
    pub fn len(&self) -> usize {
        self.modules.len()
    }
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
    /// Adds every module of `other`, replacing modules with the same path.
    pub fn extend(&mut self, other: Catalog) {
        self.modules.extend(other.modules);
    }
    /// Parses a Python package folder (or a single file) and adds its modules.
    ///
    /// `__init__.py[i]` describes the folder itself, every other `.py`/`.pyi` file a child module.
    /// Folders starting with `_` are skipped. Files that fail to parse are skipped with a warning.
    /// Returns the number of modules added.
    pub fn scan_package(&mut self, dir: &Path) -> Result<usize> {
        let name = dir
            .file_stem()
            .and_then(|x| x.to_str())
            .ok_or_else(|| Error::ModuleNotFound(dir.display().to_string()))?;
        let before = self.modules.len();
        if dir.is_dir() {
            self.scan_folder(dir, name)?;
        } else {
            let source = read_to_string(dir)?;
            self.insert(parse_module(name, &source)?);
        }
        let added = self.modules.len() - before;
        tracing::info!(package = %dir.display(), added, "scanned package");
        Ok(added)
    }
    fn scan_folder(&mut self, root: &Path, name: &str) -> Result<()> {
        let mut packages = Vec::new();
        // module path => (file, is __init__)
        let mut files = BTreeMap::<Vec<String>, (PathBuf, bool)>::new();
        let walk = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || !entry.file_name().to_string_lossy().starts_with('_')
            });
        for entry in walk {
            let entry = entry.map_err(|e| Error::Io {
                path: e.path().unwrap_or(root).to_path_buf(),
                source: e.into(),
            })?;
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            let Some(mut path) = std::iter::once(Some(name))
                .chain(relative.iter().map(|x| x.to_str()))
                .map(|x| x.map(str::to_string))
                .collect::<Option<Vec<_>>>()
            else {
                tracing::warn!(file = %entry.path().display(), "skipping non UTF-8 path");
                continue;
            };
            if entry.file_type().is_dir() {
                packages.push(path);
                continue;
            }
            let Some(file_name) = path.pop() else {
                continue;
            };
            let Some(stem) = file_name
                .strip_suffix(".pyi")
                .or_else(|| file_name.strip_suffix(".py"))
            else {
                continue;
            };
            let is_init = stem == "__init__";
            if !is_init {
                path.push(stem.to_string());
            }
            // stubs take precedence over sources
            if file_name.ends_with(".pyi") || !files.contains_key(&path) {
                files.insert(path, (entry.into_path(), is_init));
            }
        }
        for path in packages {
            self.insert(ModuleInfo {
                path,
                is_package: true,
                ..ModuleInfo::default()
            });
        }
        for (path, (file, is_init)) in files {
            let source = read_to_string(&file)?;
            match parse_module(&path.join("."), &source) {
                Ok(module) => self.insert(ModuleInfo {
                    is_package: is_init,
                    ..module
                }),
                Err(e) => tracing::warn!(file = %file.display(), "skipping module: {e}"),
            }
        }
        Ok(())
    }
    fn import_source(&self, module: &ModuleInfo, import: &ImportInfo) -> Option<&ModuleInfo> {
        if import.level == 0 {
            return self.module(&import.source.join("."));
        }
        let mut base = module.path.clone();
        let mut up = import.level - 1;
        if !module.is_package {
            up += 1;
        }
        if up > base.len() {
            return None;
        }
        base.truncate(base.len() - up);
        base.extend(import.source.iter().cloned());
        self.module(&base.join("."))
    }
    fn resolve<'a, T: Member>(
        &'a self,
        module: &'a ModuleInfo,
        name: &str,
        visited: &mut HashSet<(String, String)>,
    ) -> Option<(&'a ModuleInfo, &'a T)> {
        if !visited.insert((module.dotted(), name.to_string())) {
            return None;
        }
        if let Some(found) = T::find(module, name) {
            return Some((module, found));
        }
        let base = base_name(name);
        for import in module.imports.iter() {
            let Some(importees) = import.importees.as_ref() else {
                continue;
            };
            let Some(source) = self.import_source(module, import) else {
                continue;
            };
            let found = match importees {
                Importees::All => {
                    let exported = source
                        .all
                        .as_ref()
                        .map_or(true, |all| all.iter().any(|x| x == base));
                    if exported {
                        self.resolve(source, name, visited)
                    } else {
                        None
                    }
                }
                Importees::Names(names) => names
                    .iter()
                    .find(|x| x.bound() == base)
                    .and_then(|x| {
                        let renamed = format!("{}{}", x.name, &name[base.len()..]);
                        self.resolve(source, &renamed, visited)
                    }),
            };
            if found.is_some() {
                return found;
            }
        }
        None
    }
    fn lookup<T: Member>(&self, path: &str, name: &str) -> Result<(&ModuleInfo, &T)> {
        let module = self
            .module(path)
            .ok_or_else(|| Error::ModuleNotFound(path.to_string()))?;
        self.resolve(module, name, &mut HashSet::new())
            .ok_or_else(|| Error::SymbolNotFound {
                module: path.to_string(),
                name: name.to_string(),
            })
    }
    /// Finds a class declared in or re-exported by the module at `path`.
    pub fn class(&self, path: &str, name: &str) -> Result<&ClassInfo> {
        self.lookup(path, name).map(|(_, class)| class)
    }
    /// Finds a function declared in or re-exported by the module at `path`.
    ///
    /// `name` is `name$k` to select an overload.
    pub fn function(&self, path: &str, name: &str) -> Result<&FuncInfo> {
        self.lookup(path, name).map(|(_, func)| func)
    }
    /// Finds a method of a class, searching its base classes if the class does not define it.
    pub fn method(&self, path: &str, class: &str, name: &str) -> Result<Option<&FuncInfo>> {
        let (module, class) = self.lookup::<ClassInfo>(path, class)?;
        Ok(self.inherited(module, class, name, 0))
    }
    fn inherited<'a>(
        &'a self,
        module: &'a ModuleInfo,
        class: &'a ClassInfo,
        name: &str,
        depth: usize,
    ) -> Option<&'a FuncInfo> {
        if let Some(func) = class.function(name) {
            return Some(func);
        }
        if depth >= MAX_INHERITANCE_DEPTH {
            return None;
        }
        class.bases.iter().find_map(|base| {
            // strip generic arguments, ie `Generic[T_co]`
            let base = base.split('[').next()?.trim();
            let (module, class) = match base.rsplit_once('.') {
                Some((path, base)) => self.lookup::<ClassInfo>(path, base).ok()?,
                None => self.resolve::<ClassInfo>(module, base, &mut HashSet::new())?,
            };
            self.inherited(module, class, name, depth + 1)
        })
    }
    /// The `__init__` parameters of a class, if it is known.
    pub fn init_parameters(&self, path: &str, class: &str) -> Option<&[ParameterInfo]> {
        self.method(path, class, "__init__")
            .ok()
            .flatten()
            .map(|x| x.parameters.as_slice())
    }
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self)?;
        fs::write(path, json).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })
    }
    pub fn load(path: &Path) -> Result<Self> {
        Ok(serde_json::from_str(&read_to_string(path)?)?)
    }
}

pub(crate) fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })
}

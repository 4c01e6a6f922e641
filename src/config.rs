use crate::{
    catalog::{read_to_string, Catalog},
    codegen::TrainingOptions,
    workspace::Workspace,
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings of a [`Workspace`], read from a JSON file.
///
/// Missing fields take their defaults, so `{}` is a valid config.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Batches between loss prints in generated training loops.
    pub log_interval: usize,
    pub epochs: usize,
    /// Python packages scanned into the catalog, ie a `site-packages/torch` folder.
    pub packages: Vec<PathBuf>,
    /// Catalogs saved with `vtorch catalog --save`.
    pub catalogs: Vec<PathBuf>,
    /// Python files registered as user-defined blocks, named by their file stem.
    pub udbs: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let options = TrainingOptions::default();
        Self {
            log_interval: options.log_interval,
            epochs: options.epochs,
            packages: Vec::new(),
            catalogs: Vec::new(),
            udbs: Vec::new(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        Ok(serde_json::from_str(&read_to_string(path)?)?)
    }
    pub fn training_options(&self) -> TrainingOptions {
        TrainingOptions {
            log_interval: self.log_interval,
            epochs: self.epochs,
        }
    }
    /// The builtin catalog extended with the saved catalogs and scanned packages, in that order.
    pub fn catalog(&self) -> Result<Catalog> {
        let mut catalog = Catalog::builtin()?;
        for path in self.catalogs.iter() {
            catalog.extend(Catalog::load(path)?);
        }
        for path in self.packages.iter() {
            let added = catalog.scan_package(path)?;
            tracing::info!("scanned {added} modules from {}", path.display());
        }
        Ok(catalog)
    }
    /// A workspace over [`catalog`](Self::catalog) with the user-defined blocks registered.
    pub fn workspace(&self) -> Result<Workspace> {
        let mut workspace = Workspace::new(self.catalog()?);
        workspace.set_training_options(self.training_options());
        for path in self.udbs.iter() {
            let name = path
                .file_stem()
                .and_then(|x| x.to_str())
                .ok_or_else(|| {
                    Error::Validation(format!("cannot name a UDB after {}", path.display()))
                })?;
            workspace.add_udb(name, &read_to_string(path)?)?;
        }
        Ok(workspace)
    }
}

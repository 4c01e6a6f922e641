//! Named graphs, datasets and user-defined blocks.
//!
//! A [`Workspace`] is what an editor talks to. Graphs are edited with [`Operation`]s, and
//! [`Workspace::replay`] lists the operations rebuilding a graph so an editor can restore it.
use crate::{
    catalog::{parse_module, Catalog},
    codegen::{
        class_name, generate_models, generate_training, DatasetInfo, OptimizerConfig,
        TrainingOptions,
    },
    graph::{Graph, GraphDocument, LITERAL},
    Error, Result,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

#[cfg(test)]
mod tests;

/// An edit of a graph, serialized as `{"op": ..., "body": {...}}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "body", rename_all = "camelCase")]
pub enum Operation {
    AddBlock {
        id: String,
        name: String,
        #[serde(default)]
        submodule: Vec<String>,
        /// Opaque to the workspace, stored for the editor.
        #[serde(default)]
        position: Value,
    },
    DeleteBlock {
        id: String,
    },
    SetPosition {
        id: String,
        position: Value,
    },
    /// Replaces the arguments of a slot with a literal.
    ChangeArgument {
        target: String,
        value: String,
    },
    /// Appends a literal to the arguments of a slot.
    FillArgument {
        target: String,
        value: String,
    },
    AddEdge {
        source: String,
        target: String,
    },
    RemoveEdge {
        source: String,
        target: String,
    },
}

/// The arguments of [`Workspace::generate_training`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodegenRequest {
    pub model_name: String,
    pub loss_name: String,
    pub dataset_name: String,
    pub optimizer_config: OptimizerConfig,
    #[serde(default)]
    pub dataloader_params: Vec<String>,
}

/// Python source of a user-defined block module.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdbSource {
    pub name: String,
    pub code: String,
}

/// A graph of a [`Project`], rebuilt from a document and then edited by operations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphSource {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<GraphDocument>,
    #[serde(default)]
    pub operations: Vec<Operation>,
}

/// Everything needed to rebuild a workspace.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub udbs: Vec<UdbSource>,
    #[serde(default)]
    pub datasets: Vec<DatasetInfo>,
    #[serde(default)]
    pub graphs: Vec<GraphSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training: Option<CodegenRequest>,
}

/// A graph and the editor positions of its blocks.
#[derive(Clone, Debug)]
struct Sheet {
    graph: Graph,
    positions: HashMap<String, Value>,
}

impl Sheet {
    fn new(name: &str) -> Self {
        Self {
            graph: Graph::new(class_name(name)),
            positions: HashMap::new(),
        }
    }
    fn apply(&mut self, catalog: &Catalog, operation: &Operation) -> Result<()> {
        match operation {
            Operation::AddBlock {
                id,
                name,
                submodule,
                position,
            } => {
                self.graph.add_block(catalog, id, name, submodule)?;
                self.positions.insert(id.clone(), position.clone());
            }
            Operation::DeleteBlock { id } => {
                self.graph.remove_block(id)?;
                self.positions.remove(id);
            }
            Operation::SetPosition { id, position } => match self.positions.get_mut(id) {
                Some(stored) => *stored = position.clone(),
                None => return Err(Error::BlockNotFound(format!("node {id}"))),
            },
            Operation::ChangeArgument { target, value } => {
                self.graph.update_arg(target, value)?;
            }
            Operation::FillArgument { target, value } => {
                self.graph.fill_arg(target, value)?;
            }
            Operation::AddEdge { source, target } => self.graph.connect(source, target)?,
            Operation::RemoveEdge { source, target } => self.graph.disconnect(source, target)?,
        }
        Ok(())
    }
    fn replay(&self) -> Vec<Operation> {
        let blocks = self.graph.blocks().iter().filter(|x| !x.is_literal());
        let mut operations: Vec<Operation> = blocks
            .clone()
            .map(|block| Operation::AddBlock {
                id: block.id().to_string(),
                name: block.type_name().to_string(),
                submodule: block.submodule().map(<[String]>::to_vec).unwrap_or_default(),
                position: self.positions.get(block.id()).cloned().unwrap_or_default(),
            })
            .collect();
        for block in blocks {
            for slot in block.slots() {
                let target = block.endpoint(slot.func(), slot.param()).to_string();
                for (i, source) in slot.sources().iter().enumerate() {
                    let literal = (source.node_type == LITERAL)
                        .then(|| self.graph.block(&source.node_id))
                        .flatten()
                        .and_then(|x| x.literal_text());
                    operations.push(match literal {
                        Some(value) if i == 0 => Operation::ChangeArgument {
                            target: target.clone(),
                            value: value.to_string(),
                        },
                        Some(value) => Operation::FillArgument {
                            target: target.clone(),
                            value: value.to_string(),
                        },
                        None => Operation::AddEdge {
                            source: source.to_string(),
                            target: target.clone(),
                        },
                    });
                }
            }
        }
        operations
    }
}

/// Graphs, datasets and user-defined blocks sharing one catalog.
#[derive(Clone, Debug)]
pub struct Workspace {
    catalog: Catalog,
    sheets: BTreeMap<String, Sheet>,
    datasets: BTreeMap<String, DatasetInfo>,
    udbs: BTreeMap<String, String>,
    options: TrainingOptions,
}

impl Workspace {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            sheets: BTreeMap::new(),
            datasets: BTreeMap::new(),
            udbs: BTreeMap::new(),
            options: TrainingOptions::default(),
        }
    }
    /// A workspace over [`Catalog::builtin`].
    pub fn builtin() -> Result<Self> {
        Ok(Self::new(Catalog::builtin()?))
    }
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }
    pub fn catalog_mut(&mut self) -> &mut Catalog {
        &mut self.catalog
    }
    pub fn training_options(&self) -> &TrainingOptions {
        &self.options
    }
    pub fn set_training_options(&mut self, options: TrainingOptions) {
        self.options = options;
    }
    /// Creates the graph `name` if it does not exist.
    pub fn create_graph(&mut self, name: &str) -> &Graph {
        &self
            .sheets
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!("create graph {}", class_name(name));
                Sheet::new(name)
            })
            .graph
    }
    pub fn graph(&self, name: &str) -> Result<&Graph> {
        self.sheet(name).map(|x| &x.graph)
    }
    /// Names of the graphs, sorted.
    pub fn graph_names(&self) -> impl Iterator<Item = &str> {
        self.sheets.keys().map(String::as_str)
    }
    fn sheet(&self, name: &str) -> Result<&Sheet> {
        self.sheets
            .get(name)
            .ok_or_else(|| Error::GraphNotFound(name.to_string()))
    }
    /// The editor position of a block.
    pub fn position(&self, graph: &str, id: &str) -> Option<&Value> {
        self.sheets.get(graph)?.positions.get(id)
    }
    /// Applies `operation` to the existing graph `name`.
    ///
    /// **Errors**
    ///
    /// - The graph does not exist.
    /// - The graph rejects the edit, see [`Graph`].
    /// - [`Operation::SetPosition`] names a block without a position.
    pub fn apply(&mut self, name: &str, operation: &Operation) -> Result<()> {
        let sheet = self
            .sheets
            .get_mut(name)
            .ok_or_else(|| Error::GraphNotFound(name.to_string()))?;
        sheet.apply(&self.catalog, operation)?;
        tracing::debug!("{name}: {operation:?}");
        Ok(())
    }
    /// The operations rebuilding the graph `name` into an empty graph.
    ///
    /// Blocks are added first, then the arguments of every slot in order. Creates an empty graph
    /// if `name` does not exist.
    pub fn replay(&mut self, name: &str) -> Vec<Operation> {
        match self.sheets.get(name) {
            Some(sheet) => sheet.replay(),
            None => {
                self.create_graph(name);
                Vec::new()
            }
        }
    }
    /// Replaces the graph `name` with one rebuilt from `document`.
    ///
    /// Positions of the previous graph are dropped.
    pub fn import_document(&mut self, name: &str, document: &GraphDocument) -> Result<()> {
        let graph = Graph::from_document(&self.catalog, class_name(name), document)?;
        let positions = graph
            .blocks()
            .iter()
            .filter(|x| !x.is_literal())
            .map(|x| (x.id().to_string(), Value::Null))
            .collect();
        self.sheets
            .insert(name.to_string(), Sheet { graph, positions });
        Ok(())
    }
    pub fn export_document(&self, name: &str) -> Result<GraphDocument> {
        self.graph(name)?.to_document()
    }
    /// Prints the model class of the graph `name`.
    ///
    /// **Errors**
    ///
    /// The graph does not exist or is not ready.
    pub fn generate_model_code(&self, name: &str) -> Result<String> {
        let graph = self.graph(name)?;
        graph.check_ready()?;
        let code = generate_models([graph])?;
        tracing::info!("generated model {}", graph.name());
        Ok(code)
    }
    /// Names of the graphs that can be generated, sorted.
    pub fn ready_graphs(&self) -> Vec<&str> {
        self.sheets
            .iter()
            .filter(|(_, sheet)| sheet.graph.check_ready().is_ok())
            .map(|(name, _)| name.as_str())
            .collect()
    }
    /// Adds or replaces a dataset.
    pub fn set_dataset(&mut self, dataset: DatasetInfo) {
        self.datasets.insert(dataset.name().to_string(), dataset);
    }
    pub fn dataset(&self, name: &str) -> Option<&DatasetInfo> {
        self.datasets.get(name)
    }
    /// The datasets, sorted by name.
    pub fn datasets(&self) -> impl Iterator<Item = &DatasetInfo> {
        self.datasets.values()
    }
    /// Parses user-defined blocks and adds them to the catalog as `udb.<name>`.
    ///
    /// Returns warnings about parameters or returns without type hints.
    ///
    /// **Errors**
    ///
    /// - `name` is empty or contains `.`.
    /// - The code does not parse.
    /// - A class has no `__init__` or no `forward`.
    pub fn add_udb(&mut self, name: &str, code: &str) -> Result<Vec<String>> {
        if name.is_empty() || name.contains('.') {
            return Err(Error::Validation(format!(
                "UDB name {name:?} must be non-empty and must not contain '.'"
            )));
        }
        let path = format!("udb.{name}");
        let module = parse_module(&path, code)?;
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        for class in module.classes.iter() {
            for method in ["__init__", "forward"] {
                let Some(func) = class.function(method) else {
                    errors.push(format!("class {} has no {method} function", class.name));
                    continue;
                };
                for param in func.parameters.iter().skip(1) {
                    if param.type_hint.is_none() {
                        warnings.push(format!(
                            "class {}'s {method} function has no type hint for parameter {}",
                            class.name, param.name
                        ));
                    }
                }
                if method == "forward" && func.return_type.is_none() {
                    warnings.push(format!(
                        "class {}'s forward function has no return type hint",
                        class.name
                    ));
                }
            }
        }
        for func in module.functions.iter() {
            for param in func.parameters.iter() {
                if param.type_hint.is_none() {
                    warnings.push(format!(
                        "function {} has no type hint for parameter {}",
                        func.base_name(),
                        param.name
                    ));
                }
            }
            if func.return_type.is_none() {
                warnings.push(format!(
                    "function {} has no return type hint",
                    func.base_name()
                ));
            }
        }
        if !errors.is_empty() {
            return Err(Error::InvalidUdb(errors.join("\n")));
        }
        for warning in warnings.iter() {
            tracing::warn!("{path}: {warning}");
        }
        self.catalog.insert(module);
        self.udbs.insert(name.to_string(), code.to_string());
        tracing::info!("registered {path}");
        Ok(warnings)
    }
    /// Names and code of the user-defined blocks, sorted by name.
    pub fn udbs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.udbs.iter().map(|(name, code)| (name.as_str(), code.as_str()))
    }
    /// Prints the training script of a model, a loss function and a dataset.
    ///
    /// **Errors**
    ///
    /// - The model or loss graph does not exist or is not ready.
    /// - The model has more than one input, not exactly one output, or a ground truth.
    /// - The loss has more than one input or ground truth, or not exactly one output.
    /// - The dataset does not exist.
    pub fn generate_training(&self, request: &CodegenRequest) -> Result<String> {
        let model = self.ready_graph(&request.model_name, "Model")?;
        let loss = self.ready_graph(&request.loss_name, "Loss function")?;
        let model_name = &request.model_name;
        let loss_name = &request.loss_name;
        let invalid = |msg: String| Err(Error::Validation(msg));
        if model.inputs().len() > 1 {
            return invalid(format!("Model {model_name} has multiple inputs"));
        }
        if model.outputs().len() != 1 {
            return invalid(format!("Model {model_name} must have single output"));
        }
        if !model.ground_truths().is_empty() {
            return invalid(format!("Model {model_name} must not have groundtruth input"));
        }
        if loss.inputs().len() > 1 {
            return invalid(format!("Loss function {loss_name} has multiple inputs"));
        }
        if loss.ground_truths().len() > 1 {
            return invalid(format!(
                "Loss function {loss_name} has multiple groundtruth inputs"
            ));
        }
        if loss.outputs().len() != 1 {
            return invalid(format!("Loss function {loss_name} must have single output"));
        }
        let dataset = self
            .dataset(&request.dataset_name)
            .ok_or_else(|| Error::DatasetNotFound(request.dataset_name.clone()))?;
        generate_training(
            dataset,
            model,
            loss,
            &request.optimizer_config,
            &request.dataloader_params,
            &self.catalog,
            &self.options,
        )
    }
    fn ready_graph(&self, name: &str, role: &str) -> Result<&Graph> {
        let not_ready = |cause: Option<Error>| Error::NotReady {
            what: format!("{role} {name}"),
            cause: cause.map(Box::new),
        };
        let graph = self.graph(name).map_err(|_| not_ready(None))?;
        graph.check_ready().map_err(|e| not_ready(Some(e)))?;
        Ok(graph)
    }
    /// Applies a project: user-defined blocks, datasets, then graphs.
    ///
    /// Returns the training script if the project requests one.
    ///
    /// **Errors**
    ///
    /// The first failing step, see [`add_udb`](Self::add_udb), [`apply`](Self::apply) and
    /// [`generate_training`](Self::generate_training).
    pub fn apply_project(&mut self, project: &Project) -> Result<Option<String>> {
        for udb in project.udbs.iter() {
            self.add_udb(&udb.name, &udb.code)?;
        }
        for dataset in project.datasets.iter() {
            self.set_dataset(dataset.clone());
        }
        for source in project.graphs.iter() {
            match &source.document {
                Some(document) => self.import_document(&source.name, document)?,
                None => {
                    self.create_graph(&source.name);
                }
            }
            for operation in source.operations.iter() {
                self.apply(&source.name, operation)?;
            }
        }
        project
            .training
            .as_ref()
            .map(|request| self.generate_training(request))
            .transpose()
    }
    /// The project rebuilding this workspace, with every graph as operations.
    pub fn to_project(&self) -> Project {
        Project {
            udbs: self
                .udbs()
                .map(|(name, code)| UdbSource {
                    name: name.to_string(),
                    code: code.to_string(),
                })
                .collect(),
            datasets: self.datasets().cloned().collect(),
            graphs: self
                .sheets
                .iter()
                .map(|(name, sheet)| GraphSource {
                    name: name.clone(),
                    document: None,
                    operations: sheet.replay(),
                })
                .collect(),
            training: None,
        }
    }
}

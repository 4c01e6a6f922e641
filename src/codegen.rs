//! Python code generation.
//!
//! [`generate_models`] prints the model classes of graphs, and [`generate_training`] prints a
//! self-contained training script from a dataset, a model graph, a loss graph and the optimizer
//! and dataloader arguments.
use crate::{
    catalog::ParameterInfo,
    python::{Arg, Expr, Stmt},
};

mod dataset;
pub use dataset::{
    define_dataset, DatasetInfo, DatasetParam, GeneratedDataset, SegmentationConfig,
    TabularConfig, TransformInstance,
};

mod model;
pub use model::{class_name, generate_model_class, generate_models, to_valid_name};

mod training;
pub use training::{
    dataloader_call, generate_training, optimizer_call, OptimizerConfig, TrainingOptions,
};


/// Modules to import, deduplicated in first-use order.
#[derive(Clone, Debug, Default)]
pub struct ImportSet {
    paths: Vec<String>,
}

impl ImportSet {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn add(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !path.is_empty() && !self.paths.contains(&path) {
            self.paths.push(path);
        }
    }
    pub fn paths(&self) -> &[String] {
        &self.paths
    }
    pub fn to_stmts(&self) -> Vec<Stmt> {
        self.paths.iter().map(|x| Stmt::import(x.as_str())).collect()
    }
}

/// Builds a call from user-given values.
///
/// With the `__init__` parameters of the callee, values are passed by keyword, skipping `self`
/// and dropping missing values. Without them, or when a `*args` or `**kwargs` parameter would
/// receive a value, values are passed by position and missing ones as `None`.
pub(crate) fn call_with_signature(
    callee: Expr,
    values: Vec<Option<Expr>>,
    params: Option<&[ParameterInfo]>,
) -> Expr {
    let params = params.map(|params| match params.first() {
        Some(first) if first.name == "self" => &params[1..],
        _ => params,
    });
    let keyword = params.filter(|params| {
        params
            .iter()
            .take(values.len())
            .all(|x| !x.star && !x.power)
    });
    let args = match keyword {
        Some(params) => values
            .into_iter()
            .zip(params.iter())
            .filter_map(|(value, param)| Some(Arg::keyword(param.name.as_str(), value?)))
            .collect(),
        None => values
            .into_iter()
            .map(|value| Arg::positional(value.unwrap_or_else(|| Expr::raw("None"))))
            .collect(),
    };
    callee.call(args)
}

/// A user-given argument, `None` if it is blank.
pub(crate) fn user_value(text: &str) -> Option<Expr> {
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(Expr::raw(text))
    }
}

use super::endpoint::{EdgeEndpoint, FORWARD, INIT, RETURN};
use crate::{
    catalog::FuncInfo,
    typing::{Converted, Delta, PyType},
};

pub const INPUT: &str = "input";
pub const OUTPUT: &str = "output";
pub const GROUND_TRUTH: &str = "groundtruth";
pub const LITERAL: &str = "Literal";

#[derive(Clone, Debug)]
pub enum BlockKind {
    Input,
    GroundTruth,
    Output,
    /// An instance of a class, called with its `forward` parameters.
    Layer {
        submodule: Vec<String>,
        class: String,
        init: Option<FuncInfo>,
        forward: Option<FuncInfo>,
    },
    Function {
        submodule: Vec<String>,
        func: FuncInfo,
    },
    /// A typed-in argument, holding its normalized text.
    Literal { text: String },
}

/// The value passed to a parameter, see [`Block::gather_args`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Argument {
    /// One source that matched the whole parameter.
    Single(EdgeEndpoint),
    /// Sources that are the elements of a tuple.
    Tuple(Vec<EdgeEndpoint>),
}

/// The values connected to one parameter.
#[derive(Clone, Debug)]
pub struct ParamSlot {
    pub(crate) func: String,
    pub(crate) param: String,
    pub(crate) sources: Vec<EdgeEndpoint>,
    /// The declared type followed by the remaining type after each source.
    pub(crate) types: Vec<PyType>,
    /// Whether the first source matched the whole parameter rather than its first element.
    pub(crate) whole: bool,
}

impl ParamSlot {
    pub(crate) fn new(func: &str, param: &str, declared: PyType) -> Self {
        Self {
            func: func.to_string(),
            param: param.to_string(),
            sources: Vec::new(),
            types: vec![declared],
            whole: false,
        }
    }
    pub fn func(&self) -> &str {
        &self.func
    }
    pub fn param(&self) -> &str {
        &self.param
    }
    pub fn key(&self) -> String {
        format!("{}-{}", self.func, self.param)
    }
    pub fn sources(&self) -> &[EdgeEndpoint] {
        &self.sources
    }
    pub fn declared(&self) -> &PyType {
        &self.types[0]
    }
    /// Checks `delta` against the slot and records the remaining type.
    ///
    /// The first source may match the whole parameter or its first tuple element, later sources
    /// must be further elements. Returns `None` if the value is rejected, otherwise the converted
    /// literal, if any.
    pub(crate) fn append(&mut self, delta: Delta) -> Option<Option<Converted>> {
        let derived = self.types.last()?.derive(delta);
        if self.types.len() > 1 {
            let derived = derived?;
            self.types.push(derived.rest);
            return Some(derived.converted);
        }
        let declared = &self.types[0];
        let whole = match delta {
            Delta::Text(text) => declared.convert(text).map(Some),
            Delta::Type(ty) => ty.is_subtype(declared).then_some(None),
        };
        if whole.is_none() && derived.is_none() {
            return None;
        }
        self.whole = whole.is_some();
        match derived {
            Some(derived) => {
                self.types.push(derived.rest);
                Some(derived.converted)
            }
            None => {
                self.types.push(PyType::None);
                whole
            }
        }
    }
    /// Removes the last source.
    pub(crate) fn pop(&mut self) -> Option<EdgeEndpoint> {
        let source = self.sources.pop()?;
        self.types.pop();
        if self.sources.is_empty() {
            self.whole = false;
        }
        Some(source)
    }
    pub fn is_ready(&self) -> bool {
        self.types.last().map_or(false, PyType::nullable)
            || (self.sources.len() == 1 && self.whole)
    }
}

/// A node of a [`Graph`](super::Graph).
#[derive(Clone, Debug)]
pub struct Block {
    pub(crate) id: String,
    pub(crate) kind: BlockKind,
    pub(crate) slots: Vec<ParamSlot>,
    /// Outgoing edges as (own endpoint, target endpoint), in the order they were added.
    pub(crate) targets: Vec<(EdgeEndpoint, EdgeEndpoint)>,
    pub(crate) output: PyType,
}

/// `ini` for `__init__`, `fwd` otherwise.
pub(crate) fn func_key(func: &FuncInfo) -> &'static str {
    if func.name.starts_with("__init__") {
        INIT
    } else {
        FORWARD
    }
}

fn declared_type(annotation: Option<&crate::typing::TypeInfo>) -> PyType {
    match annotation {
        Some(info) => PyType::from_info(info).unwrap_or_else(|e| {
            tracing::debug!("treating {info} as Any: {e}");
            PyType::Any
        }),
        None => PyType::Any,
    }
}

fn function_ready(block: &Block, func: &FuncInfo) -> bool {
    let key = func_key(func);
    func.parameters.iter().all(|param| {
        match block.slot(key, &param.name) {
            Some(slot) if !slot.sources.is_empty() => slot.is_ready(),
            _ => param.is_optional(),
        }
    })
}

impl Block {
    pub(crate) fn new(id: &str, kind: BlockKind) -> Self {
        let funcs: Vec<FuncInfo> = match &kind {
            BlockKind::Layer { init, forward, .. } => {
                init.iter().chain(forward.iter()).cloned().collect()
            }
            BlockKind::Function { func, .. } => vec![func.clone()],
            _ => Vec::new(),
        };
        let mut block = Self {
            id: id.to_string(),
            kind,
            slots: Vec::new(),
            targets: Vec::new(),
            output: PyType::Any,
        };
        if let BlockKind::Output = block.kind {
            block.slots.push(ParamSlot::new(FORWARD, INPUT, PyType::Any));
        }
        for func in funcs.iter() {
            block.add_function_params(func);
        }
        if let Some(forward) = funcs.iter().find(|x| func_key(x) == FORWARD) {
            block.output = declared_type(forward.return_type.as_ref());
        }
        block
    }
    fn add_function_params(&mut self, func: &FuncInfo) {
        let key = func_key(func);
        for param in func.parameters.iter() {
            let declared = declared_type(param.type_hint.as_ref());
            self.slots.push(ParamSlot::new(key, &param.name, declared));
        }
    }
    pub fn id(&self) -> &str {
        &self.id
    }
    pub fn kind(&self) -> &BlockKind {
        &self.kind
    }
    /// The `type` part of endpoints of this block.
    pub fn type_name(&self) -> &str {
        match &self.kind {
            BlockKind::Input => INPUT,
            BlockKind::GroundTruth => GROUND_TRUTH,
            BlockKind::Output => OUTPUT,
            BlockKind::Layer { class, .. } => class,
            BlockKind::Function { func, .. } => &func.name,
            BlockKind::Literal { .. } => LITERAL,
        }
    }
    pub fn submodule(&self) -> Option<&[String]> {
        match &self.kind {
            BlockKind::Layer { submodule, .. } | BlockKind::Function { submodule, .. } => {
                Some(submodule)
            }
            _ => None,
        }
    }
    pub fn is_literal(&self) -> bool {
        matches!(self.kind, BlockKind::Literal { .. })
    }
    /// Whether edges can end at this block.
    pub fn accepts_edges(&self) -> bool {
        !matches!(
            self.kind,
            BlockKind::Input | BlockKind::GroundTruth | BlockKind::Literal { .. }
        )
    }
    pub fn slots(&self) -> &[ParamSlot] {
        &self.slots
    }
    pub fn slot(&self, func: &str, param: &str) -> Option<&ParamSlot> {
        self.slots
            .iter()
            .find(|x| x.func == func && x.param == param)
    }
    pub(crate) fn slot_mut(&mut self, func: &str, param: &str) -> Option<&mut ParamSlot> {
        self.slots
            .iter_mut()
            .find(|x| x.func == func && x.param == param)
    }
    pub fn output_type(&self) -> &PyType {
        &self.output
    }
    pub fn targets(&self) -> &[(EdgeEndpoint, EdgeEndpoint)] {
        &self.targets
    }
    pub fn out_degree(&self) -> usize {
        self.targets.len()
    }
    /// An endpoint of this block.
    pub fn endpoint(&self, func: &str, param: &str) -> EdgeEndpoint {
        EdgeEndpoint::new(self.type_name(), &self.id, func, param)
    }
    /// The output endpoint, `type-id-fwd-return`.
    pub fn output_endpoint(&self) -> EdgeEndpoint {
        self.endpoint(FORWARD, RETURN)
    }
    /// The text of a literal block.
    pub fn literal_text(&self) -> Option<&str> {
        match &self.kind {
            BlockKind::Literal { text } => Some(text),
            _ => None,
        }
    }
    /// Whether every parameter of `__init__` and `forward` (or of the function) is satisfied.
    ///
    /// A parameter is satisfied when its connected values complete it, or when it has a
    /// default, is `self`, `*args` or `**kwargs`.
    pub fn is_ready(&self) -> bool {
        match &self.kind {
            BlockKind::Layer { init, forward, .. } => init
                .iter()
                .chain(forward.iter())
                .all(|func| function_ready(self, func)),
            BlockKind::Function { func, .. } => function_ready(self, func),
            BlockKind::Output => self.slots.iter().any(|slot| !slot.sources.is_empty()),
            _ => true,
        }
    }
    /// The connected parameters of `func` (`ini` or `fwd`), in declaration order.
    pub fn gather_args(&self, func: &str) -> Vec<(String, Argument)> {
        self.slots
            .iter()
            .filter(|slot| slot.func == func && !slot.sources.is_empty())
            .map(|slot| {
                let arg = if slot.sources.len() == 1 && slot.whole {
                    Argument::Single(slot.sources[0].clone())
                } else {
                    Argument::Tuple(slot.sources.clone())
                };
                (slot.param.clone(), arg)
            })
            .collect()
    }
}

use super::ImportSet;
use crate::{
    graph::{Argument, Block, BlockKind, EdgeEndpoint, Graph, FORWARD, INIT},
    python::{print_module, Arg, Expr, Stmt},
    Error, Result,
};
use std::collections::{HashMap, HashSet};

fn replace_invalid(name: &str) -> String {
    let mut valid = String::with_capacity(name.len());
    let mut in_run = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            valid.push(c);
            in_run = false;
        } else if !in_run {
            valid.push('_');
            in_run = true;
        }
    }
    valid
}

/// Replaces every run of characters that are not ASCII letters or digits with `_`.
///
/// Names starting with a digit are prefixed with `node_`.
pub fn to_valid_name(name: &str) -> String {
    let valid = replace_invalid(name);
    if valid.starts_with(|c: char| c.is_ascii_digit()) {
        format!("node_{valid}")
    } else {
        valid
    }
}

/// The class name of the graph named `name`, `Module_<name>`.
pub fn class_name(name: &str) -> String {
    format!("Module_{}", replace_invalid(name))
}

/// Names of values in `forward`: `x, y, z, a, b, ...`, then `x1, y1, ...`.
#[derive(Default)]
struct FlowVars {
    count: usize,
}

impl FlowVars {
    fn next(&mut self) -> String {
        let letter = char::from(b'a' + ((self.count + 23) % 26) as u8);
        let cycle = self.count / 26;
        self.count += 1;
        if cycle == 0 {
            letter.to_string()
        } else {
            format!("{letter}{cycle}")
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
enum Scope {
    /// `__init__`, where layers are constructed.
    Init,
    /// `forward`, where layers are called.
    Forward,
}

struct ModelBuilder<'a> {
    graph: &'a Graph,
    imports: &'a mut ImportSet,
    members: HashMap<String, Expr>,
    init: Vec<Stmt>,
    flows: HashMap<String, Expr>,
    forward: Vec<Stmt>,
    flow_vars: FlowVars,
    visiting: HashSet<(String, Scope)>,
}

impl<'a> ModelBuilder<'a> {
    fn new(graph: &'a Graph, imports: &'a mut ImportSet) -> Self {
        let init = vec![Stmt::Expr(
            Expr::name("super")
                .call(Vec::new())
                .attr("__init__")
                .call(Vec::new()),
        )];
        Self {
            graph,
            imports,
            members: HashMap::new(),
            init,
            flows: HashMap::new(),
            forward: Vec::new(),
            flow_vars: FlowVars::default(),
            visiting: HashSet::new(),
        }
    }
    fn vars(&self, scope: Scope) -> &HashMap<String, Expr> {
        match scope {
            Scope::Init => &self.members,
            Scope::Forward => &self.flows,
        }
    }
    /// Assigns `value` to a new variable of the scope.
    fn define(&mut self, scope: Scope, block: &Block, value: Expr) -> Expr {
        let (var, vars, body) = match scope {
            Scope::Init => (
                Expr::name("self").attr(&to_valid_name(block.id())),
                &mut self.members,
                &mut self.init,
            ),
            Scope::Forward => (
                Expr::name(self.flow_vars.next()),
                &mut self.flows,
                &mut self.forward,
            ),
        };
        body.push(Stmt::assign(var.clone(), value));
        vars.insert(block.id().to_string(), var.clone());
        var
    }
    fn block(&self, id: &str) -> Result<&'a Block> {
        self.graph
            .block(id)
            .ok_or_else(|| Error::BlockNotFound(id.to_string()))
    }
    fn value(&mut self, scope: Scope, endpoint: &EdgeEndpoint) -> Result<Expr> {
        let block = self.block(&endpoint.node_id)?;
        let value = match block.literal_text() {
            Some(text) => Expr::raw(text),
            None => match self.vars(scope).get(block.id()) {
                Some(var) => var.clone(),
                None => self.emit(scope, block)?,
            },
        };
        Ok(match endpoint.slot_index()? {
            Some(slot) => value.index(Expr::Int(slot as i64)),
            None => value,
        })
    }
    fn args(&mut self, scope: Scope, block: &Block, func: &str) -> Result<Vec<Arg>> {
        block
            .gather_args(func)
            .into_iter()
            .map(|(param, argument)| {
                let value = match argument {
                    Argument::Single(endpoint) => self.value(scope, &endpoint)?,
                    Argument::Tuple(endpoints) => Expr::Tuple(
                        endpoints
                            .iter()
                            .map(|x| self.value(scope, x))
                            .collect::<Result<_>>()?,
                    ),
                };
                Ok(Arg::keyword(param, value))
            })
            .collect()
    }
    /// The constructed layer, `self.<id>`.
    fn member(&mut self, block: &Block) -> Result<Expr> {
        if let Some(member) = self.members.get(block.id()) {
            return Ok(member.clone());
        }
        let BlockKind::Layer {
            submodule, class, ..
        } = block.kind()
        else {
            return Err(Error::Validation(format!("{} is not a layer", block.id())));
        };
        self.imports.add(submodule.join("."));
        let args = self.args(Scope::Init, block, INIT)?;
        let mut path = submodule.clone();
        path.push(class.clone());
        let value = Expr::path(&path).call(args);
        Ok(self.define(Scope::Init, block, value))
    }
    /// Emits the statements computing `block` and returns its value.
    fn emit(&mut self, scope: Scope, block: &Block) -> Result<Expr> {
        let key = (block.id().to_string(), scope);
        if !self.visiting.insert(key.clone()) {
            return Err(Error::Cycle);
        }
        let value = match block.kind() {
            BlockKind::Layer { .. } => match scope {
                Scope::Init => self.member(block)?,
                Scope::Forward => {
                    let args = self.args(scope, block, FORWARD)?;
                    let layer = self.member(block)?;
                    self.define(scope, block, layer.call(args))
                }
            },
            BlockKind::Function { submodule, func } => {
                self.imports.add(submodule.join("."));
                let args = self.args(scope, block, FORWARD)?;
                let mut path = submodule.clone();
                path.push(func.base_name().to_string());
                let call = Expr::path(&path).call(args);
                if block.out_degree() <= 1 {
                    call
                } else {
                    self.define(scope, block, call)
                }
            }
            BlockKind::Output => {
                let mut args = self.args(scope, block, FORWARD)?;
                if args.len() == 1 {
                    args.remove(0).value
                } else {
                    Expr::Tuple(args.into_iter().map(|x| x.value).collect())
                }
            }
            BlockKind::Input | BlockKind::GroundTruth => {
                return Err(Error::Validation(format!(
                    "{} can only be used in forward",
                    block.id()
                )))
            }
            BlockKind::Literal { text } => Expr::raw(text.as_str()),
        };
        self.visiting.remove(&key);
        Ok(value)
    }
}

/// Generates `class <graph name>(torch.nn.Module)`.
///
/// Layers reachable from the outputs are constructed in `__init__` and called in `forward`,
/// whose parameters are the inputs followed by the ground truths.
///
/// **Errors**
///
/// The graph refers to missing blocks, or has a cycle.
pub fn generate_model_class(graph: &Graph, imports: &mut ImportSet) -> Result<Stmt> {
    imports.add("torch");
    let mut builder = ModelBuilder::new(graph, imports);
    let mut params = vec!["self".to_string()];
    for id in graph.inputs().iter().chain(graph.ground_truths()) {
        let name = builder.flow_vars.next();
        builder.flows.insert(id.clone(), Expr::name(name.as_str()));
        params.push(name);
    }
    let mut returns = Vec::with_capacity(graph.outputs().len());
    for id in graph.outputs() {
        let block = builder.block(id)?;
        let value = builder.emit(Scope::Forward, block)?;
        returns.push(value);
    }
    let mut forward = builder.forward;
    if !returns.is_empty() {
        forward.push(Stmt::Return(returns));
    }
    tracing::debug!("generated class {}", graph.name());
    Ok(Stmt::Class {
        name: graph.name().to_string(),
        bases: vec![Expr::dotted("torch.nn.Module")],
        body: vec![
            Stmt::def("__init__", &["self"], builder.init),
            Stmt::Def {
                name: "forward".into(),
                params,
                body: forward,
            },
        ],
    })
}

/// Prints the imports and model classes of `graphs`.
///
/// **Errors**
///
/// See [`generate_model_class`].
pub fn generate_models<'a>(graphs: impl IntoIterator<Item = &'a Graph>) -> Result<String> {
    let mut imports = ImportSet::new();
    let classes = graphs
        .into_iter()
        .map(|graph| generate_model_class(graph, &mut imports))
        .collect::<Result<Vec<_>>>()?;
    let mut module = imports.to_stmts();
    module.extend(classes);
    Ok(print_module(&module))
}

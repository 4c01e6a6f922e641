//! Typed dataflow graphs of PyTorch blocks.
//!
//! A [`Graph`] holds [`Block`]s connected by edges between [`EdgeEndpoint`]s. Every edit is
//! type-checked against the parameter slots of the target block, so a graph that passes
//! [`Graph::check_ready`] can always be printed as Python.
use crate::{catalog::Catalog, typing::Delta, typing::PyType, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

mod block;
pub use block::{
    Argument, Block, BlockKind, ParamSlot, GROUND_TRUTH, INPUT, LITERAL, OUTPUT,
};

mod endpoint;
pub use endpoint::{EdgeEndpoint, FORWARD, INIT, RETURN};

#[cfg(test)]
mod tests;

/// A graph serialized as `{id: BlockDocument}`, in block order.
pub type GraphDocument = serde_json::Map<String, serde_json::Value>;

/// One block of a [`GraphDocument`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDocument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submodule: Option<Vec<String>>,
    /// `(slot, text)` for every literal argument.
    #[serde(default)]
    pub literal_params: Vec<(String, String)>,
    /// Index of each literal among the arguments of its slot. Documents without it put
    /// literals before edges.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub literal_positions: Vec<usize>,
    /// `(slot, source endpoint)` for every edge from another block.
    #[serde(default)]
    pub source: Vec<(String, String)>,
    /// `(own endpoint, target endpoint)` for every outgoing edge.
    #[serde(default)]
    pub target: Vec<(String, String)>,
}

#[derive(Clone, Copy, Debug)]
enum DocumentArgument<'a> {
    Literal(&'a str),
    Edge(&'a str),
}

impl BlockDocument {
    /// The arguments of every slot in the order they were added.
    fn arguments(&self) -> Vec<(&str, DocumentArgument<'_>)> {
        let positioned = self.literal_positions.len() == self.literal_params.len();
        let mut slots: Vec<&str> = Vec::new();
        for (slot, _) in self.literal_params.iter().chain(self.source.iter()) {
            if !slots.contains(&slot.as_str()) {
                slots.push(slot);
            }
        }
        let mut arguments = Vec::new();
        for slot in slots {
            let edges: Vec<_> = self
                .source
                .iter()
                .filter(|(x, _)| x == slot)
                .map(|(_, source)| DocumentArgument::Edge(source))
                .collect();
            let literals: Vec<_> = self
                .literal_params
                .iter()
                .enumerate()
                .filter(|(_, (x, _))| x == slot)
                .collect();
            let mut entries = vec![None; literals.len() + edges.len()];
            let mut unplaced = Vec::new();
            for (i, (_, text)) in literals {
                let literal = DocumentArgument::Literal(text);
                let position = positioned
                    .then(|| self.literal_positions[i])
                    .filter(|p| entries.get(*p).map_or(false, Option::is_none));
                match position {
                    Some(p) => entries[p] = Some(literal),
                    None => unplaced.push(literal),
                }
            }
            let mut rest = unplaced.into_iter().chain(edges);
            for entry in entries.iter_mut().filter(|x| x.is_none()) {
                *entry = rest.next();
            }
            arguments.extend(entries.into_iter().flatten().map(|x| (slot, x)));
        }
        arguments
    }
}

/// The element `slot` of an output type.
fn select_output(output: &PyType, slot: usize) -> Option<PyType> {
    match output {
        PyType::Tuple(inners) => {
            let inner = inners.get(slot).or_else(|| match inners.last() {
                Some(last @ PyType::Variadic(_)) => Some(last),
                _ => None,
            })?;
            match inner {
                PyType::Variadic(inner) => Some(inner.as_ref().clone()),
                inner => Some(inner.clone()),
            }
        }
        PyType::Any => Some(PyType::Any),
        _ => None,
    }
}

/// A named dataflow graph.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    name: String,
    blocks: Vec<Block>,
    inputs: Vec<String>,
    ground_truths: Vec<String>,
    outputs: Vec<String>,
    literal_count: usize,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    /// The blocks, in the order they were added.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }
    pub fn block(&self, id: &str) -> Option<&Block> {
        self.blocks.iter().find(|x| x.id == id)
    }
    fn index(&self, id: &str) -> Result<usize> {
        self.blocks
            .iter()
            .position(|x| x.id == id)
            .ok_or_else(|| Error::BlockNotFound(id.to_string()))
    }
    /// Ids of the input blocks.
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }
    /// Ids of the ground truth blocks.
    pub fn ground_truths(&self) -> &[String] {
        &self.ground_truths
    }
    /// Ids of the output blocks.
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }
    /// Adds a block.
    ///
    /// `name` is `input`, `output` or `groundtruth`, or a class or function of the module
    /// `submodule` (ie `["torch", "nn"]`). Functions may be written `name$k` to select their
    /// `k`th overload.
    ///
    /// **Errors**
    ///
    /// - The id is taken or contains `-`.
    /// - The module or the symbol is not in `catalog`.
    pub fn add_block(
        &mut self,
        catalog: &Catalog,
        id: &str,
        name: &str,
        submodule: &[String],
    ) -> Result<()> {
        if id.is_empty() || id.contains('-') {
            return Err(Error::Validation(format!(
                "block id {id:?} must be non-empty and must not contain '-'"
            )));
        }
        if self.block(id).is_some() {
            return Err(Error::DuplicateBlock(id.to_string()));
        }
        let kind = match name {
            INPUT => BlockKind::Input,
            OUTPUT => BlockKind::Output,
            GROUND_TRUTH => BlockKind::GroundTruth,
            _ => Self::lookup_kind(catalog, name, submodule)?,
        };
        match kind {
            BlockKind::Input => self.inputs.push(id.to_string()),
            BlockKind::Output => self.outputs.push(id.to_string()),
            BlockKind::GroundTruth => self.ground_truths.push(id.to_string()),
            _ => (),
        }
        tracing::debug!("{}: added {name} as {id}", self.name);
        self.blocks.push(Block::new(id, kind));
        Ok(())
    }
    fn lookup_kind(catalog: &Catalog, name: &str, submodule: &[String]) -> Result<BlockKind> {
        let path = submodule.join(".");
        if catalog.module(&path).is_none() {
            return Err(Error::ModuleNotFound(path));
        }
        if !name.contains('$') {
            if let Ok(class) = catalog.class(&path, name) {
                let init = catalog.method(&path, name, "__init__")?.cloned();
                let forward = catalog.method(&path, name, "forward")?.cloned();
                return Ok(BlockKind::Layer {
                    submodule: submodule.to_vec(),
                    class: class.name.clone(),
                    init,
                    forward,
                });
            }
        }
        let func = catalog.function(&path, name)?;
        Ok(BlockKind::Function {
            submodule: submodule.to_vec(),
            func: func.clone(),
        })
    }
    /// Connects the output `source` to the parameter `target`.
    ///
    /// `source` may select an element of a tuple output with its slot, ie
    /// `topk$1-top-fwd-return-0`.
    ///
    /// **Errors**
    ///
    /// - Either block or the target slot does not exist.
    /// - The target does not accept edges.
    /// - The source type does not match the remaining type of the slot.
    pub fn connect(&mut self, source: &str, target: &str) -> Result<()> {
        let source: EdgeEndpoint = source.parse()?;
        let target: EdgeEndpoint = target.parse()?;
        self.connect_endpoints(&source, &target)
    }
    fn connect_endpoints(&mut self, source: &EdgeEndpoint, target: &EdgeEndpoint) -> Result<()> {
        let source_index = self.index(&source.node_id)?;
        let target_index = self.index(&target.node_id)?;
        let source_block = &self.blocks[source_index];
        let target_block = &self.blocks[target_index];
        if !target_block.accepts_edges() {
            return Err(Error::NotAcceptingEdges(target.node_id.clone()));
        }
        if target_block.slot(&target.func, &target.param).is_none() {
            return Err(Error::SlotNotFound(target.id_key()));
        }
        let target_end = target_block.endpoint(&target.func, &target.param);
        let literal = source_block.literal_text().map(str::to_string);
        let (source_end, value) = if literal.is_some() {
            (source_block.output_endpoint(), PyType::Any)
        } else {
            if source.func != FORWARD || source.param != RETURN {
                return Err(Error::SlotNotFound(source.id_key()));
            }
            let value = match source.slot_index()? {
                Some(slot) => select_output(source_block.output_type(), slot).ok_or_else(|| {
                    Error::SlotOutOfRange {
                        block: source.node_id.clone(),
                        slot: source.slot.clone(),
                    }
                })?,
                None => source_block.output_type().clone(),
            };
            let end = source_block.output_endpoint().with_slot(source.slot.clone());
            (end, value)
        };
        let delta = match &literal {
            Some(text) => Delta::Text(text),
            None => Delta::Type(&value),
        };
        let slot = self.blocks[target_index]
            .slot_mut(&target.func, &target.param)
            .ok_or_else(|| Error::SlotNotFound(target.id_key()))?;
        let converted = match slot.append(delta) {
            Some(converted) => converted,
            None => {
                return Err(match literal {
                    Some(value) => Error::ArgumentRejected {
                        target: target_end.id_key(),
                        value,
                    },
                    None => Error::TypeMismatch {
                        from: source_end.to_string(),
                        to: target_end.to_string(),
                    },
                })
            }
        };
        slot.sources.push(source_end.clone());
        let source_block = &mut self.blocks[source_index];
        if let (Some(converted), BlockKind::Literal { text }) =
            (converted, &mut source_block.kind)
        {
            *text = converted.text;
        }
        tracing::debug!("{}: connected {source_end} to {target_end}", self.name);
        source_block.targets.push((source_end, target_end));
        Ok(())
    }
    /// Removes the edge from `source` to `target`.
    ///
    /// Only the most recent edge of a slot can be removed. Literals left without targets are
    /// deleted.
    ///
    /// **Errors**
    ///
    /// - Either block or the target slot does not exist.
    /// - The slot has no edges, or its last edge is not from `source`.
    pub fn disconnect(&mut self, source: &str, target: &str) -> Result<()> {
        let source: EdgeEndpoint = source.parse()?;
        let target: EdgeEndpoint = target.parse()?;
        self.disconnect_endpoints(&source, &target)
    }
    fn disconnect_endpoints(
        &mut self,
        source: &EdgeEndpoint,
        target: &EdgeEndpoint,
    ) -> Result<()> {
        let source_index = self.index(&source.node_id)?;
        let target_index = self.index(&target.node_id)?;
        let source_block = &self.blocks[source_index];
        let source_end = if source_block.is_literal() {
            source_block.output_endpoint()
        } else {
            source_block
                .endpoint(&source.func, &source.param)
                .with_slot(source.slot.clone())
        };
        let target_block = &mut self.blocks[target_index];
        if !target_block.accepts_edges() {
            return Err(Error::NotAcceptingEdges(target.node_id.clone()));
        }
        let target_end = target_block.endpoint(&target.func, &target.param);
        let slot = target_block
            .slot_mut(&target.func, &target.param)
            .ok_or_else(|| Error::SlotNotFound(target.id_key()))?;
        match slot.sources.last() {
            None => return Err(Error::NoIncomingEdge(target_end.id_key())),
            Some(last) if *last != source_end => return Err(Error::EdgeOrder),
            Some(_) => (),
        }
        slot.pop();
        let source_block = &mut self.blocks[source_index];
        if let Some(position) = source_block
            .targets
            .iter()
            .position(|(own, tar)| *own == source_end && *tar == target_end)
        {
            source_block.targets.remove(position);
        }
        tracing::debug!("{}: disconnected {source_end} from {target_end}", self.name);
        if source_block.is_literal() && source_block.targets.is_empty() {
            self.blocks.remove(source_index);
        }
        Ok(())
    }
    fn next_literal_id(&mut self) -> String {
        loop {
            self.literal_count += 1;
            let id = format!("autogen$Block{}", self.literal_count);
            if self.block(&id).is_none() {
                return id;
            }
        }
    }
    /// Appends a literal argument to the parameter `target`, returning the id of the literal
    /// block.
    ///
    /// Numbers and strings are normalized to the form they are accepted as, ie `0x10` to `16`.
    ///
    /// **Errors**
    ///
    /// - The block or the slot does not exist, or does not accept edges.
    /// - The slot rejects `value`.
    pub fn fill_arg(&mut self, target: &str, value: &str) -> Result<String> {
        let target: EdgeEndpoint = target.parse()?;
        let id = self.next_literal_id();
        let literal = Block::new(
            &id,
            BlockKind::Literal {
                text: value.trim().to_string(),
            },
        );
        let source = literal.output_endpoint();
        self.blocks.push(literal);
        if let Err(e) = self.connect_endpoints(&source, &target) {
            self.blocks.pop();
            return Err(e);
        }
        Ok(id)
    }
    /// Replaces the arguments of `target` with the literal `value`.
    ///
    /// **Errors**
    ///
    /// See [`fill_arg`](Self::fill_arg).
    pub fn update_arg(&mut self, target: &str, value: &str) -> Result<String> {
        let endpoint: EdgeEndpoint = target.parse()?;
        let index = self.index(&endpoint.node_id)?;
        let block = &self.blocks[index];
        if !block.accepts_edges() {
            return Err(Error::NotAcceptingEdges(endpoint.node_id.clone()));
        }
        if block.slot(&endpoint.func, &endpoint.param).is_none() {
            return Err(Error::SlotNotFound(endpoint.id_key()));
        }
        self.clear_sources(&endpoint.node_id, &endpoint.func, &endpoint.param)?;
        self.fill_arg(target, value)
    }
    /// Removes the edges into one slot, newest first.
    fn clear_sources(&mut self, id: &str, func: &str, param: &str) -> Result<()> {
        loop {
            let block = &self.blocks[self.index(id)?];
            let Some(source) = block
                .slot(func, param)
                .and_then(|slot| slot.sources.last())
                .cloned()
            else {
                return Ok(());
            };
            let target = block.endpoint(func, param);
            self.disconnect_endpoints(&source, &target)?;
        }
    }
    /// Removes a block and the edges into it.
    ///
    /// **Errors**
    ///
    /// The block does not exist, or still has outgoing edges.
    pub fn remove_block(&mut self, id: &str) -> Result<()> {
        let block = &self.blocks[self.index(id)?];
        if block.out_degree() > 0 {
            return Err(Error::HasOutgoingEdges(id.to_string()));
        }
        let keys: Vec<(String, String)> = block
            .slots
            .iter()
            .map(|x| (x.func.clone(), x.param.clone()))
            .collect();
        for (func, param) in keys {
            self.clear_sources(id, &func, &param)?;
        }
        let index = self.index(id)?;
        self.blocks.remove(index);
        for ids in [&mut self.inputs, &mut self.outputs, &mut self.ground_truths] {
            ids.retain(|x| x != id);
        }
        tracing::debug!("{}: removed {id}", self.name);
        Ok(())
    }
    /// Sorts the block ids topologically.
    ///
    /// **Errors**
    ///
    /// Returns [`Error::Cycle`] if the graph has a cycle.
    pub fn topological_order(&self) -> Result<Vec<&str>> {
        let mut in_degree: HashMap<&str, usize> = self
            .blocks
            .iter()
            .map(|block| {
                let edges = block.slots.iter().map(|x| x.sources.len()).sum();
                (block.id.as_str(), edges)
            })
            .collect();
        let mut ready: Vec<&str> = self
            .blocks
            .iter()
            .rev()
            .map(|x| x.id.as_str())
            .filter(|id| in_degree[id] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.blocks.len());
        while let Some(id) = ready.pop() {
            order.push(id);
            let Some(block) = self.block(id) else {
                continue;
            };
            for (_, target) in block.targets.iter() {
                if let Some(count) = in_degree.get_mut(target.node_id.as_str()) {
                    *count -= 1;
                    if *count == 0 {
                        if let Some(target) = self.block(&target.node_id) {
                            ready.push(&target.id);
                        }
                    }
                }
            }
        }
        if order.len() != self.blocks.len() {
            return Err(Error::Cycle);
        }
        Ok(order)
    }
    /// Checks that the graph is acyclic and that every block has its arguments.
    ///
    /// **Errors**
    ///
    /// - [`Error::Cycle`] if the graph has a cycle.
    /// - [`Error::MissingArguments`] for the first block that is not ready.
    pub fn check_ready(&self) -> Result<()> {
        self.topological_order()?;
        for block in self.blocks.iter().filter(|x| !x.is_literal()) {
            if !block.is_ready() {
                return Err(Error::MissingArguments(block.id.clone()));
            }
        }
        Ok(())
    }
    /// Serializes the graph, omitting literal blocks which are stored with their targets.
    pub fn to_document(&self) -> Result<GraphDocument> {
        let mut document = GraphDocument::new();
        for block in self.blocks.iter().filter(|x| !x.is_literal()) {
            let mut literal_params = Vec::new();
            let mut literal_positions = Vec::new();
            let mut source = Vec::new();
            for slot in block.slots.iter() {
                let own = block.endpoint(&slot.func, &slot.param).slot_name();
                for (position, src) in slot.sources.iter().enumerate() {
                    if src.node_type == LITERAL {
                        let text = self
                            .block(&src.node_id)
                            .and_then(Block::literal_text)
                            .ok_or_else(|| Error::BlockNotFound(src.node_id.clone()))?;
                        literal_params.push((own.clone(), text.to_string()));
                        literal_positions.push(position);
                    } else {
                        source.push((own.clone(), src.to_string()));
                    }
                }
            }
            let target = block
                .targets
                .iter()
                .map(|(own, tar)| (own.to_string(), tar.to_string()))
                .collect();
            let body = BlockDocument {
                name: block.type_name().to_string(),
                submodule: block.submodule().map(<[String]>::to_vec),
                literal_params,
                literal_positions,
                source,
                target,
            };
            document.insert(block.id.clone(), serde_json::to_value(body)?);
        }
        Ok(document)
    }
    /// Rebuilds a graph from [`to_document`](Self::to_document).
    ///
    /// All blocks are added first, then the arguments of each slot in the order they were
    /// added.
    ///
    /// **Errors**
    ///
    /// Any edit of the rebuild fails.
    pub fn from_document(
        catalog: &Catalog,
        name: impl Into<String>,
        document: &GraphDocument,
    ) -> Result<Self> {
        let mut graph = Self::new(name);
        let bodies = document
            .iter()
            .map(|(id, value)| Ok((id, BlockDocument::deserialize(value)?)))
            .collect::<Result<Vec<_>>>()?;
        for (id, body) in bodies.iter() {
            let submodule = body.submodule.as_deref().unwrap_or_default();
            graph.add_block(catalog, id, &body.name, submodule)?;
        }
        for (_, body) in bodies.iter() {
            for (slot, argument) in body.arguments() {
                match argument {
                    DocumentArgument::Literal(value) => {
                        graph.fill_arg(slot, value)?;
                    }
                    DocumentArgument::Edge(source) => graph.connect(source, slot)?,
                }
            }
        }
        Ok(graph)
    }
}

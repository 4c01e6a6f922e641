use crate::{Error, Result};
use derive_more::Display;
use std::str::FromStr;

/// `__init__` parameters.
pub const INIT: &str = "ini";
/// `forward` and function parameters.
pub const FORWARD: &str = "fwd";
/// The parameter name of outputs.
pub const RETURN: &str = "return";

/// One end of an edge, written `type-id-func-param-slot`.
///
/// `slot` selects an element of a tuple output (0-based), and is empty otherwise.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Display)]
#[display(fmt = "{}-{}-{}-{}-{}", node_type, node_id, func, param, slot)]
pub struct EdgeEndpoint {
    pub node_type: String,
    pub node_id: String,
    pub func: String,
    pub param: String,
    pub slot: String,
}

impl EdgeEndpoint {
    pub fn new(
        node_type: impl Into<String>,
        node_id: impl Into<String>,
        func: impl Into<String>,
        param: impl Into<String>,
    ) -> Self {
        Self {
            node_type: node_type.into(),
            node_id: node_id.into(),
            func: func.into(),
            param: param.into(),
            slot: String::new(),
        }
    }
    pub fn with_slot(self, slot: impl Into<String>) -> Self {
        Self {
            slot: slot.into(),
            ..self
        }
    }
    /// `func-param`, identifying a parameter of the block.
    pub fn key(&self) -> String {
        format!("{}-{}", self.func, self.param)
    }
    /// `id-func-param`, used in messages.
    pub fn id_key(&self) -> String {
        format!("{}-{}-{}", self.node_id, self.func, self.param)
    }
    /// The endpoint without the slot, `type-id-func-param`.
    pub fn slot_name(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.node_type, self.node_id, self.func, self.param
        )
    }
    /// The selected tuple element.
    ///
    /// **Errors**
    ///
    /// The slot is not a number.
    pub fn slot_index(&self) -> Result<Option<usize>> {
        if self.slot.is_empty() {
            return Ok(None);
        }
        self.slot
            .parse()
            .map(Some)
            .map_err(|_| Error::MalformedEndpoint(self.to_string()))
    }
}

impl FromStr for EdgeEndpoint {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('-').collect();
        match parts.as_slice() {
            [node_type, node_id, func, param] => {
                Ok(Self::new(*node_type, *node_id, *func, *param))
            }
            [node_type, node_id, func, param, slot] => {
                Ok(Self::new(*node_type, *node_id, *func, *param).with_slot(*slot))
            }
            _ => Err(Error::MalformedEndpoint(s.to_string())),
        }
    }
}

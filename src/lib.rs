/*!
# **vtorch**
Type-checked block graphs compiled to PyTorch.

Blocks are classes and functions of Python modules, described by a [`Catalog`](catalog::Catalog)
of their signatures. A [`Graph`](graph::Graph) connects the blocks, checking every edge and
literal against the parameter types, and [`codegen`] prints the graphs as `torch.nn.Module`
classes or as a complete training script.

```no_run
# fn main() -> vtorch::Result<()> {
use vtorch::workspace::{Operation, Workspace};

let mut workspace = Workspace::builtin()?;
workspace.create_graph("net");
workspace.apply(
    "net",
    &Operation::AddBlock {
        id: "fc".into(),
        name: "Linear".into(),
        submodule: vec!["torch".into(), "nn".into()],
        position: Default::default(),
    },
)?;
println!("{:#?}", workspace.replay("net"));
# Ok(())
# }
```
*/
#![forbid(unsafe_code)]
#![warn(missing_debug_implementations)]

pub mod catalog;
pub mod codegen;
/// Settings files.
pub mod config;
mod error;
pub mod graph;
pub mod python;
pub mod typing;
pub mod workspace;

pub use error::{Error, Result};

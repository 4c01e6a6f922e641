use super::*;
use crate::codegen::TabularConfig;
use serde_json::json;

fn add(id: &str, name: &str, submodule: &[&str]) -> Operation {
    Operation::AddBlock {
        id: id.into(),
        name: name.into(),
        submodule: submodule.iter().map(|x| x.to_string()).collect(),
        position: json!({"x": 0, "y": 0}),
    }
}

fn edge(source: &str, target: &str) -> Operation {
    Operation::AddEdge {
        source: source.into(),
        target: target.into(),
    }
}

fn change(target: &str, value: &str) -> Operation {
    Operation::ChangeArgument {
        target: target.into(),
        value: value.into(),
    }
}

fn build(workspace: &mut Workspace, name: &str, operations: &[Operation]) {
    workspace.create_graph(name);
    for operation in operations {
        workspace.apply(name, operation).unwrap();
    }
}

fn model_ops() -> Vec<Operation> {
    vec![
        add("in", "input", &[]),
        add("out", "output", &[]),
        add("fc", "Linear", &["torch", "nn"]),
        change("Linear-fc-ini-in_features-", "4"),
        change("Linear-fc-ini-out_features-", "2"),
        edge("input-in-fwd-return-", "Linear-fc-fwd-input-"),
        edge("Linear-fc-fwd-return-", "output-out-fwd-input-"),
    ]
}

fn loss_ops() -> Vec<Operation> {
    vec![
        add("in", "input", &[]),
        add("gt", "groundtruth", &[]),
        add("out", "output", &[]),
        add("mse", "MSELoss", &["torch", "nn"]),
        edge("input-in-fwd-return-", "MSELoss-mse-fwd-input-"),
        edge("groundtruth-gt-fwd-return-", "MSELoss-mse-fwd-target-"),
        edge("MSELoss-mse-fwd-return-", "output-out-fwd-input-"),
    ]
}

fn tabular() -> DatasetInfo {
    DatasetInfo::Tabular {
        name: "table".into(),
        config: TabularConfig {
            file_path: "data.csv".into(),
            target_column: String::new(),
            delimiter: ",".into(),
            is_npy: false,
        },
    }
}

fn request() -> CodegenRequest {
    CodegenRequest {
        model_name: "model".into(),
        loss_name: "loss".into(),
        dataset_name: "table".into(),
        optimizer_config: OptimizerConfig {
            name: "Adam".into(),
            parameters: vec!["0.001".into()],
        },
        dataloader_params: vec!["32".into(), "True".into()],
    }
}

#[test]
fn operations_json() {
    let json = r#"[
        {"op": "addBlock", "body": {"id": "a", "name": "ReLU", "submodule": ["torch", "nn"], "position": [1, 2]}},
        {"op": "changeArgument", "body": {"target": "Linear-b-ini-in_features-", "value": "3"}},
        {"op": "removeEdge", "body": {"source": "ReLU-a-fwd-return-", "target": "output-o-fwd-input-"}}
    ]"#;
    let operations: Vec<Operation> = serde_json::from_str(json).unwrap();
    assert_eq!(
        operations[0],
        Operation::AddBlock {
            id: "a".into(),
            name: "ReLU".into(),
            submodule: vec!["torch".into(), "nn".into()],
            position: json!([1, 2]),
        }
    );
    let value = serde_json::to_value(&operations[2]).unwrap();
    assert_eq!(value["op"], "removeEdge");
    assert_eq!(value["body"]["source"], "ReLU-a-fwd-return-");
}

#[test]
fn graphs_are_created_on_demand() {
    let mut workspace = Workspace::builtin().unwrap();
    assert!(matches!(
        workspace.apply("net", &add("in", "input", &[])),
        Err(Error::GraphNotFound(_))
    ));
    assert!(workspace.replay("my net").is_empty());
    assert_eq!(workspace.graph("my net").unwrap().name(), "Module_my_net");
    assert_eq!(workspace.graph_names().collect::<Vec<_>>(), ["my net"]);
}

#[test]
fn positions() {
    let mut workspace = Workspace::builtin().unwrap();
    build(&mut workspace, "net", &[add("in", "input", &[])]);
    assert_eq!(workspace.position("net", "in"), Some(&json!({"x": 0, "y": 0})));
    let moved = Operation::SetPosition {
        id: "in".into(),
        position: json!({"x": 5, "y": 1}),
    };
    workspace.apply("net", &moved).unwrap();
    assert_eq!(workspace.position("net", "in"), Some(&json!({"x": 5, "y": 1})));
    let missing = Operation::SetPosition {
        id: "nope".into(),
        position: Value::Null,
    };
    let error = workspace.apply("net", &missing).unwrap_err();
    assert_eq!(error.to_string(), "node nope not found");
    workspace
        .apply("net", &Operation::DeleteBlock { id: "in".into() })
        .unwrap();
    assert_eq!(workspace.position("net", "in"), None);
}

#[test]
fn replay_rebuilds_the_graph() {
    let mut workspace = Workspace::builtin().unwrap();
    let mut operations = model_ops();
    operations.extend([
        add("c", "Conv2d", &["torch", "nn"]),
        change("Conv2d-c-ini-in_channels-", "1"),
        change("Conv2d-c-ini-out_channels-", "1"),
        change("Conv2d-c-ini-kernel_size-", "3"),
        Operation::FillArgument {
            target: "Conv2d-c-ini-padding-".into(),
            value: "1".into(),
        },
        Operation::FillArgument {
            target: "Conv2d-c-ini-padding-".into(),
            value: "2".into(),
        },
        edge("input-in-fwd-return-", "Conv2d-c-fwd-input-"),
    ]);
    build(&mut workspace, "model", &operations);
    let replayed = workspace.replay("model");
    assert_eq!(
        &replayed[..4],
        [
            add("in", "input", &[]),
            add("out", "output", &[]),
            add("fc", "Linear", &["torch", "nn"]),
            add("c", "Conv2d", &["torch", "nn"]),
        ]
    );
    assert!(replayed.contains(&change("Conv2d-c-ini-padding-", "1")));
    assert!(replayed.contains(&Operation::FillArgument {
        target: "Conv2d-c-ini-padding-".into(),
        value: "2".into(),
    }));
    assert!(replayed.contains(&change("Linear-fc-ini-in_features-", "4")));
    assert!(replayed.contains(&edge("input-in-fwd-return-", "Conv2d-c-fwd-input-")));

    let mut copy = Workspace::builtin().unwrap();
    build(&mut copy, "model", &replayed);
    assert_eq!(copy.replay("model"), replayed);
    assert_eq!(
        copy.generate_model_code("model").unwrap(),
        workspace.generate_model_code("model").unwrap()
    );
}

#[test]
fn documents() {
    let mut workspace = Workspace::builtin().unwrap();
    build(&mut workspace, "model", &model_ops());
    let document = workspace.export_document("model").unwrap();
    workspace.import_document("copy", &document).unwrap();
    assert_eq!(workspace.graph("copy").unwrap().name(), "Module_copy");
    assert_eq!(workspace.export_document("copy").unwrap(), document);
    assert!(matches!(
        workspace.export_document("missing"),
        Err(Error::GraphNotFound(_))
    ));
}

#[test]
fn ready_graphs() {
    let mut workspace = Workspace::builtin().unwrap();
    build(&mut workspace, "model", &model_ops());
    build(
        &mut workspace,
        "partial",
        &[add("fc", "Linear", &["torch", "nn"])],
    );
    assert_eq!(workspace.ready_graphs(), ["model"]);
    assert!(matches!(
        workspace.generate_model_code("partial"),
        Err(Error::MissingArguments(_))
    ));
    let code = workspace.generate_model_code("model").unwrap();
    assert!(code.contains("class Module_model(torch.nn.Module):"));
}

#[test]
fn training() {
    let mut workspace = Workspace::builtin().unwrap();
    build(&mut workspace, "model", &model_ops());
    build(&mut workspace, "loss", &loss_ops());
    assert!(matches!(
        workspace.generate_training(&request()),
        Err(Error::DatasetNotFound(name)) if name == "table"
    ));
    workspace.set_dataset(tabular());
    workspace.set_training_options(TrainingOptions {
        log_interval: 10,
        epochs: 3,
    });
    let code = workspace.generate_training(&request()).unwrap();
    assert!(code.starts_with("import torch\nimport torch.utils.data\nimport pandas\nimport torch.nn\n"));
    assert!(code.contains("        optimizer = torch.optim.Adam(params=self.model.parameters(), lr=0.001)\n"));
    assert!(code.contains(
        "        dataloader = torch.utils.data.DataLoader(dataset=self.dataset, batch_size=32, shuffle=True)\n"
    ));
    assert!(code.contains("        for epoch in range(3):\n"));
    assert!(code.contains("                if batch_index % 10 == 0:\n"));
    assert!(code.contains("        self.lossFunction = Module_loss()\n"));
}

#[test]
fn training_checks() {
    let mut workspace = Workspace::builtin().unwrap();
    workspace.set_dataset(tabular());
    let error = workspace.generate_training(&request()).unwrap_err();
    assert_eq!(error.to_string(), "Model model not ready");

    build(&mut workspace, "model", &model_ops());
    build(&mut workspace, "loss", &[add("mse", "MSELoss", &["torch", "nn"])]);
    let error = workspace.generate_training(&request()).unwrap_err();
    assert_eq!(error.to_string(), "Loss function loss not ready");
    let cause = std::error::Error::source(&error).unwrap();
    assert_eq!(cause.to_string(), "Node mse does not have enough arguments");

    build(&mut workspace, "loss2", &loss_ops());
    let mut swapped = request();
    swapped.model_name = "loss2".into();
    swapped.loss_name = "loss2".into();
    let error = workspace.generate_training(&swapped).unwrap_err();
    assert_eq!(
        error.to_string(),
        "Model loss2 must not have groundtruth input"
    );

    build(&mut workspace, "loss3", &loss_ops());
    workspace.apply("loss3", &add("out2", "output", &[])).unwrap();
    let mut two_outputs = request();
    two_outputs.loss_name = "loss3".into();
    let error = workspace.generate_training(&two_outputs).unwrap_err();
    assert_eq!(error.to_string(), "Loss function loss3 must have single output");
}

const UDB: &str = r#"
import torch
from torch import Tensor

class Scale(torch.nn.Module):
    def __init__(self, factor: float, bias) -> None:
        super().__init__()

    def forward(self, input: Tensor) -> Tensor:
        return input * self.factor

def double(input: Tensor):
    return input * 2
"#;

#[test]
fn user_defined_blocks() {
    let mut workspace = Workspace::builtin().unwrap();
    let warnings = workspace.add_udb("mine", UDB).unwrap();
    assert_eq!(
        warnings,
        [
            "class Scale's __init__ function has no type hint for parameter bias",
            "function double has no return type hint",
        ]
    );
    assert!(workspace.catalog().module("udb.mine").is_some());
    let warnings = workspace
        .add_udb("more", "def triple(x):\n    return x * 3\n")
        .unwrap();
    assert_eq!(
        warnings,
        [
            "function triple has no type hint for parameter x",
            "function triple has no return type hint",
        ]
    );
    assert_eq!(
        workspace.udbs().map(|(name, _)| name).collect::<Vec<_>>(),
        ["mine", "more"]
    );
    build(
        &mut workspace,
        "net",
        &[
            add("in", "input", &[]),
            add("s", "Scale", &["udb", "mine"]),
            change("Scale-s-ini-factor-", "0.5"),
            change("Scale-s-ini-bias-", "1"),
            edge("input-in-fwd-return-", "Scale-s-fwd-input-"),
        ],
    );
    assert_eq!(workspace.ready_graphs(), ["net"]);

    let error = workspace
        .add_udb("bad", "class Broken:\n    def forward(self, x: int) -> int:\n        return x\n")
        .unwrap_err();
    assert_eq!(error.to_string(), "class Broken has no __init__ function");
    assert!(workspace.catalog().module("udb.bad").is_none());
    assert!(matches!(
        workspace.add_udb("a.b", UDB),
        Err(Error::Validation(_))
    ));
}

#[test]
fn projects() {
    let mut source = Workspace::builtin().unwrap();
    source.add_udb("mine", UDB).unwrap();
    source.set_dataset(tabular());
    build(&mut source, "model", &model_ops());
    build(&mut source, "loss", &loss_ops());
    let mut project = source.to_project();
    project.training = Some(request());
    let json = serde_json::to_string(&project).unwrap();
    let project: Project = serde_json::from_str(&json).unwrap();

    let mut workspace = Workspace::builtin().unwrap();
    let code = workspace.apply_project(&project).unwrap().unwrap();
    assert_eq!(code, source.generate_training(&request()).unwrap());
    assert!(workspace.catalog().module("udb.mine").is_some());
    assert_eq!(workspace.ready_graphs(), ["loss", "model"]);
}

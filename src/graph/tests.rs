use super::*;

fn catalog() -> Catalog {
    Catalog::builtin().unwrap()
}

fn nn() -> Vec<String> {
    vec!["torch".into(), "nn".into()]
}

fn torch() -> Vec<String> {
    vec!["torch".into()]
}

fn conv_chain(catalog: &Catalog) -> Graph {
    let mut graph = Graph::new("chain");
    graph.add_block(catalog, "input", INPUT, &[]).unwrap();
    graph.add_block(catalog, "output", OUTPUT, &[]).unwrap();
    graph.add_block(catalog, "node1", "Conv2d", &nn()).unwrap();
    graph.add_block(catalog, "node2", "Tanh", &nn()).unwrap();
    graph
        .update_arg("Conv2d-node1-ini-in_channels-", "1")
        .unwrap();
    graph
        .update_arg("Conv2d-node1-ini-out_channels-", "8")
        .unwrap();
    graph
        .update_arg("Conv2d-node1-ini-kernel_size-", "(3, 3)")
        .unwrap();
    graph
        .connect("input-input-fwd-return-", "Conv2d-node1-fwd-input-")
        .unwrap();
    graph
        .connect("Conv2d-node1-fwd-return-", "Tanh-node2-fwd-input-")
        .unwrap();
    graph
        .connect("Tanh-node2-fwd-return-", "output-output-fwd-input-")
        .unwrap();
    graph
}

#[test]
fn fill_tuple_parameter() {
    let catalog = catalog();
    let mut graph = Graph::new("g");
    graph.add_block(&catalog, "node1", "Conv2d", &nn()).unwrap();
    graph
        .fill_arg("Conv2d-node1-ini-in_channels-", "123")
        .unwrap();
    assert!(matches!(
        graph.fill_arg("Conv2d-node1-ini-in_channels-", "123"),
        Err(Error::ArgumentRejected { .. })
    ));
    let block = graph.block("node1").unwrap();
    let args = block.gather_args(INIT);
    assert!(matches!(args[0], (ref name, Argument::Single(_)) if name == "in_channels"));

    graph.fill_arg("Conv2d-node1-ini-padding-", "123").unwrap();
    let padding = |graph: &Graph| {
        graph
            .block("node1")
            .unwrap()
            .gather_args(INIT)
            .into_iter()
            .find(|(name, _)| name == "padding")
            .unwrap()
            .1
    };
    assert!(matches!(padding(&graph), Argument::Single(_)));
    graph.fill_arg("Conv2d-node1-ini-padding-", "123").unwrap();
    assert!(matches!(padding(&graph), Argument::Tuple(x) if x.len() == 2));
    assert!(graph.fill_arg("Conv2d-node1-ini-padding-", "123").is_err());
    // the rejected literal is not kept
    assert_eq!(graph.blocks().len(), 4);
}

#[test]
fn update_replaces_literal() {
    let catalog = catalog();
    let mut graph = Graph::new("g");
    graph.add_block(&catalog, "node4", "sum$1", &torch()).unwrap();
    let first = graph.update_arg("sum$1-node4-fwd-dtype-", "float32").unwrap();
    assert_eq!(
        graph.block(&first).unwrap().literal_text(),
        Some("torch.float32")
    );
    let second = graph.update_arg("sum$1-node4-fwd-dtype-", "float64").unwrap();
    assert!(graph.block(&first).is_none());
    assert!(graph.block(&second).is_some());
    assert!(graph.update_arg("sum$1-node4-fwd-dtype-", "64").is_err());
    assert!(graph.block(&second).is_none());
    assert!(matches!(
        graph.update_arg("sum$1-node4-fwd-nothing-", "1"),
        Err(Error::SlotNotFound(_))
    ));
}

#[test]
fn literal_normalized() {
    let catalog = catalog();
    let mut graph = Graph::new("g");
    graph.add_block(&catalog, "fc", "Linear", &nn()).unwrap();
    let id = graph.update_arg("Linear-fc-ini-in_features-", "0x10").unwrap();
    assert_eq!(graph.block(&id).unwrap().literal_text(), Some("16"));
    let id = graph.update_arg("Linear-fc-ini-bias-", "false").unwrap();
    assert_eq!(graph.block(&id).unwrap().literal_text(), Some("False"));
    assert!(id.starts_with("autogen$Block"));
}

#[test]
fn remove_edges_in_reverse_order() {
    let catalog = catalog();
    let mut graph = Graph::new("g");
    graph.add_block(&catalog, "node4", "sum$1", &torch()).unwrap();
    graph.add_block(&catalog, "node1", INPUT, &[]).unwrap();
    graph.add_block(&catalog, "node2", "Softmax", &nn()).unwrap();
    graph
        .connect("input-node1-fwd-return-", "Softmax-node2-fwd-input-")
        .unwrap();
    graph
        .disconnect("input-node1-fwd-return-", "Softmax-node2-fwd-input-")
        .unwrap();
    assert!(matches!(
        graph.disconnect("input-node1-fwd-return-", "Softmax-node2-fwd-input-"),
        Err(Error::NoIncomingEdge(_))
    ));

    graph.add_block(&catalog, "node5", "vstack$1", &torch()).unwrap();
    graph
        .connect("sum$1-node4-fwd-return-", "vstack$1-node5-fwd-tensors-")
        .unwrap();
    graph
        .connect("Softmax-node2-fwd-return-", "vstack$1-node5-fwd-tensors-")
        .unwrap();
    assert!(matches!(
        graph.disconnect("sum$1-node4-fwd-return-", "vstack$1-node5-fwd-tensors-"),
        Err(Error::EdgeOrder)
    ));
    graph
        .disconnect("Softmax-node2-fwd-return-", "vstack$1-node5-fwd-tensors-")
        .unwrap();

    graph.remove_block("node2").unwrap();
    assert!(matches!(
        graph.remove_block("node4"),
        Err(Error::HasOutgoingEdges(_))
    ));
    graph.remove_block("node5").unwrap();
    graph.remove_block("node4").unwrap();
    graph.remove_block("node1").unwrap();
    assert!(graph.blocks().is_empty());
    assert!(graph.inputs().is_empty());
}

#[test]
fn remove_block_drops_its_literals() {
    let catalog = catalog();
    let mut graph = conv_chain(&catalog);
    assert_eq!(graph.blocks().len(), 7);
    graph
        .disconnect("Tanh-node2-fwd-return-", "output-output-fwd-input-")
        .unwrap();
    graph.remove_block("node2").unwrap();
    graph.remove_block("node1").unwrap();
    let ids: Vec<_> = graph.blocks().iter().map(Block::id).collect();
    assert_eq!(ids, ["input", "output"]);
    assert!(graph.block("input").unwrap().targets().is_empty());
}

#[test]
fn tuple_outputs() {
    let catalog = catalog();
    let mut graph = Graph::new("g");
    graph.add_block(&catalog, "top", "topk$1", &torch()).unwrap();
    graph.add_block(&catalog, "parts", "split$1", &torch()).unwrap();
    graph.add_block(&catalog, "act", "Tanh", &nn()).unwrap();
    graph.add_block(&catalog, "act2", "Tanh", &nn()).unwrap();
    graph
        .connect("topk$1-top-fwd-return-0", "Tanh-act-fwd-input-")
        .unwrap();
    assert!(matches!(
        graph.connect("topk$1-top-fwd-return-2", "Tanh-act2-fwd-input-"),
        Err(Error::SlotOutOfRange { .. })
    ));
    assert!(matches!(
        graph.connect("topk$1-top-fwd-return-", "Tanh-act2-fwd-input-"),
        Err(Error::TypeMismatch { .. })
    ));
    graph
        .connect("split$1-parts-fwd-return-5", "Tanh-act2-fwd-input-")
        .unwrap();
    let sources = graph
        .block("act2")
        .unwrap()
        .slot(FORWARD, "input")
        .unwrap()
        .sources();
    assert_eq!(sources[0].slot_index().unwrap(), Some(5));
}

#[test]
fn type_mismatch() {
    let catalog = catalog();
    let mut graph = Graph::new("g");
    graph.add_block(&catalog, "fc", "Linear", &nn()).unwrap();
    graph.add_block(&catalog, "conv", "Conv2d", &nn()).unwrap();
    let err = graph
        .connect("Linear-fc-fwd-return-", "Conv2d-conv-ini-in_channels-")
        .unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { .. }));
    assert!(matches!(
        graph.connect("Linear-fc-fwd-return-", "Conv2d-conv-fwd-missing-"),
        Err(Error::SlotNotFound(_))
    ));
    assert!(graph.block("fc").unwrap().targets().is_empty());
}

#[test]
fn inputs_do_not_accept_edges() {
    let catalog = catalog();
    let mut graph = Graph::new("g");
    graph.add_block(&catalog, "in", INPUT, &[]).unwrap();
    graph.add_block(&catalog, "fc", "Linear", &nn()).unwrap();
    assert!(matches!(
        graph.connect("Linear-fc-fwd-return-", "input-in-fwd-input-"),
        Err(Error::NotAcceptingEdges(_))
    ));
}

#[test]
fn add_block_errors() {
    let catalog = catalog();
    let mut graph = Graph::new("g");
    graph.add_block(&catalog, "fc", "Linear", &nn()).unwrap();
    assert!(matches!(
        graph.add_block(&catalog, "fc", "Linear", &nn()),
        Err(Error::DuplicateBlock(_))
    ));
    assert!(matches!(
        graph.add_block(&catalog, "x", "Linear", &["torch".to_string(), "fake".to_string()]),
        Err(Error::ModuleNotFound(_))
    ));
    assert!(matches!(
        graph.add_block(&catalog, "x", "Missing", &nn()),
        Err(Error::SymbolNotFound { .. })
    ));
    assert!(graph.add_block(&catalog, "a-b", "Linear", &nn()).is_err());
    // functions resolve without an overload index
    graph.add_block(&catalog, "r", "relu", &torch()).unwrap();
    assert_eq!(graph.block("r").unwrap().type_name(), "relu$1");
}

#[test]
fn detects_cycles() {
    let catalog = catalog();
    let mut graph = Graph::new("g");
    graph.add_block(&catalog, "a", "Tanh", &nn()).unwrap();
    graph.add_block(&catalog, "b", "Tanh", &nn()).unwrap();
    graph.connect("Tanh-a-fwd-return-", "Tanh-b-fwd-input-").unwrap();
    graph.connect("Tanh-b-fwd-return-", "Tanh-a-fwd-input-").unwrap();
    let err = graph.check_ready().unwrap_err();
    assert!(matches!(err, Error::Cycle));
    assert_eq!(err.to_string(), "Detects rings in the graph");
}

#[test]
fn readiness() {
    let catalog = catalog();
    let mut graph = Graph::new("g");
    graph.add_block(&catalog, "node1", INPUT, &[]).unwrap();
    graph.add_block(&catalog, "node3", OUTPUT, &[]).unwrap();
    graph.add_block(&catalog, "node2", "Linear", &nn()).unwrap();
    graph
        .connect("input-node1-fwd-return-", "Linear-node2-fwd-input-")
        .unwrap();
    graph
        .connect("Linear-node2-fwd-return-", "output-node3-fwd-input-")
        .unwrap();
    let err = graph.check_ready().unwrap_err();
    assert_eq!(err.to_string(), "Node node2 does not have enough arguments");
    graph
        .update_arg("Linear-node2-ini-in_features-", "123")
        .unwrap();
    graph
        .update_arg("Linear-node2-ini-out_features-", "456")
        .unwrap();
    graph.check_ready().unwrap();
    let order = graph.topological_order().unwrap();
    let position = |id: &str| order.iter().position(|x| *x == id).unwrap();
    assert!(position("node1") < position("node2"));
    assert!(position("node2") < position("node3"));
}

#[test]
fn document_round_trip() {
    let catalog = catalog();
    let graph = conv_chain(&catalog);
    graph.check_ready().unwrap();
    let document = graph.to_document().unwrap();
    let ids: Vec<_> = document.keys().map(String::as_str).collect();
    assert_eq!(ids, ["input", "output", "node1", "node2"]);
    let conv = BlockDocument::deserialize(&document["node1"]).unwrap();
    assert_eq!(conv.name, "Conv2d");
    assert_eq!(conv.submodule.as_deref(), Some(nn().as_slice()));
    assert_eq!(
        conv.literal_params[2],
        (
            "Conv2d-node1-ini-kernel_size".to_string(),
            "(3, 3)".to_string()
        )
    );
    assert_eq!(
        conv.source,
        [(
            "Conv2d-node1-fwd-input".to_string(),
            "input-input-fwd-return-".to_string()
        )]
    );
    let json = serde_json::to_value(&document).unwrap();
    assert!(json["input"].get("submodule").is_none());
    assert!(json["node1"]["literalParams"].is_array());

    let rebuilt = Graph::from_document(&catalog, "chain", &document).unwrap();
    rebuilt.check_ready().unwrap();
    assert_eq!(rebuilt.to_document().unwrap(), document);
    assert_eq!(rebuilt.inputs(), ["input"]);
    assert_eq!(rebuilt.outputs(), ["output"]);
}

#[test]
fn document_keeps_multi_literal_tuples() {
    let catalog = catalog();
    let mut graph = Graph::new("g");
    graph.add_block(&catalog, "pool", "MaxPool2d", &nn()).unwrap();
    graph.fill_arg("MaxPool2d-pool-ini-kernel_size-", "2").unwrap();
    graph.fill_arg("MaxPool2d-pool-ini-kernel_size-", "3").unwrap();
    let document = graph.to_document().unwrap();
    let rebuilt = Graph::from_document(&catalog, "g", &document).unwrap();
    let args = rebuilt.block("pool").unwrap().gather_args(INIT);
    assert!(matches!(&args[0].1, Argument::Tuple(x) if x.len() == 2));
}

#[test]
fn document_keeps_mixed_tuple_order() {
    let catalog = catalog();
    let mut graph = Graph::new("g");
    graph.add_block(&catalog, "in", INPUT, &[]).unwrap();
    graph.add_block(&catalog, "c", "cat$1", &torch()).unwrap();
    graph
        .connect("input-in-fwd-return-", "cat$1-c-fwd-tensors-")
        .unwrap();
    graph
        .fill_arg("cat$1-c-fwd-tensors-", "torch.tensor([1.0])")
        .unwrap();
    let kinds = |graph: &Graph| match &graph.block("c").unwrap().gather_args(FORWARD)[0].1 {
        Argument::Tuple(sources) => sources
            .iter()
            .map(|x| x.node_type.clone())
            .collect::<Vec<_>>(),
        Argument::Single(_) => Vec::new(),
    };
    assert_eq!(kinds(&graph), [INPUT, LITERAL]);

    let document = graph.to_document().unwrap();
    let cat = BlockDocument::deserialize(&document["c"]).unwrap();
    assert_eq!(cat.literal_positions, [1]);
    let rebuilt = Graph::from_document(&catalog, "g", &document).unwrap();
    assert_eq!(kinds(&rebuilt), [INPUT, LITERAL]);
    assert_eq!(rebuilt.to_document().unwrap(), document);

    // documents without positions put literals first
    let mut legacy = document.clone();
    legacy["c"]
        .as_object_mut()
        .unwrap()
        .remove("literalPositions");
    let rebuilt = Graph::from_document(&catalog, "g", &legacy).unwrap();
    assert_eq!(kinds(&rebuilt), [LITERAL, INPUT]);
}

#[test]
fn output_needs_an_edge() {
    let catalog = catalog();
    let mut graph = Graph::new("g");
    graph.add_block(&catalog, "in", INPUT, &[]).unwrap();
    graph.add_block(&catalog, "out", OUTPUT, &[]).unwrap();
    let err = graph.check_ready().unwrap_err();
    assert!(matches!(err, Error::MissingArguments(ref id) if id == "out"));
    graph
        .connect("input-in-fwd-return-", "output-out-fwd-input-")
        .unwrap();
    graph.check_ready().unwrap();
}

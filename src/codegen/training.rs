use super::{
    call_with_signature, define_dataset, generate_model_class, user_value, DatasetInfo,
    ImportSet,
};
use crate::{
    catalog::Catalog,
    graph::Graph,
    python::{print_module, Arg, Expr, Stmt},
    Result,
};
use serde::{Deserialize, Serialize};

const MODEL: &str = "self.model";
const LOSS: &str = "self.lossFunction";
const DATASET: &str = "self.dataset";

/// An optimizer of `torch.optim` and its arguments after the model parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<String>,
}

/// Shape of the generated training loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrainingOptions {
    /// Print the loss every `log_interval` batches.
    pub log_interval: usize,
    pub epochs: usize,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            log_interval: 100,
            epochs: 1,
        }
    }
}

/// `torch.optim.<name>(params=<model>.parameters(), ...)`.
pub fn optimizer_call(
    optimizer: &OptimizerConfig,
    catalog: &Catalog,
    imports: &mut ImportSet,
    model: &str,
) -> Expr {
    imports.add("torch.optim");
    let mut values = vec![Some(Expr::raw(format!("{model}.parameters()")))];
    values.extend(optimizer.parameters.iter().map(|x| user_value(x)));
    let params = catalog.init_parameters("torch.optim", &optimizer.name);
    call_with_signature(
        Expr::dotted("torch.optim").attr(&optimizer.name),
        values,
        params,
    )
}

/// `torch.utils.data.DataLoader(dataset=<dataset>, ...)`.
pub fn dataloader_call(
    args: &[String],
    catalog: &Catalog,
    imports: &mut ImportSet,
    dataset: &str,
) -> Expr {
    imports.add("torch.utils.data");
    let mut values = vec![Some(Expr::raw(dataset))];
    values.extend(args.iter().map(|x| user_value(x)));
    let params = catalog.init_parameters("torch.utils.data", "DataLoader");
    call_with_signature(
        Expr::dotted("torch.utils.data.DataLoader"),
        values,
        params,
    )
}

fn construct(graph: &Graph) -> Expr {
    Expr::name(graph.name()).call(Vec::new())
}

fn training_loop(options: &TrainingOptions) -> Stmt {
    let log = Stmt::If {
        cond: Expr::name("batch_index")
            .binop("%", Expr::Int(options.log_interval.max(1) as i64))
            .binop("==", Expr::Int(0)),
        body: vec![Stmt::Expr(Expr::name("print").call(vec![Arg::positional(
            Expr::str("Batch: {}, Training Loss: {}").attr("format").call(vec![
                Arg::positional(Expr::name("batch_index")),
                Arg::positional(Expr::name("loss")),
            ]),
        )]))],
        orelse: Vec::new(),
    };
    let batches = Stmt::For {
        target: Expr::raw("batch_index, (inputs, targets)"),
        iter: Expr::name("enumerate").call(vec![Arg::positional(Expr::name("dataloader"))]),
        body: vec![
            Stmt::raw("optimizer.zero_grad()"),
            Stmt::raw(format!("outputs = {MODEL}(inputs)")),
            Stmt::raw(format!("loss = {LOSS}(outputs, targets)")),
            Stmt::raw("loss.backward()"),
            Stmt::raw("optimizer.step()"),
            log,
        ],
    };
    Stmt::For {
        target: Expr::name("epoch"),
        iter: Expr::name("range").call(vec![Arg::positional(Expr::Int(options.epochs as i64))]),
        body: vec![batches],
    }
}

/// Prints the training script.
///
/// The script defines the dataset, model and loss classes, then `class Training` whose `train`
/// method runs the optimizer over the dataloader, and a `__main__` guard running it.
///
/// **Errors**
///
/// The dataset or either graph cannot be generated.
#[allow(clippy::too_many_arguments)]
pub fn generate_training(
    dataset: &DatasetInfo,
    model: &Graph,
    loss: &Graph,
    optimizer: &OptimizerConfig,
    loader: &[String],
    catalog: &Catalog,
    options: &TrainingOptions,
) -> Result<String> {
    let mut imports = ImportSet::new();
    let dataset = define_dataset(dataset, catalog, &mut imports)?;
    let model_class = generate_model_class(model, &mut imports)?;
    let loss_class = generate_model_class(loss, &mut imports)?;

    let init = vec![
        Stmt::assign(Expr::raw(DATASET), dataset.construction),
        Stmt::assign(Expr::raw(MODEL), construct(model)),
        Stmt::assign(Expr::raw(LOSS), construct(loss)),
    ];
    let train = vec![
        Stmt::assign(
            Expr::name("optimizer"),
            optimizer_call(optimizer, catalog, &mut imports, MODEL),
        ),
        Stmt::assign(
            Expr::name("dataloader"),
            dataloader_call(loader, catalog, &mut imports, DATASET),
        ),
        training_loop(options),
    ];
    let training = Stmt::Class {
        name: "Training".into(),
        bases: Vec::new(),
        body: vec![
            Stmt::def("__init__", &["self"], init),
            Stmt::def("train", &["self"], train),
        ],
    };
    let main = Stmt::If {
        cond: Expr::name("__name__").binop("==", Expr::str("__main__")),
        body: vec![Stmt::Expr(
            Expr::name("Training")
                .call(Vec::new())
                .attr("train")
                .call(Vec::new()),
        )],
        orelse: Vec::new(),
    };

    let mut module = imports.to_stmts();
    module.extend(dataset.definitions);
    module.push(model_class);
    module.push(loss_class);
    module.push(training);
    module.push(main);
    tracing::info!(
        "generated training of {} with loss {}",
        model.name(),
        loss.name()
    );
    Ok(print_module(&module))
}

use super::{call_with_signature, user_value, ImportSet};
use crate::{
    catalog::Catalog,
    python::{Arg, Expr, Stmt},
    Error, Result,
};
use serde::{Deserialize, Serialize};

/// A transform of `torchvision.transforms` and its arguments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformInstance {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<DatasetParam>,
}

/// An argument of a dataset or a transform.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DatasetParam {
    /// Python source, blank if not given.
    Value(String),
    /// Printed as `torchvision.transforms.Compose([...])`.
    Transforms(Vec<TransformInstance>),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabularConfig {
    pub file_path: String,
    /// A column name of a CSV file, or a column index of an NPY file. Defaults to the last
    /// column.
    #[serde(default)]
    pub target_column: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default, rename = "isNPY")]
    pub is_npy: bool,
}

fn default_delimiter() -> String {
    ",".into()
}

/// The delimiter as typed in the editor, which may be quoted and may use escapes like `\t`.
fn delimiter_value(text: &str) -> String {
    let mut chars = text.chars();
    let inner = match (chars.next(), chars.next_back()) {
        (Some(first), Some(last)) if first == last && (first == '"' || first == '\'') => {
            chars.as_str()
        }
        _ => text,
    };
    let mut value = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            value.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => value.push('\t'),
            Some('n') => value.push('\n'),
            Some('r') => value.push('\r'),
            Some(escaped) => value.push(escaped),
            None => value.push('\\'),
        }
    }
    value
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentationConfig {
    pub img_dir: String,
    pub mask_dir: String,
    #[serde(default)]
    pub transforms: Vec<TransformInstance>,
}

/// A dataset, stored in the workspace under its name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DatasetInfo {
    /// A dataset of `torchvision.datasets`.
    #[serde(rename = "TorchvisionDatasetInfo", rename_all = "camelCase")]
    Torchvision {
        name: String,
        torchvision_dataset_name: String,
        #[serde(default)]
        init_func_params: Vec<DatasetParam>,
    },
    /// Rows of a CSV or NPY file.
    #[serde(rename = "TabularDatasetInfo")]
    Tabular { name: String, config: TabularConfig },
    /// Images and masks with the same sorted file names.
    #[serde(rename = "SegmentationDatasetInfo")]
    Segmentation {
        name: String,
        config: SegmentationConfig,
    },
}

impl DatasetInfo {
    pub fn name(&self) -> &str {
        match self {
            Self::Torchvision { name, .. }
            | Self::Tabular { name, .. }
            | Self::Segmentation { name, .. } => name,
        }
    }
}

/// The definitions of a dataset and the expression constructing it.
#[derive(Clone, Debug)]
pub struct GeneratedDataset {
    pub definitions: Vec<Stmt>,
    pub construction: Expr,
}

fn transform_call(catalog: &Catalog, transform: &TransformInstance) -> Expr {
    let values = transform
        .parameters
        .iter()
        .map(|x| param_value(catalog, x))
        .collect();
    let params = catalog.init_parameters("torchvision.transforms", &transform.name);
    call_with_signature(
        Expr::dotted("torchvision.transforms").attr(&transform.name),
        values,
        params,
    )
}

fn compose(catalog: &Catalog, transforms: &[TransformInstance]) -> Expr {
    let transforms = transforms.iter().map(|x| transform_call(catalog, x)).collect();
    Expr::dotted("torchvision.transforms.Compose").call(vec![Arg::positional(Expr::List(transforms))])
}

fn param_value(catalog: &Catalog, param: &DatasetParam) -> Option<Expr> {
    match param {
        DatasetParam::Value(text) => user_value(text),
        DatasetParam::Transforms(transforms) if transforms.is_empty() => None,
        DatasetParam::Transforms(transforms) => Some(compose(catalog, transforms)),
    }
}

fn torchvision(
    catalog: &Catalog,
    imports: &mut ImportSet,
    dataset_name: &str,
    params: &[DatasetParam],
) -> GeneratedDataset {
    imports.add("torchvision");
    imports.add("torchvision.transforms");
    imports.add("torchvision.datasets");
    let values = params.iter().map(|x| param_value(catalog, x)).collect();
    let signature = catalog.init_parameters("torchvision.datasets", dataset_name);
    if signature.is_none() {
        tracing::warn!("no signature for torchvision.datasets.{dataset_name}, passing arguments by position");
    }
    let construction = call_with_signature(
        Expr::dotted("torchvision.datasets").attr(dataset_name),
        values,
        signature,
    );
    GeneratedDataset {
        definitions: Vec::new(),
        construction,
    }
}

fn dataset_class(name: &str, init: Vec<Stmt>, len: &str, get_item: Vec<Stmt>) -> Stmt {
    Stmt::Class {
        name: name.to_string(),
        bases: vec![Expr::dotted("torch.utils.data.Dataset")],
        body: vec![
            Stmt::def("__init__", &["self"], init),
            Stmt::def(
                "__len__",
                &["self"],
                vec![Stmt::raw(format!("return len({len})"))],
            ),
            Stmt::def("__getitem__", &["self", "idx"], get_item),
        ],
    }
}

fn self_attr(name: &str) -> Expr {
    Expr::name("self").attr(name)
}

const TO_TENSORS: &str =
    "return torch.tensor(x, dtype=torch.float32), torch.tensor(y, dtype=torch.float32)";

fn tabular(imports: &mut ImportSet, config: &TabularConfig) -> Result<GeneratedDataset> {
    imports.add("torch");
    imports.add("torch.utils.data");
    let mut init = Vec::new();
    let get_item;
    if config.is_npy {
        imports.add("numpy");
        init.push(Stmt::assign(
            self_attr("data"),
            Expr::dotted("numpy.load").call(vec![Arg::positional(Expr::str(&config.file_path))]),
        ));
        let column = match config.target_column.trim() {
            "" => -1,
            column => column.parse::<i64>().map_err(|_| {
                Error::Validation(format!(
                    "target column {column:?} of an NPY dataset must be a column index"
                ))
            })?,
        };
        init.push(Stmt::assign(self_attr("targetColumn"), Expr::Int(column)));
        get_item = vec![
            Stmt::raw("x = numpy.delete(self.data[idx], self.targetColumn)"),
            Stmt::raw("y = self.data[idx, self.targetColumn]"),
            Stmt::raw(TO_TENSORS),
        ];
    } else {
        imports.add("pandas");
        init.push(Stmt::assign(
            self_attr("data"),
            Expr::dotted("pandas.read_csv").call(vec![
                Arg::positional(Expr::str(&config.file_path)),
                Arg::keyword("delimiter", Expr::str(&delimiter_value(&config.delimiter))),
            ]),
        ));
        let column = match config.target_column.trim() {
            "" => Expr::raw("self.data.columns[-1]"),
            column => Expr::str(column),
        };
        init.push(Stmt::assign(self_attr("targetColumn"), column));
        get_item = vec![
            Stmt::raw("x = self.data.drop(columns=[self.targetColumn]).iloc[idx].values"),
            Stmt::raw("y = self.data[self.targetColumn].iloc[idx]"),
            Stmt::raw(TO_TENSORS),
        ];
    }
    let class = dataset_class("TabularDataset", init, "self.data", get_item);
    Ok(GeneratedDataset {
        definitions: vec![class],
        construction: Expr::name("TabularDataset").call(Vec::new()),
    })
}

fn segmentation(
    catalog: &Catalog,
    imports: &mut ImportSet,
    config: &SegmentationConfig,
) -> GeneratedDataset {
    for path in ["torch", "torch.utils.data", "os", "PIL.Image"] {
        imports.add(path);
    }
    let transforms = !config.transforms.is_empty();
    if transforms {
        imports.add("torchvision");
        imports.add("torchvision.transforms");
    }
    let mut init = vec![
        Stmt::assign(self_attr("imgDir"), Expr::str(&config.img_dir)),
        Stmt::assign(self_attr("maskDir"), Expr::str(&config.mask_dir)),
    ];
    if transforms {
        init.push(Stmt::assign(
            self_attr("transforms"),
            compose(catalog, &config.transforms),
        ));
    }
    init.push(Stmt::raw("self.imgPaths = sorted(os.listdir(self.imgDir))"));
    init.push(Stmt::raw("self.maskPaths = sorted(os.listdir(self.maskDir))"));
    let mut get_item = vec![
        Stmt::raw("imgPath = os.path.join(self.imgDir, self.imgPaths[idx])"),
        Stmt::raw("maskPath = os.path.join(self.maskDir, self.maskPaths[idx])"),
        Stmt::raw("image = PIL.Image.open(imgPath).convert(\"RGB\")"),
        Stmt::raw("mask = PIL.Image.open(maskPath).convert(\"L\")"),
    ];
    if transforms {
        get_item.push(Stmt::raw("image = self.transforms(image)"));
        get_item.push(Stmt::raw("mask = self.transforms(mask)"));
    }
    get_item.push(Stmt::raw("return image, mask"));
    let class = dataset_class("SegmentationDataset", init, "self.imgPaths", get_item);
    GeneratedDataset {
        definitions: vec![class],
        construction: Expr::name("SegmentationDataset").call(Vec::new()),
    }
}

/// Generates the dataset definitions and its construction.
///
/// **Errors**
///
/// The target column of an NPY dataset is not an integer.
pub fn define_dataset(
    dataset: &DatasetInfo,
    catalog: &Catalog,
    imports: &mut ImportSet,
) -> Result<GeneratedDataset> {
    match dataset {
        DatasetInfo::Torchvision {
            torchvision_dataset_name,
            init_func_params,
            ..
        } => Ok(torchvision(
            catalog,
            imports,
            torchvision_dataset_name,
            init_func_params,
        )),
        DatasetInfo::Tabular { config, .. } => tabular(imports, config),
        DatasetInfo::Segmentation { config, .. } => Ok(segmentation(catalog, imports, config)),
    }
}

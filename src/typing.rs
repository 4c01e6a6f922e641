//! Python type model used to check block arguments.
//!
//! Annotations are read from signatures as [`TypeInfo`] and evaluated into [`PyType`]. A
//! parameter slot of a block keeps a history of [`PyType`]s: each connected value is checked with
//! [`PyType::derive`], which consumes one element of a tuple type and returns the rest.
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};


const VARIADIC: &str = "Variadic";

/// Members of the torch enums that can be typed in as literals.
const ENUMS: &[(&str, &[&str])] = &[
    (
        "dtype",
        &[
            "float32",
            "float",
            "float64",
            "double",
            "float16",
            "bfloat16",
            "float8_e4m3fn",
            "float8_e4m3fnuz",
            "float8_e5m2",
            "float8_e5m2fnuz",
            "half",
            "uint8",
            "int8",
            "int16",
            "short",
            "int32",
            "int",
            "int64",
            "long",
            "complex32",
            "complex64",
            "chalf",
            "cfloat",
            "complex128",
            "cdouble",
            "quint8",
            "qint8",
            "qint32",
            "bool",
            "quint4x2",
            "quint2x4",
            "bits1x8",
            "bits2x4",
            "bits4x2",
            "bits8",
            "bits16",
        ],
    ),
    (
        "layout",
        &[
            "strided",
            "sparse_coo",
            "sparse_csr",
            "sparse_csc",
            "sparse_bsr",
            "sparse_bsc",
            "_mkldnn",
            "jagged",
        ],
    ),
    (
        "memory_format",
        &[
            "contiguous_format",
            "channels_last",
            "channels_last_3d",
            "preserve_format",
        ],
    ),
    (
        "qscheme",
        &[
            "per_tensor_affine",
            "per_channel_affine",
            "per_tensor_symmetric",
            "per_channel_symmetric",
            "per_channel_affine_float_qparams",
        ],
    ),
];

fn enum_members(name: &str) -> Option<&'static [&'static str]> {
    ENUMS
        .iter()
        .find(|(enum_name, _)| *enum_name == name)
        .map(|(_, members)| *members)
}

/// An unevaluated type annotation, ie `Union[int, Tuple[int, int]]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtypes: Vec<TypeInfo>,
}

impl TypeInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subtypes: Vec::new(),
        }
    }
    pub fn with_subtypes(name: impl Into<String>, subtypes: Vec<TypeInfo>) -> Self {
        Self {
            name: name.into(),
            subtypes,
        }
    }
}

impl Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.subtypes.is_empty() {
            f.write_str("[")?;
            for (i, subtype) in self.subtypes.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                subtype.fmt(f)?;
            }
            f.write_str("]")?;
        }
        Ok(())
    }
}

fn strip_quotes(text: &str) -> &str {
    for quote in ['"', '\''] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            return &text[1..text.len() - 1];
        }
    }
    text
}

fn normalize_name(name: &str) -> &str {
    let name = name.trim();
    ["typing.", "torch.", "builtins."]
        .iter()
        .find_map(|prefix| name.strip_prefix(prefix))
        .unwrap_or(name)
}

/// Parses an annotation.
///
/// `...` is `Variadic`, `T...` is `Variadic[T]`, and `A | B` is `Union[A, B]`. Quoted forward
/// references are unquoted.
pub fn parse_type_string(text: &str) -> TypeInfo {
    let text = strip_quotes(text.trim()).trim();
    if text == "..." {
        return TypeInfo::new(VARIADIC);
    }
    let alternatives = split_top_level(text, '|').unwrap_or_else(|| vec![text]);
    if alternatives.len() > 1 {
        return TypeInfo::with_subtypes(
            "Union",
            alternatives.into_iter().map(parse_type_string).collect(),
        );
    }
    let (body, variadic) = match text.strip_suffix("...") {
        Some(rest) if !rest.trim().is_empty() => (rest.trim_end(), true),
        _ => (text, false),
    };
    let info = match body.find('[') {
        Some(open) if open > 0 && body.ends_with(']') => {
            let inner = &body[open + 1..body.len() - 1];
            let subtypes = split_top_level(inner, ',')
                .unwrap_or_else(|| vec![inner])
                .into_iter()
                .filter(|x| !x.trim().is_empty())
                .map(parse_type_string)
                .collect();
            TypeInfo::with_subtypes(normalize_name(&body[..open]), subtypes)
        }
        _ => TypeInfo::new(normalize_name(body)),
    };
    if variadic {
        TypeInfo::with_subtypes(VARIADIC, vec![info])
    } else {
        info
    }
}

/// Splits `text` at `separator` where it is not nested in brackets or quotes.
///
/// Returns `None` if the brackets are unbalanced.
pub(crate) fn split_top_level(text: &str, separator: char) -> Option<Vec<&str>> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if c == '\\' {
            escaped = true;
            continue;
        }
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ if c == separator && depth == 0 => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => (),
        }
    }
    if depth != 0 {
        return None;
    }
    parts.push(&text[start..]);
    Some(parts)
}

/// Splits the inside of a list or tuple literal into trimmed items.
///
/// A trailing comma does not produce an item.
fn split_items(inner: &str) -> Option<Vec<&str>> {
    if inner.trim().is_empty() {
        return Some(Vec::new());
    }
    let mut items: Vec<&str> = split_top_level(inner, ',')?
        .into_iter()
        .map(str::trim)
        .collect();
    if items.len() > 1 && items.last().map_or(false, |x| x.is_empty()) {
        items.pop();
    }
    Some(items)
}

fn parse_int(text: &str) -> Option<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let lower = digits.to_ascii_lowercase();
    let value = if let Some(hex) = lower.strip_prefix("0x") {
        i64::from_str_radix(hex, 16).ok()?
    } else if let Some(oct) = lower.strip_prefix("0o") {
        i64::from_str_radix(oct, 8).ok()?
    } else if let Some(bin) = lower.strip_prefix("0b") {
        i64::from_str_radix(bin, 2).ok()?
    } else if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        digits.parse().ok()?
    } else {
        // integral floats, ie `1.0` or `1e3`
        let value: f64 = digits.parse().ok()?;
        if !value.is_finite() || value.fract() != 0.0 || value.abs() >= i64::MAX as f64 {
            return None;
        }
        value as i64
    };
    Some(if negative { -value } else { value })
}

fn is_float(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    if lower.contains("inf") || lower.contains("nan") {
        return false;
    }
    text.parse::<f64>().is_ok() || parse_int(text).is_some()
}

/// An evaluated Python type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PyType {
    Int,
    Str,
    Bool,
    Float,
    List(Box<PyType>),
    Tuple(Vec<PyType>),
    Optional(Box<PyType>),
    Union(Vec<PyType>),
    /// The repeated tail of a tuple, ie `Tuple[int, ...]`.
    Variadic(Box<PyType>),
    Tensor(Box<PyType>),
    /// Any other named type, compared by name.
    Adt {
        name: String,
        args: Vec<PyType>,
    },
    None,
    Enum(String),
    Any,
}

/// A literal accepted by a [`PyType`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Converted {
    /// The normalized text to emit.
    pub text: String,
    /// The type the literal was accepted as.
    pub actual: PyType,
}

/// A value connected to a parameter slot.
#[derive(Clone, Copy, Debug)]
pub enum Delta<'a> {
    /// A typed-in literal.
    Text(&'a str),
    /// The output type of an upstream block.
    Type(&'a PyType),
}

/// The result of [`PyType::derive`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Derivation {
    /// Set when the delta was a literal.
    pub converted: Option<Converted>,
    /// What remains of the type after the delta was consumed.
    pub rest: PyType,
}

fn uniform_tuple(len: usize, element: PyType) -> PyType {
    PyType::Tuple(vec![element; len])
}

fn variadic_tuple(element: PyType) -> PyType {
    PyType::Tuple(vec![
        element.clone(),
        PyType::Variadic(Box::new(element)),
    ])
}

fn optional(inner: PyType) -> PyType {
    PyType::Optional(Box::new(inner))
}

/// `_size_N_t`, `_size_N_opt_t` and `_ratio_N_t`, where `N` may be `any`.
fn sized_alias(name: &str) -> Option<PyType> {
    let (len, element) = if let Some(rest) = name.strip_prefix("_size_") {
        match rest.strip_suffix("_opt_t") {
            Some(len) => (len, optional(PyType::Int)),
            None => (rest.strip_suffix("_t")?, PyType::Int),
        }
    } else {
        let len = name.strip_prefix("_ratio_")?.strip_suffix("_t")?;
        (len, PyType::Float)
    };
    let tuple = if len == "any" {
        variadic_tuple(element.clone())
    } else {
        uniform_tuple(len.parse().ok()?, element.clone())
    };
    Some(PyType::Union(vec![element, tuple]))
}

impl PyType {
    /// Evaluates an annotation.
    ///
    /// **Errors**
    ///
    /// Returns an error if `List` or `Optional` do not have exactly one argument.
    pub fn from_info(info: &TypeInfo) -> Result<Self> {
        let subtypes = || -> Result<Vec<PyType>> { info.subtypes.iter().map(Self::from_info).collect() };
        let single = |what: &str| -> Result<PyType> {
            match info.subtypes.as_slice() {
                [inner] => Self::from_info(inner),
                _ => Err(Error::InvalidAnnotation {
                    annotation: info.to_string(),
                    reason: format!("{what} takes exactly one argument"),
                }),
            }
        };
        Ok(match info.name.as_str() {
            "int" => Self::Int,
            "str" | "string" => Self::Str,
            "bool" | "Boolean" => Self::Bool,
            "float" => Self::Float,
            "List" | "list" | "Sequence" => {
                if info.subtypes.is_empty() {
                    Self::List(Box::new(Self::Any))
                } else {
                    Self::List(Box::new(single("List")?))
                }
            }
            "Tuple" | "tuple" => {
                let mut inners = subtypes()?;
                if inners.is_empty() {
                    Self::Tuple(vec![Self::Variadic(Box::new(Self::Any))])
                } else {
                    let variadic_tail = inners.len() > 1
                        && info.subtypes.last().map_or(false, |x| x.name == VARIADIC);
                    if variadic_tail {
                        inners.pop();
                        if let Some(last) = inners.last().cloned() {
                            inners.push(Self::Variadic(Box::new(last)));
                        }
                    }
                    Self::Tuple(inners)
                }
            }
            "Optional" => optional(single("Optional")?),
            "Union" => {
                if info.subtypes.iter().any(|x| x.name == "None") {
                    let rest = info
                        .subtypes
                        .iter()
                        .filter(|x| x.name != "None")
                        .map(Self::from_info)
                        .collect::<Result<Vec<_>>>()?;
                    optional(Self::Union(rest))
                } else {
                    Self::Union(subtypes()?)
                }
            }
            "None" => Self::None,
            VARIADIC => match info.subtypes.first() {
                Some(inner) => Self::Variadic(Box::new(Self::from_info(inner)?)),
                None => Self::Variadic(Box::new(Self::Any)),
            },
            "Tensor" => match info.subtypes.as_slice() {
                [inner] => Self::Tensor(Box::new(Self::from_info(inner)?)),
                _ => Self::Tensor(Box::new(Self::Any)),
            },
            "Any" | "any" => Self::Any,
            _ => Self::predefined(info)?,
        })
    }
    /// Parses and evaluates an annotation.
    pub fn parse(annotation: &str) -> Result<Self> {
        Self::from_info(&parse_type_string(annotation))
    }
    fn predefined(info: &TypeInfo) -> Result<Self> {
        let name = info.name.as_str();
        if let Some(alias) = sized_alias(name) {
            return Ok(alias);
        }
        match name {
            "_tensor_list_t" => {
                let tensor = Self::Tensor(Box::new(Self::Any));
                return Ok(Self::Union(vec![tensor.clone(), variadic_tuple(tensor)]));
            }
            "_maybe_indices_t" => {
                let tensor = Self::Tensor(Box::new(Self::Any));
                return Ok(Self::Union(vec![
                    tensor.clone(),
                    Self::Tuple(vec![tensor.clone(), tensor]),
                ]));
            }
            "_size" => {
                return Ok(Self::Union(vec![
                    Self::List(Box::new(Self::Int)),
                    variadic_tuple(Self::Int),
                ]));
            }
            _ => (),
        }
        if enum_members(name).is_some() {
            return Ok(Self::Enum(name.to_string()));
        }
        if let Some(stripped) = name.strip_prefix('_') {
            let inner = TypeInfo::with_subtypes(stripped, info.subtypes.clone());
            let evaluated = Self::from_info(&inner)?;
            if !matches!(evaluated, Self::Adt { .. }) {
                return Ok(evaluated);
            }
        }
        Ok(Self::Adt {
            name: name.to_string(),
            args: info
                .subtypes
                .iter()
                .map(Self::from_info)
                .collect::<Result<_>>()?,
        })
    }
    /// Checks a typed-in literal, returning its normalized text.
    pub fn convert(&self, text: &str) -> Option<Converted> {
        let text = text.trim();
        let accept = |actual: PyType| {
            Some(Converted {
                text: text.to_string(),
                actual,
            })
        };
        match self {
            Self::Str => {
                let quoted = text.len() >= 2
                    && ((text.starts_with('"') && text.ends_with('"'))
                        || (text.starts_with('\'') && text.ends_with('\'')));
                // reject "x", "y"
                if quoted && split_top_level(text, ',').map_or(false, |x| x.len() == 1) {
                    accept(Self::Str)
                } else {
                    None
                }
            }
            Self::Int => parse_int(text).map(|value| Converted {
                text: value.to_string(),
                actual: Self::Int,
            }),
            Self::Float => {
                if is_float(text) {
                    accept(Self::Float)
                } else {
                    None
                }
            }
            Self::Bool => {
                let normalized = match text {
                    "True" | "true" => "True",
                    "False" | "false" => "False",
                    _ => return None,
                };
                Some(Converted {
                    text: normalized.to_string(),
                    actual: Self::Bool,
                })
            }
            Self::List(inner) => {
                let body = text.strip_prefix('[')?.strip_suffix(']')?;
                let items = split_items(body)?;
                if items.iter().all(|item| inner.convert(item).is_some()) {
                    accept(Self::List(inner.clone()))
                } else {
                    None
                }
            }
            Self::Tuple(inners) => {
                let body = text.strip_prefix('(')?.strip_suffix(')')?;
                let items = split_items(body)?;
                let variadic = matches!(inners.last(), Some(Self::Variadic(_)));
                if variadic {
                    if items.len() + 1 < inners.len() {
                        return None;
                    }
                } else if items.len() != inners.len() {
                    return None;
                }
                let actual = items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        let target = inners.get(i).or_else(|| inners.last())?;
                        target.convert(item).map(|x| x.actual)
                    })
                    .collect::<Option<Vec<_>>>()?;
                accept(Self::Tuple(actual))
            }
            Self::Optional(inner) => {
                if text == "None" {
                    accept(Self::None)
                } else {
                    inner.convert(text)
                }
            }
            Self::None => {
                if text == "None" {
                    accept(Self::None)
                } else {
                    None
                }
            }
            Self::Variadic(inner) => inner.convert(text),
            Self::Union(alternatives) => alternatives.iter().find_map(|x| x.convert(text)),
            Self::Tensor(element) => {
                let (prefixed, rest) = match text.strip_prefix("torch.") {
                    Some(rest) => (true, rest),
                    None => (false, text),
                };
                let args = rest
                    .strip_prefix("tensor(")
                    .or_else(|| rest.strip_prefix("Tensor("))?
                    .strip_suffix(')')?;
                let first = *split_top_level(args, ',')?.first()?;
                Self::List(element.clone()).convert(first)?;
                Some(Converted {
                    text: if prefixed {
                        text.to_string()
                    } else {
                        format!("torch.{text}")
                    },
                    actual: self.clone(),
                })
            }
            Self::Enum(name) => {
                let (prefixed, member) = match text.strip_prefix("torch.") {
                    Some(rest) => (true, rest.trim()),
                    None => (false, text),
                };
                let valid_ident = !member.is_empty()
                    && member.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
                if valid_ident && enum_members(name)?.contains(&member) {
                    Some(Converted {
                        text: if prefixed {
                            text.to_string()
                        } else {
                            format!("torch.{text}")
                        },
                        actual: self.clone(),
                    })
                } else {
                    None
                }
            }
            Self::Any => accept(Self::Any),
            Self::Adt { .. } => None,
        }
    }
    /// Whether a value of type `self` can be passed where `target` is expected.
    pub fn is_subtype(&self, target: &PyType) -> bool {
        if *self == Self::Any {
            return true;
        }
        match target {
            Self::Int | Self::Bool | Self::Float => {
                matches!(self, Self::Int | Self::Bool | Self::Float)
            }
            Self::Str => *self == Self::Str,
            Self::List(target_inner) => match self {
                Self::List(inner) => inner.is_subtype(target_inner),
                _ => false,
            },
            Self::Tuple(target_inners) => {
                let inners = match self {
                    Self::Tuple(inners) => inners,
                    _ => return false,
                };
                fn element(inners: &[PyType], index: usize) -> Option<&PyType> {
                    match inners.last() {
                        Some(last @ PyType::Variadic(_)) if index + 1 >= inners.len() => {
                            Some(last)
                        }
                        _ => inners.get(index),
                    }
                }
                let len = inners.len().max(target_inners.len());
                for i in 0..len {
                    match (element(inners, i), element(target_inners, i)) {
                        (Some(x), Some(t)) if x.is_subtype(t) => (),
                        _ => return false,
                    }
                }
                let variadic = |x: &[PyType]| matches!(x.last(), Some(Self::Variadic(_)));
                !(variadic(inners.as_slice()) && !variadic(target_inners.as_slice()))
            }
            Self::Optional(target_inner) => {
                self.is_subtype(target_inner)
                    || *self == Self::None
                    || matches!(self, Self::Optional(inner) if inner.is_subtype(target_inner))
            }
            Self::Variadic(target_inner) => match self {
                Self::Variadic(inner) => inner.is_subtype(target_inner),
                _ => self.is_subtype(target_inner),
            },
            Self::Union(alternatives) => match self {
                Self::Union(members) => members
                    .iter()
                    .all(|member| alternatives.iter().any(|x| member.is_subtype(x))),
                _ => alternatives.iter().any(|x| self.is_subtype(x)),
            },
            Self::Enum(name) => matches!(self, Self::Enum(x) if x == name),
            Self::Adt { name, .. } => matches!(self, Self::Adt { name: x, .. } if x == name),
            Self::None => *self == Self::None,
            Self::Tensor(target_element) => {
                matches!(self, Self::Tensor(element) if element.is_subtype(target_element))
            }
            Self::Any => true,
        }
    }
    fn derive_atomic(&self, delta: Delta) -> Option<Derivation> {
        match delta {
            Delta::Text(text) => self.convert(text).map(|converted| Derivation {
                converted: Some(converted),
                rest: Self::None,
            }),
            Delta::Type(ty) => ty.is_subtype(self).then(|| Derivation {
                converted: None,
                rest: Self::None,
            }),
        }
    }
    /// Consumes one tuple element of `self` with `delta`.
    ///
    /// Returns `None` if `delta` cannot be the next element.
    pub fn derive(&self, delta: Delta) -> Option<Derivation> {
        match self {
            Self::Tuple(inners) => {
                let first = inners.first()?;
                let derived = first.derive_atomic(delta)?;
                let rest = if matches!(first, Self::Variadic(_)) {
                    inners.clone()
                } else {
                    inners[1..].to_vec()
                };
                Some(Derivation {
                    converted: derived.converted,
                    rest: Self::Tuple(rest),
                })
            }
            Self::Optional(inner) => inner.derive(delta),
            Self::Union(alternatives) => {
                let mut derived: Vec<Derivation> =
                    alternatives.iter().filter_map(|x| x.derive(delta)).collect();
                match derived.len() {
                    0 => None,
                    1 => derived.pop(),
                    _ => {
                        let converted = derived[0].converted.clone();
                        Some(Derivation {
                            converted,
                            rest: Self::Union(derived.into_iter().map(|x| x.rest).collect()),
                        })
                    }
                }
            }
            Self::Any => Some(Derivation {
                converted: self.derive_atomic(delta).and_then(|x| x.converted),
                rest: Self::Any,
            }),
            _ => None,
        }
    }
    /// Whether a remaining type needs no further values.
    pub fn nullable(&self) -> bool {
        match self {
            Self::Union(alternatives) => alternatives.iter().any(Self::nullable),
            Self::Optional(inner) => inner.nullable(),
            Self::Tuple(inners) => matches!(inners.first(), None | Some(Self::Variadic(_))),
            _ => false,
        }
    }
}

fn write_list(f: &mut fmt::Formatter, name: &str, items: &[PyType]) -> fmt::Result {
    write!(f, "{name}[")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        item.fmt(f)?;
    }
    f.write_str("]")
}

impl Display for PyType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Int => f.write_str("int"),
            Self::Str => f.write_str("str"),
            Self::Bool => f.write_str("bool"),
            Self::Float => f.write_str("float"),
            Self::List(inner) => write!(f, "List[{inner}]"),
            Self::Tuple(inners) => write_list(f, "Tuple", inners),
            Self::Optional(inner) => write!(f, "Optional[{inner}]"),
            Self::Union(alternatives) => write_list(f, "Union", alternatives),
            Self::Variadic(inner) => write!(f, "{inner}, ..."),
            Self::Tensor(element) if **element == Self::Any => f.write_str("Tensor"),
            Self::Tensor(element) => write!(f, "Tensor[{element}]"),
            Self::Adt { name, args } if args.is_empty() => f.write_str(name),
            Self::Adt { name, args } => write_list(f, name, args),
            Self::None => f.write_str("None"),
            Self::Enum(name) => f.write_str(name),
            Self::Any => f.write_str("Any"),
        }
    }
}

use super::{ClassInfo, FuncInfo, ImportInfo, ImportName, Importees, ModuleInfo, ParameterInfo};
use crate::{
    typing::{parse_type_string, TypeInfo},
    Error, Result,
};
use ruff_python_ast::{
    Alias, ExceptHandler, Expr, Operator, Parameter, ParameterWithDefault, Stmt, StmtClassDef,
    StmtFunctionDef,
};
use ruff_text_size::Ranged;

fn dotted(text: &str) -> Vec<String> {
    text.split('.')
        .filter(|x| !x.is_empty())
        .map(str::to_string)
        .collect()
}

/// Writes an annotation back as a type string, ie `Optional[Tuple[int, ...]]`.
///
/// String annotations are unquoted. Expressions that cannot appear in a type are kept as
/// written.
fn type_string(expr: &Expr, source: &str) -> String {
    let joined = |items: &[Expr]| {
        items
            .iter()
            .map(|x| type_string(x, source))
            .collect::<Vec<_>>()
            .join(", ")
    };
    match expr {
        Expr::Name(name) => name.id.to_string(),
        Expr::Attribute(attribute) => {
            format!("{}.{}", type_string(&attribute.value, source), attribute.attr)
        }
        Expr::Subscript(subscript) => format!(
            "{}[{}]",
            type_string(&subscript.value, source),
            type_string(&subscript.slice, source)
        ),
        Expr::Tuple(tuple) => joined(&tuple.elts),
        Expr::List(list) => format!("[{}]", joined(&list.elts)),
        Expr::StringLiteral(text) => text.value.to_str().to_string(),
        Expr::NoneLiteral(_) => "None".to_string(),
        Expr::EllipsisLiteral(_) => "...".to_string(),
        Expr::BinOp(union) if union.op == Operator::BitOr => format!(
            "{} | {}",
            type_string(&union.left, source),
            type_string(&union.right, source)
        ),
        expr => source[expr.range()].to_string(),
    }
}

fn type_hint(annotation: Option<&Expr>, source: &str) -> Option<TypeInfo> {
    annotation.map(|x| parse_type_string(&type_string(x, source)))
}

fn parameter(param: &Parameter, default: Option<&Expr>, source: &str) -> ParameterInfo {
    ParameterInfo {
        name: param.name.to_string(),
        type_hint: type_hint(param.annotation.as_deref(), source),
        initial_value: default.map(|x| source[x.range()].to_string()),
        star: false,
        power: false,
    }
}

fn function(func: &StmtFunctionDef, source: &str) -> FuncInfo {
    let params = &func.parameters;
    let with_default =
        |x: &ParameterWithDefault| parameter(&x.parameter, x.default.as_deref(), source);
    let mut parameters: Vec<_> = params
        .posonlyargs
        .iter()
        .chain(params.args.iter())
        .map(with_default)
        .collect();
    if let Some(args) = params.vararg.as_deref() {
        parameters.push(ParameterInfo {
            star: true,
            ..parameter(args, None, source)
        });
    }
    parameters.extend(params.kwonlyargs.iter().map(with_default));
    if let Some(kwargs) = params.kwarg.as_deref() {
        parameters.push(ParameterInfo {
            power: true,
            ..parameter(kwargs, None, source)
        });
    }
    FuncInfo {
        name: func.name.to_string(),
        parameters,
        return_type: type_hint(func.returns.as_deref(), source),
    }
}

fn import_name(alias: &Alias) -> ImportName {
    ImportName {
        name: alias.name.to_string(),
        alias: alias.asname.as_ref().map(ToString::to_string),
    }
}

/// Bodies of `if`, `try` and `with` blocks, which belong to the enclosing scope.
fn nested_bodies(stmt: &Stmt) -> Vec<&[Stmt]> {
    match stmt {
        Stmt::If(block) => std::iter::once(block.body.as_slice())
            .chain(block.elif_else_clauses.iter().map(|x| x.body.as_slice()))
            .collect(),
        Stmt::Try(block) => {
            let mut bodies = vec![block.body.as_slice()];
            bodies.extend(block.handlers.iter().map(|handler| match handler {
                ExceptHandler::ExceptHandler(handler) => handler.body.as_slice(),
            }));
            bodies.push(block.orelse.as_slice());
            bodies.push(block.finalbody.as_slice());
            bodies
        }
        Stmt::With(block) => vec![block.body.as_slice()],
        _ => Vec::new(),
    }
}

fn is_all(target: &Expr) -> bool {
    matches!(target, Expr::Name(name) if name.id.as_str() == "__all__")
}

/// The string items of a list or tuple, ie `["Conv2d", "Linear"]`.
///
/// Anything but string literals is skipped, since the names it computes are unknown.
fn string_items(expr: &Expr, items: &mut Vec<String>) {
    let elts = match expr {
        Expr::List(list) => &list.elts,
        Expr::Tuple(tuple) => &tuple.elts,
        Expr::BinOp(sum) if sum.op == Operator::Add => {
            string_items(&sum.left, items);
            string_items(&sum.right, items);
            return;
        }
        _ => return,
    };
    items.extend(elts.iter().filter_map(|x| match x {
        Expr::StringLiteral(text) => Some(text.value.to_str().to_string()),
        _ => None,
    }));
}

struct ModuleVisitor<'s> {
    source: &'s str,
    module: ModuleInfo,
}

impl ModuleVisitor<'_> {
    fn visit_body(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.visit_stmt(stmt);
        }
    }
    fn visit_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::FunctionDef(func) => {
                let mut func = function(func, self.source);
                let overload = self
                    .module
                    .functions
                    .iter()
                    .filter(|x| x.base_name() == func.name)
                    .count();
                func.name = format!("{}${}", func.name, overload + 1);
                self.module.functions.push(func);
            }
            Stmt::ClassDef(class) => {
                let class = self.class(class);
                self.module.classes.push(class);
            }
            Stmt::Import(import) => {
                self.module
                    .imports
                    .extend(import.names.iter().map(|alias| ImportInfo {
                        level: 0,
                        source: dotted(alias.name.as_str()),
                        importees: None,
                        alias: alias.asname.as_ref().map(ToString::to_string),
                    }));
            }
            Stmt::ImportFrom(import) => {
                let importees = if import.names.iter().any(|x| x.name.as_str() == "*") {
                    Importees::All
                } else {
                    Importees::Names(import.names.iter().map(import_name).collect())
                };
                self.module.imports.push(ImportInfo {
                    level: import.level as usize,
                    source: import
                        .module
                        .as_ref()
                        .map_or_else(Vec::new, |x| dotted(x.as_str())),
                    importees: Some(importees),
                    alias: None,
                });
            }
            Stmt::Assign(assign) if assign.targets.iter().any(is_all) => {
                let all = self.module.all.get_or_insert_with(Vec::new);
                all.clear();
                string_items(&assign.value, all);
            }
            Stmt::AnnAssign(assign) if is_all(&assign.target) => {
                let all = self.module.all.get_or_insert_with(Vec::new);
                all.clear();
                if let Some(value) = assign.value.as_deref() {
                    string_items(value, all);
                }
            }
            Stmt::AugAssign(assign) if is_all(&assign.target) && assign.op == Operator::Add => {
                string_items(&assign.value, self.module.all.get_or_insert_with(Vec::new));
            }
            // __all__.extend([...])
            Stmt::Expr(expr) => {
                let Expr::Call(call) = expr.value.as_ref() else {
                    return;
                };
                let Expr::Attribute(method) = call.func.as_ref() else {
                    return;
                };
                if is_all(&method.value) && method.attr.as_str() == "extend" {
                    let all = self.module.all.get_or_insert_with(Vec::new);
                    for arg in call.arguments.args.iter() {
                        string_items(arg, all);
                    }
                }
            }
            stmt => {
                for body in nested_bodies(stmt) {
                    self.visit_body(body);
                }
            }
        }
    }
    fn class(&self, class: &StmtClassDef) -> ClassInfo {
        let mut info = ClassInfo {
            name: class.name.to_string(),
            bases: class
                .bases()
                .iter()
                .map(|x| type_string(x, self.source))
                .collect(),
            functions: Vec::new(),
        };
        self.class_body(&class.body, &mut info);
        info
    }
    /// Collects the methods of a class. Nested classes are skipped.
    fn class_body(&self, body: &[Stmt], info: &mut ClassInfo) {
        for stmt in body {
            match stmt {
                Stmt::FunctionDef(func) => info.functions.push(function(func, self.source)),
                Stmt::ClassDef(_) => (),
                stmt => {
                    for body in nested_bodies(stmt) {
                        self.class_body(body, info);
                    }
                }
            }
        }
    }
}

/// Extracts the top level classes, functions, imports and `__all__` of a Python module.
///
/// `path` is the dotted module path. Top level functions are named by overload, `name$1`,
/// `name$2`, in declaration order. Definitions under `if`, `try` and `with` count as top
/// level.
///
/// **Errors**
///
/// Returns [`Error::Parse`] with the line of the first syntax error.
pub fn parse_module(path: &str, source: &str) -> Result<ModuleInfo> {
    let parsed = ruff_python_parser::parse_module(source).map_err(|e| {
        let offset = usize::from(e.location.start());
        let line = source
            .get(..offset)
            .map_or(1, |before| before.matches('\n').count() + 1);
        Error::Parse {
            module: path.to_string(),
            line,
            reason: e.error.to_string(),
        }
    })?;
    let mut visitor = ModuleVisitor {
        source,
        module: ModuleInfo {
            path: dotted(path),
            ..ModuleInfo::default()
        },
    };
    visitor.visit_body(&parsed.syntax().body);
    Ok(visitor.module)
}

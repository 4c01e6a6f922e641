use super::ast::{Arg, Expr, Stmt};
use std::fmt::{self, Display, Write};

const INDENT: &str = "    ";

/// Binding strength of a binary operator, higher binds tighter.
fn precedence(op: &str) -> u8 {
    match op {
        "or" => 1,
        "and" => 2,
        "==" | "!=" | "<" | "<=" | ">" | ">=" | "in" | "is" => 3,
        "+" | "-" => 4,
        "*" | "/" | "//" | "%" | "@" => 5,
        "**" => 6,
        _ => 0,
    }
}

fn write_separated<T: Display>(f: &mut fmt::Formatter, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        item.fmt(f)?;
    }
    Ok(())
}

fn joined<T: Display>(items: &[T], separator: &str) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(separator)
}

fn write_operand(f: &mut fmt::Formatter, operand: &Expr, min_precedence: u8) -> fmt::Result {
    match operand {
        Expr::BinOp { op, .. } if precedence(op) < min_precedence => write!(f, "({operand})"),
        operand => operand.fmt(f),
    }
}

fn write_str_literal(f: &mut fmt::Formatter, text: &str) -> fmt::Result {
    f.write_char('"')?;
    for c in text.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            c => f.write_char(c)?,
        }
    }
    f.write_char('"')
}

impl Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(keyword) = self.keyword.as_ref() {
            write!(f, "{keyword}=")?;
        }
        self.value.fmt(f)
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Attribute(value, name) => write!(f, "{value}.{name}"),
            Self::Call(func, args) => {
                write!(f, "{func}(")?;
                write_separated(f, args)?;
                f.write_str(")")
            }
            Self::Index(value, indices) => {
                write!(f, "{value}[")?;
                write_separated(f, indices)?;
                f.write_str("]")
            }
            Self::Tuple(items) => {
                f.write_str("(")?;
                write_separated(f, items)?;
                if items.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            Self::List(items) => {
                f.write_str("[")?;
                write_separated(f, items)?;
                f.write_str("]")
            }
            Self::Str(text) => write_str_literal(f, text),
            Self::Int(value) => write!(f, "{value}"),
            Self::BinOp { op, left, right } => {
                let precedence = precedence(op);
                let (left_min, right_min) = match op.as_str() {
                    "**" => (precedence + 1, precedence),
                    // comparisons chain instead of nesting
                    _ if precedence == 3 => (precedence + 1, precedence + 1),
                    _ => (precedence, precedence + 1),
                };
                write_operand(f, left, left_min)?;
                write!(f, " {op} ")?;
                write_operand(f, right, right_min)
            }
            Self::Raw(text) => f.write_str(text),
        }
    }
}

struct Printer {
    out: String,
}

impl Printer {
    fn line(&mut self, level: usize, text: impl Display) {
        for _ in 0..level {
            self.out.push_str(INDENT);
        }
        // writing to a String cannot fail
        let _ = writeln!(self.out, "{text}");
    }
    fn body(&mut self, level: usize, body: &[Stmt]) {
        if body.is_empty() {
            self.line(level, "pass");
        }
        for stmt in body {
            self.stmt(level, stmt);
        }
    }
    fn stmt(&mut self, level: usize, stmt: &Stmt) {
        match stmt {
            Stmt::Import { path, alias } => match alias {
                Some(alias) => self.line(level, format_args!("import {path} as {alias}")),
                None => self.line(level, format_args!("import {path}")),
            },
            Stmt::Class { name, bases, body } => {
                if bases.is_empty() {
                    self.line(level, format_args!("class {name}:"));
                } else {
                    let bases = joined(bases, ", ");
                    self.line(level, format_args!("class {name}({bases}):"));
                }
                for (i, stmt) in body.iter().enumerate() {
                    if i > 0 && matches!(stmt, Stmt::Def { .. } | Stmt::Class { .. }) {
                        self.out.push('\n');
                    }
                    self.stmt(level + 1, stmt);
                }
                if body.is_empty() {
                    self.line(level + 1, "pass");
                }
            }
            Stmt::Def { name, params, body } => {
                self.line(level, format_args!("def {name}({}):", params.join(", ")));
                self.body(level + 1, body);
            }
            Stmt::Assign { targets, value } => {
                let targets = joined(targets, " = ");
                self.line(level, format_args!("{targets} = {value}"));
            }
            Stmt::Expr(expr) => self.line(level, expr),
            Stmt::Return(values) => match values.as_slice() {
                [] => self.line(level, "return"),
                values => self.line(level, format_args!("return {}", joined(values, ", "))),
            },
            Stmt::If { cond, body, orelse } => {
                self.line(level, format_args!("if {cond}:"));
                self.body(level + 1, body);
                if !orelse.is_empty() {
                    self.line(level, "else:");
                    self.body(level + 1, orelse);
                }
            }
            Stmt::For { target, iter, body } => {
                self.line(level, format_args!("for {target} in {iter}:"));
                self.body(level + 1, body);
            }
            Stmt::Pass => self.line(level, "pass"),
            Stmt::Raw(text) => self.line(level, text),
        }
    }
}

/// Prints a module.
///
/// Top-level statements are separated by a blank line, except consecutive imports.
pub fn print_module(module: &[Stmt]) -> String {
    let mut printer = Printer { out: String::new() };
    for (i, stmt) in module.iter().enumerate() {
        if i > 0 && !(stmt.is_import() && module[i - 1].is_import()) {
            printer.out.push('\n');
        }
        printer.stmt(0, stmt);
    }
    printer.out
}

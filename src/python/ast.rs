/// An argument of a call, optionally passed by keyword.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Arg {
    pub keyword: Option<String>,
    pub value: Expr,
}

impl Arg {
    pub fn positional(value: Expr) -> Self {
        Self {
            keyword: None,
            value,
        }
    }
    pub fn keyword(keyword: impl Into<String>, value: Expr) -> Self {
        Self {
            keyword: Some(keyword.into()),
            value,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    Name(String),
    Attribute(Box<Expr>, String),
    Call(Box<Expr>, Vec<Arg>),
    Index(Box<Expr>, Vec<Expr>),
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    /// A string literal, printed quoted and escaped.
    Str(String),
    Int(i64),
    BinOp {
        op: String,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Source text printed as is, ie a typed-in argument.
    Raw(String),
}

impl Expr {
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }
    /// `a.b.c` from `["a", "b", "c"]`.
    pub fn path<S: AsRef<str>>(segments: &[S]) -> Self {
        let mut segments = segments.iter().map(AsRef::as_ref);
        let first = Self::name(segments.next().unwrap_or_default());
        segments.fold(first, Self::attr)
    }
    /// `a.b.c` from `"a.b.c"`.
    pub fn dotted(path: &str) -> Self {
        Self::path(&path.split('.').collect::<Vec<_>>())
    }
    pub fn attr(self, name: &str) -> Self {
        Self::Attribute(Box::new(self), name.to_string())
    }
    pub fn call(self, args: Vec<Arg>) -> Self {
        Self::Call(Box::new(self), args)
    }
    pub fn index(self, index: Expr) -> Self {
        Self::Index(Box::new(self), vec![index])
    }
    pub fn str(text: impl Into<String>) -> Self {
        Self::Str(text.into())
    }
    pub fn raw(text: impl Into<String>) -> Self {
        Self::Raw(text.into())
    }
    pub fn binop(self, op: &str, right: Expr) -> Self {
        Self::BinOp {
            op: op.to_string(),
            left: Box::new(self),
            right: Box::new(right),
        }
    }
}

/// A statement. Bodies that are empty print as `pass`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Stmt {
    Import {
        path: String,
        alias: Option<String>,
    },
    Class {
        name: String,
        bases: Vec<Expr>,
        body: Vec<Stmt>,
    },
    Def {
        name: String,
        params: Vec<String>,
        body: Vec<Stmt>,
    },
    Assign {
        targets: Vec<Expr>,
        value: Expr,
    },
    Expr(Expr),
    Return(Vec<Expr>),
    If {
        cond: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    For {
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
    },
    Pass,
    /// One line of source text.
    Raw(String),
}

impl Stmt {
    pub fn import(path: impl Into<String>) -> Self {
        Self::Import {
            path: path.into(),
            alias: None,
        }
    }
    pub fn assign(target: Expr, value: Expr) -> Self {
        Self::Assign {
            targets: vec![target],
            value,
        }
    }
    pub fn def(name: impl Into<String>, params: &[&str], body: Vec<Stmt>) -> Self {
        Self::Def {
            name: name.into(),
            params: params.iter().map(|x| x.to_string()).collect(),
            body,
        }
    }
    pub fn raw(line: impl Into<String>) -> Self {
        Self::Raw(line.into())
    }
    pub fn is_import(&self) -> bool {
        matches!(self, Self::Import { .. })
    }
}

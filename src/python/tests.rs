use super::*;

#[test]
fn expressions() {
    let call = Expr::dotted("torch.nn.Conv2d").call(vec![
        Arg::keyword("in_channels", Expr::raw("3")),
        Arg::keyword("kernel_size", Expr::Tuple(vec![Expr::Int(3), Expr::Int(3)])),
    ]);
    assert_eq!(
        call.to_string(),
        "torch.nn.Conv2d(in_channels=3, kernel_size=(3, 3))"
    );
    assert_eq!(Expr::Tuple(vec![Expr::name("x")]).to_string(), "(x,)");
    assert_eq!(Expr::Tuple(Vec::new()).to_string(), "()");
    assert_eq!(
        Expr::name("y").index(Expr::Int(0)).to_string(),
        "y[0]"
    );
    assert_eq!(
        Expr::str("a \"b\"\n").to_string(),
        r#""a \"b\"\n""#
    );
    assert_eq!(
        Expr::List(vec![Expr::raw("None"), Expr::str("x")]).to_string(),
        r#"[None, "x"]"#
    );
}

#[test]
fn binary_operators() {
    let cond = Expr::name("batch_index")
        .binop("%", Expr::Int(100))
        .binop("==", Expr::Int(0));
    assert_eq!(cond.to_string(), "batch_index % 100 == 0");
    let sum = Expr::name("a").binop("+", Expr::name("b"));
    assert_eq!(
        sum.clone().binop("*", Expr::name("c")).to_string(),
        "(a + b) * c"
    );
    assert_eq!(
        Expr::name("a").binop("-", sum).to_string(),
        "a - (a + b)"
    );
    let power = Expr::name("b").binop("**", Expr::name("c"));
    assert_eq!(
        Expr::name("a").binop("**", power.clone()).to_string(),
        "a ** b ** c"
    );
    assert_eq!(
        power.binop("**", Expr::name("d")).to_string(),
        "(b ** c) ** d"
    );
    let less = Expr::name("a").binop("<", Expr::name("b"));
    assert_eq!(
        less.binop("<", Expr::name("c")).to_string(),
        "(a < b) < c"
    );
}

#[test]
fn module_layout() {
    let module = vec![
        Stmt::import("torch"),
        Stmt::import("torch.nn"),
        Stmt::Class {
            name: "Model".into(),
            bases: vec![Expr::dotted("torch.nn.Module")],
            body: vec![
                Stmt::def(
                    "__init__",
                    &["self"],
                    vec![Stmt::Expr(
                        Expr::name("super")
                            .call(Vec::new())
                            .attr("__init__")
                            .call(Vec::new()),
                    )],
                ),
                Stmt::def("forward", &["self", "x"], vec![Stmt::Return(vec![Expr::name("x")])]),
            ],
        },
        Stmt::Class {
            name: "Empty".into(),
            bases: Vec::new(),
            body: vec![Stmt::def("f", &["self"], Vec::new())],
        },
        Stmt::If {
            cond: Expr::name("__name__").binop("==", Expr::str("__main__")),
            body: vec![Stmt::For {
                target: Expr::name("i"),
                iter: Expr::name("range").call(vec![Arg::positional(Expr::Int(2))]),
                body: vec![Stmt::raw("print(i)")],
            }],
            orelse: vec![Stmt::Pass],
        },
    ];
    let expected = r#"import torch
import torch.nn

class Model(torch.nn.Module):
    def __init__(self):
        super().__init__()

    def forward(self, x):
        return x

class Empty:
    def f(self):
        pass

if __name__ == "__main__":
    for i in range(2):
        print(i)
else:
    pass
"#;
    assert_eq!(print_module(&module), expected);
}

#[test]
fn assignments_and_returns() {
    let module = vec![
        Stmt::assign(Expr::dotted("self.conv"), Expr::raw("None")),
        Stmt::Return(vec![Expr::name("x"), Expr::name("y")]),
        Stmt::Return(Vec::new()),
    ];
    assert_eq!(
        print_module(&module),
        "self.conv = None\n\nreturn x, y\n\nreturn\n"
    );
}

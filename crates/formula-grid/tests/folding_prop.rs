#![cfg(not(target_arch = "wasm32"))]

use formula_grid::{Formula, VARIABLE_SLOTS};
use proptest::prelude::*;

/// Expression tree rendered fully parenthesized, so precedence never changes the shape.
#[derive(Clone, Debug)]
enum Node {
    Var(char),
    Lit(f64),
    Neg(Box<Node>),
    Bin(char, Box<Node>, Box<Node>),
    Call(&'static str, Vec<Node>),
}

impl Node {
    /// Render as formula source. With `lift`, literals become variables `d`, `e`, ... bound to
    /// the values collected in `lifted`.
    fn render(&self, lift: bool, lifted: &mut Vec<f64>) -> String {
        match self {
            Node::Var(c) => c.to_string(),
            Node::Lit(v) if lift && lifted.len() < VARIABLE_SLOTS - 3 => {
                let letter = (b'd' + lifted.len() as u8) as char;
                lifted.push(*v);
                letter.to_string()
            }
            Node::Lit(v) => v.to_string(),
            Node::Neg(x) => format!("(-{})", x.render(lift, lifted)),
            Node::Bin(op, l, r) => {
                let l = l.render(lift, lifted);
                let r = r.render(lift, lifted);
                format!("({l} {op} {r})")
            }
            Node::Call(name, args) => {
                let args: Vec<String> = args.iter().map(|a| a.render(lift, lifted)).collect();
                format!("{name}({})", args.join(", "))
            }
        }
    }
}

fn arb_node() -> impl Strategy<Value = Node> {
    let leaf = prop_oneof![
        prop::sample::select(vec!['a', 'b', 'c']).prop_map(Node::Var),
        (0u32..400).prop_map(|v| Node::Lit(f64::from(v) / 4.0)),
    ];
    leaf.prop_recursive(4, 32, 3, |inner| {
        prop_oneof![
            inner.clone().prop_map(|x| Node::Neg(Box::new(x))),
            (
                prop::sample::select(vec!['+', '-', '*', '/', '^', '<', '>', '=', '&', '|']),
                inner.clone(),
                inner.clone()
            )
                .prop_map(|(op, l, r)| Node::Bin(op, Box::new(l), Box::new(r))),
            (prop::sample::select(vec!["sin", "sqrt", "abs", "int"]), inner.clone())
                .prop_map(|(name, x)| Node::Call(name, vec![x])),
            (
                prop::sample::select(vec!["min", "max", "atan2", "pow", "mod"]),
                inner.clone(),
                inner.clone()
            )
                .prop_map(|(name, x, y)| Node::Call(name, vec![x, y])),
            (inner.clone(), inner.clone(), inner)
                .prop_map(|(c, x, y)| Node::Call("ifelse", vec![c, x, y])),
        ]
    })
}

fn same(x: f64, y: f64) -> bool {
    x.to_bits() == y.to_bits() || (x.is_nan() && y.is_nan())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        .. ProptestConfig::default()
    })]

    #[test]
    fn folding_is_transparent(
        node in arb_node(),
        a in -50.0f64..50.0,
        b in -50.0f64..50.0,
        c in -50.0f64..50.0,
    ) {
        let mut unused = Vec::new();
        let folded_source = node.render(false, &mut unused);
        let mut lifted = Vec::new();
        let lifted_source = node.render(true, &mut lifted);

        let mut folded = Formula::new();
        prop_assert!(folded.set_formula(&folded_source), "{}", folded.error_message().unwrap_or_default());
        let mut plain = Formula::new();
        prop_assert!(plain.set_formula(&lifted_source), "{}", plain.error_message().unwrap_or_default());

        let mut values = vec![a, b, c];
        values.extend(&lifted);
        let x = folded.value_with(&values[..3]);
        let y = plain.value_with(&values);
        prop_assert!(!folded.has_error() && !plain.has_error());
        prop_assert!(same(x, y), "{folded_source} = {x}, {lifted_source} = {y}");
    }

    #[test]
    fn unused_slots_do_not_matter(
        a in -1e6f64..1e6,
        b in -1e6f64..1e6,
        noise in prop::collection::vec(-1e6f64..1e6, VARIABLE_SLOTS),
    ) {
        let mut f = Formula::new();
        prop_assert!(f.set_formula("a * b - sqr(a) / (b + 1)"));
        let expected = f.value_with(&[a, b]);

        let mut bindings = noise;
        bindings[0] = a;
        bindings[1] = b;
        prop_assert!(same(f.value_with(&bindings), expected));
    }

    #[test]
    fn same_tier_operators_associate_left(
        a in -1e3f64..1e3,
        b in -1e3f64..1e3,
        c in 1.0f64..1e3,
    ) {
        let mut f = Formula::new();
        let cases: [(&str, f64); 4] = [
            ("a - b - c", (a - b) - c),
            ("a - b + c", (a - b) + c),
            ("a / c * b", (a / c) * b),
            ("a * b / c", (a * b) / c),
        ];
        for (source, expected) in cases {
            prop_assert!(f.set_formula(source));
            prop_assert!(same(f.value_with(&[a, b, c]), expected), "{}", source);
        }
    }

    #[test]
    fn number_literals_round_trip(v in 0.0f64..1e12) {
        let source = format!("{v}");
        let mut f = Formula::new();
        prop_assert!(f.set_formula(&source));
        prop_assert!(f.program().is_some_and(|p| p.is_constant()));
        prop_assert_eq!(f.value(), v);
    }
}

use super::random;
use super::Volatility;

/// Tolerance used by `eq(x, y)`.
pub const EQ_EPSILON: f64 = 1e-9;

/// Plain function pointer for a built-in, typed by arity.
#[derive(Clone, Copy, Debug)]
pub enum BuiltinFn {
    Nullary(fn() -> f64),
    Unary(fn(f64) -> f64),
    Binary(fn(f64, f64) -> f64),
    Ternary(fn(f64, f64, f64) -> f64),
}

#[derive(Clone, Copy, Debug)]
pub struct BuiltinSpec {
    pub name: &'static str,
    pub implementation: BuiltinFn,
    pub volatility: Volatility,
    /// Call pattern shown in the help text, e.g. `atan2(x, y)`.
    pub usage: &'static str,
    pub description: &'static str,
}

macro_rules! builtin {
    ($name:literal, $kind:ident($f:expr), $volatility:ident, $usage:literal, $description:literal) => {
        BuiltinSpec {
            name: $name,
            implementation: BuiltinFn::$kind($f),
            volatility: Volatility::$volatility,
            usage: $usage,
            description: $description,
        }
    };
    ($name:literal, $kind:ident($f:expr), $usage:literal, $description:literal) => {
        builtin!($name, $kind($f), NonVolatile, $usage, $description)
    };
}

/// The protected built-in functions, in table order.
///
/// Order matters: table indices of built-ins are stable and the first `BUILTINS.len()` entries
/// of every [`super::FunctionTable`] can't be deleted.
pub static BUILTINS: &[BuiltinSpec] = &[
    builtin!("exp", Unary(f64::exp), "exp(x)", "Exponential"),
    builtin!("ln", Unary(f64::ln), "ln(x)", "Natural Logarithm"),
    builtin!("sin", Unary(f64::sin), "sin(x)", "Sine"),
    builtin!("cos", Unary(f64::cos), "cos(x)", "Cosine"),
    builtin!("tan", Unary(f64::tan), "tan(x)", "Tangent"),
    builtin!("asin", Unary(f64::asin), "asin(x)", "Arcsine"),
    builtin!("acos", Unary(f64::acos), "acos(x)", "Arccosine"),
    builtin!("atan", Unary(f64::atan), "atan(x)", "Arctangent"),
    builtin!("atan2", Binary(f64::atan2), "atan2(x, y)", "Arctangent of x/y"),
    builtin!("abs", Unary(f64::abs), "abs(x)", "Absolute Value"),
    builtin!("sqrt", Unary(f64::sqrt), "sqrt(x)", "Square Root"),
    builtin!("gt", Binary(gt), "gt(x, y)", "Returns true (1), if x is greater than y, else false (0)"),
    builtin!("lt", Binary(lt), "lt(x, y)", "Returns true (1), if x is less than y, else false (0)"),
    builtin!("eq", Binary(eq), "eq(x, y)", "Returns true (1), if x equals y, else false (0)"),
    builtin!("pi", Nullary(pi), "pi()", "Returns the value of Pi"),
    builtin!("int", Unary(f64::trunc), "int(x)", "Returns the integer part of floating point value x"),
    builtin!("mod", Binary(fmod), "mod(x, y)", "Returns the floating point remainder of x/y"),
    builtin!("ifelse", Ternary(ifelse), "ifelse(c, x, y)", "Returns x, if condition c is true (i.e. not 0), else y"),
    builtin!("log", Unary(f64::log10), "log(x)", "Base 10 Logarithm"),
    builtin!("pow", Binary(f64::powf), "pow(x, y)", "Returns x raised to the power of y"),
    builtin!("sqr", Unary(sqr), "sqr(x)", "Square"),
    builtin!("rand_u", Binary(random::uniform), Volatile, "rand_u(x, y)", "Random number, uniform distribution with minimum x and maximum y"),
    builtin!("rand_g", Binary(random::gaussian), Volatile, "rand_g(x, y)", "Random number, Gaussian distribution with mean x and standard deviation y"),
    builtin!("and", Binary(and), "and(x, y)", "Returns true (1), if both x and y are true (i.e. not 0)"),
    builtin!("or", Binary(or), "or(x, y)", "Returns true (1), if at least one of both x and y is true (i.e. not 0)"),
    builtin!("min", Binary(min), "min(x, y)", "Returns the minimum of values x and y"),
    builtin!("max", Binary(max), "max(x, y)", "Returns the maximum of values x and y"),
];

#[inline]
fn truth(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn gt(x: f64, y: f64) -> f64 {
    truth(x > y)
}

fn lt(x: f64, y: f64) -> f64 {
    truth(x < y)
}

fn eq(x: f64, y: f64) -> f64 {
    truth((x - y).abs() < EQ_EPSILON)
}

fn pi() -> f64 {
    std::f64::consts::PI
}

// `%` on f64 is C's fmod: the result takes the sign of the dividend.
fn fmod(x: f64, y: f64) -> f64 {
    x % y
}

fn ifelse(condition: f64, x: f64, y: f64) -> f64 {
    if condition != 0.0 {
        x
    } else {
        y
    }
}

fn sqr(x: f64) -> f64 {
    x * x
}

fn and(x: f64, y: f64) -> f64 {
    truth(x != 0.0 && y != 0.0)
}

fn or(x: f64, y: f64) -> f64 {
    truth(x != 0.0 || y != 0.0)
}

fn min(a: f64, b: f64) -> f64 {
    if a < b {
        a
    } else {
        b
    }
}

fn max(a: f64, b: f64) -> f64 {
    if a > b {
        a
    } else {
        b
    }
}

// Builtin functions available to model files.
// Parameter names are fixed, so a derived cell that omits an argument reads
// the cell of the same name.

use cellwork_engine::{ComputeError, Func, Value};

/// Every builtin name with its parameter list, for `--help` output and errors.
pub const BUILTINS: &[(&str, &[&str])] = &[
    // Arithmetic
    ("add", &["x", "y"]),
    ("sub", &["x", "y"]),
    ("mul", &["x", "y"]),
    ("div", &["x", "y"]),
    ("neg", &["x"]),
    ("abs", &["x"]),
    ("pow", &["x", "y"]),
    ("min", &["x", "y"]),
    ("max", &["x", "y"]),
    // Comparison and logic
    ("eq", &["x", "y"]),
    ("lt", &["x", "y"]),
    ("gt", &["x", "y"]),
    ("if", &["cond", "then", "else"]),
    // Text and lists
    ("concat", &["x", "y"]),
    ("len", &["x"]),
    ("upper", &["x"]),
    ("trim", &["x"]),
    ("lines", &["text"]),
    ("number", &["text"]),
    ("list", &["x", "y"]),
];

pub fn names() -> impl Iterator<Item = &'static str> {
    BUILTINS.iter().map(|(name, _)| *name)
}

/// Look up a builtin by name.
pub fn lookup(name: &str) -> Option<Func> {
    let params = BUILTINS
        .iter()
        .find(|(builtin, _)| *builtin == name)
        .map(|(_, params)| params.iter().copied())?;

    let func = match name {
        "add" => Func::new(params, |a| {
            a[0].numeric_op(&a[1], i64::checked_add, |x, y| x + y)
        }),
        "sub" => Func::new(params, |a| {
            a[0].numeric_op(&a[1], i64::checked_sub, |x, y| x - y)
        }),
        "mul" => Func::new(params, |a| {
            a[0].numeric_op(&a[1], i64::checked_mul, |x, y| x * y)
        }),
        "div" => Func::new(params, |a| {
            let divisor = a[1].as_number()?;
            if divisor == 0.0 {
                return Err(ComputeError::new("division by zero"));
            }
            Ok(Value::Number(a[0].as_number()? / divisor))
        }),
        "neg" => Func::new(params, |a| match &a[0] {
            Value::Int(n) => n
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| ComputeError::new("integer overflow")),
            other => Ok(Value::Number(-other.as_number()?)),
        }),
        "abs" => Func::new(params, |a| match &a[0] {
            Value::Int(n) => n
                .checked_abs()
                .map(Value::Int)
                .ok_or_else(|| ComputeError::new("integer overflow")),
            other => Ok(Value::Number(other.as_number()?.abs())),
        }),
        "pow" => Func::new(params, |a| match (&a[0], &a[1]) {
            (Value::Int(base), Value::Int(exp)) if *exp >= 0 => u32::try_from(*exp)
                .ok()
                .and_then(|exp| base.checked_pow(exp))
                .map(Value::Int)
                .ok_or_else(|| ComputeError::new("integer overflow")),
            (base, exp) => Ok(Value::Number(base.as_number()?.powf(exp.as_number()?))),
        }),
        "min" => Func::new(params, |a| pick(&a[0], &a[1], |x, y| x <= y)),
        "max" => Func::new(params, |a| pick(&a[0], &a[1], |x, y| x >= y)),
        "eq" => Func::new(params, |a| Ok(Value::Bool(loose_eq(&a[0], &a[1])))),
        "lt" => Func::new(params, |a| compare(&a[0], &a[1]).map(|o| Value::Bool(o.is_lt()))),
        "gt" => Func::new(params, |a| compare(&a[0], &a[1]).map(|o| Value::Bool(o.is_gt()))),
        "if" => Func::new(params, |a| {
            Ok(if a[0].as_bool()? { a[1].clone() } else { a[2].clone() })
        }),
        "concat" => Func::new(params, |a| match (&a[0], &a[1]) {
            (Value::List(x), Value::List(y)) => {
                Ok(Value::List(x.iter().chain(y).cloned().collect()))
            }
            (x, y) => Ok(Value::Text(format!("{}{}", x, y))),
        }),
        "len" => Func::new(params, |a| match &a[0] {
            Value::Text(s) => Ok(Value::Int(s.chars().count() as i64)),
            Value::List(items) => Ok(Value::Int(items.len() as i64)),
            other => Err(ComputeError::new(format!(
                "len: expected text or list, got {}",
                other.type_name()
            ))),
        }),
        "upper" => Func::new(params, |a| Ok(Value::Text(a[0].as_text()?.to_uppercase()))),
        "trim" => Func::new(params, |a| Ok(Value::Text(a[0].as_text()?.trim().to_string()))),
        "lines" => Func::new(params, |a| {
            Ok(Value::List(
                a[0].as_text()?.lines().map(Value::from).collect(),
            ))
        }),
        "number" => Func::new(params, |a| match &a[0] {
            Value::Int(_) | Value::Number(_) => Ok(a[0].clone()),
            other => parse_number(other.as_text()?),
        }),
        "list" => Func::new(params, |a| Ok(Value::List(a.to_vec()))),
        _ => return None,
    };
    Some(func)
}

/// Parse trimmed text as an integer, then as a float.
pub fn parse_number(text: &str) -> Result<Value, ComputeError> {
    let text = text.trim();
    if let Ok(n) = text.parse::<i64>() {
        return Ok(Value::Int(n));
    }
    text.parse::<f64>()
        .map(Value::Number)
        .map_err(|_| ComputeError::new(format!("not a number: '{}'", text)))
}

fn pick(x: &Value, y: &Value, keep_first: fn(f64, f64) -> bool) -> Result<Value, ComputeError> {
    Ok(if keep_first(x.as_number()?, y.as_number()?) {
        x.clone()
    } else {
        y.clone()
    })
}

/// Equality where `1` and `1.0` are the same number.
fn loose_eq(x: &Value, y: &Value) -> bool {
    match (x, y) {
        (Value::Int(_) | Value::Number(_), Value::Int(_) | Value::Number(_)) => {
            x.as_number().ok() == y.as_number().ok()
        }
        _ => x == y,
    }
}

fn compare(x: &Value, y: &Value) -> Result<std::cmp::Ordering, ComputeError> {
    if let (Value::Text(a), Value::Text(b)) = (x, y) {
        return Ok(a.cmp(b));
    }
    let (a, b) = (x.as_number()?, y.as_number()?);
    a.partial_cmp(&b)
        .ok_or_else(|| ComputeError::new("cannot compare NaN"))
}

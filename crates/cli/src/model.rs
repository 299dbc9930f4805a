// Model files: a TOML description of static cells, derived cells built from
// builtins, and file-backed source cells.
//
//   [cells]
//   a = 3
//
//   [derived.c]
//   fn = "mul"
//   args = ["a", "b"]
//
//   [sources.notes]
//   file = "notes.txt"

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use cellwork_engine::dep_graph::DepGraph;
use cellwork_engine::{
    make_binding, Binding, EngineError, Reactive, ReactiveOptions, Value,
};
use serde::Deserialize;

use crate::builtins;
use crate::exit_codes::EXIT_MODEL_PARSE;
use crate::watch::FileSource;
use crate::CliError;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Model {
    #[serde(default)]
    pub cells: BTreeMap<String, toml::Value>,

    #[serde(default)]
    pub derived: BTreeMap<String, DerivedDef>,

    #[serde(default)]
    pub sources: BTreeMap<String, SourceDef>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DerivedDef {
    #[serde(rename = "fn")]
    pub func: String,

    /// Positional arguments. Strings are cell references.
    #[serde(default)]
    pub args: Vec<toml::Value>,

    #[serde(default)]
    pub kwargs: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceDef {
    /// Path relative to the model file.
    pub file: PathBuf,
}

/// A model installed into a fresh environment.
pub struct Loaded {
    pub env: Reactive,
    /// Source cell names with their backing files.
    pub sources: Vec<(String, Rc<FileSource>)>,
}

impl Model {
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| CliError::args(format!("cannot read {}: {}", path.display(), e)))?;
        Self::parse(&contents)
            .map_err(|e| CliError::model(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(contents: &str) -> Result<Self, String> {
        let model: Model = toml::from_str(contents).map_err(|e| e.to_string())?;

        for name in model.derived.keys().chain(model.sources.keys()) {
            if model.cells.contains_key(name) {
                return Err(format!("cell '{}' is defined more than once", name));
            }
        }
        for name in model.sources.keys() {
            if model.derived.contains_key(name) {
                return Err(format!("cell '{}' is defined more than once", name));
            }
        }

        Ok(model)
    }

    /// Build an environment holding every cell of the model.
    ///
    /// Derived cells are installed dependencies first, so eager environments
    /// never compute a cell before its inputs exist.
    pub fn build(&self, base_dir: &Path, options: ReactiveOptions) -> Result<Loaded, CliError> {
        let mut env = Reactive::with_options(options);

        for (name, value) in &self.cells {
            let value = to_value(value)
                .map_err(|e| CliError::model(format!("cells.{}: {}", name, e)))?;
            env.set(name, value).map_err(CliError::engine)?;
        }

        let mut sources = Vec::new();
        for (name, def) in &self.sources {
            let source = Rc::new(FileSource::new(base_dir.join(&def.file)));
            env.set(name, Binding::from_source(source.clone()))
                .map_err(CliError::engine)?;
            sources.push((name.clone(), source));
        }

        let mut bindings = BTreeMap::new();
        for (name, def) in &self.derived {
            bindings.insert(name.as_str(), self.binding(name, def)?);
        }

        for name in install_order(&bindings).map_err(CliError::engine)? {
            if let Some(binding) = bindings.remove(name.as_str()) {
                env.set(&name, binding).map_err(CliError::engine)?;
            }
        }

        log::info!(
            "loaded model: {} static, {} derived, {} sources",
            self.cells.len(),
            self.derived.len(),
            self.sources.len()
        );
        Ok(Loaded { env, sources })
    }

    fn binding(&self, name: &str, def: &DerivedDef) -> Result<Binding, CliError> {
        let func = builtins::lookup(&def.func).ok_or_else(|| {
            CliError::model(format!("derived.{}: unknown function '{}'", name, def.func))
                .with_hint(format!(
                    "available: {}",
                    builtins::names().collect::<Vec<_>>().join(", ")
                ))
        })?;

        let positional = def
            .args
            .iter()
            .map(to_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CliError::model(format!("derived.{}.args: {}", name, e)))?;
        let keyword = def
            .kwargs
            .iter()
            .map(|(param, value)| Ok((param.clone(), to_value(value)?)))
            .collect::<Result<Vec<_>, String>>()
            .map_err(|e| CliError::model(format!("derived.{}.kwargs: {}", name, e)))?;

        make_binding(func, positional, keyword).map_err(|e| {
            CliError::engine(EngineError::from(e)).with_hint(format!("in derived.{}", name))
        })
    }
}

/// Dependencies-first order of the derived cells; references to other cells
/// are ignored. A cycle among derived cells is reported as it would be by
/// the environment.
fn install_order(bindings: &BTreeMap<&str, Binding>) -> Result<Vec<String>, EngineError> {
    let mut graph = DepGraph::new();
    for (name, binding) in bindings {
        let deps: Vec<String> = binding
            .dependencies()
            .into_iter()
            .filter(|dep| bindings.contains_key(dep.as_str()))
            .collect();
        if let Some(cycle) = graph.would_create_cycle(name, &deps) {
            return Err(cycle.into());
        }
        graph.replace_edges(name, deps.into_iter().collect());
    }
    let names = bindings.keys().map(|name| name.to_string()).collect();
    Ok(graph.topo_order(&names)?)
}

/// Convert a TOML value to a cell value.
pub fn to_value(value: &toml::Value) -> Result<Value, String> {
    match value {
        toml::Value::String(s) => Ok(Value::Text(s.clone())),
        toml::Value::Integer(n) => Ok(Value::Int(*n)),
        toml::Value::Float(n) => Ok(Value::Number(*n)),
        toml::Value::Boolean(b) => Ok(Value::Bool(*b)),
        toml::Value::Datetime(dt) => Ok(Value::Text(dt.to_string())),
        toml::Value::Array(items) => items
            .iter()
            .map(to_value)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        toml::Value::Table(_) => Err("tables are not cell values".to_string()),
    }
}

/// Parse a `--set` value: int, float, bool, else text.
pub fn parse_literal(text: &str) -> Value {
    if let Ok(n) = text.parse::<i64>() {
        return Value::Int(n);
    }
    if let Ok(n) = text.parse::<f64>() {
        return Value::Number(n);
    }
    match text {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::Text(text.to_string()),
    }
}

impl CliError {
    pub fn model(msg: impl Into<String>) -> Self {
        Self { code: EXIT_MODEL_PARSE, message: msg.into(), hint: None }
    }
}

//! Interception data model: invocation arguments, capture policies, and
//! the derivation of stable interception keys.

use crate::errors::TapedeckError;
use serde_json::Value;
use std::collections::BTreeMap;

/// Arguments of one intercepted invocation. Keyword arguments are kept in
/// a sorted map so key identity is independent of call-site ordering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    pub positional: Vec<Value>,
    pub keyword: BTreeMap<String, Value>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn positional(values: Vec<Value>) -> Self {
        Self {
            positional: values,
            keyword: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, value: Value) -> Self {
        self.positional.push(value);
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.keyword.insert(name.into(), value);
        self
    }
}

/// Identifies one invocation argument participating in an interception
/// key, by name first and by position as a fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedArg {
    pub position: Option<usize>,
    pub name: String,
}

impl CapturedArg {
    pub fn new(position: Option<usize>, name: impl Into<String>) -> Self {
        Self {
            position,
            name: name.into(),
        }
    }
}

/// Which invocation arguments participate in an input interception key.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum CapturePolicy {
    /// All positional and keyword arguments.
    #[default]
    All,
    /// No arguments; the alias alone identifies the invocation.
    None,
    /// Only the listed arguments.
    Selected(Vec<CapturedArg>),
}

/// Per-invocation substitution of `{param}` placeholders in an alias,
/// letting one wrapped call site yield distinct key namespaces per
/// logical instance.
pub type AliasParamsResolver<'a> = &'a dyn Fn(&CallArgs) -> BTreeMap<String, String>;

/// Pluggable hook transforming an input value on its way into and out of
/// a recording.
pub trait InputDataHandler: Send + Sync {
    fn prepare_input_for_recording(
        &self,
        interception_key: &str,
        result: &Value,
        args: &CallArgs,
    ) -> Result<Value, TapedeckError>;

    fn restore_input_from_recording(
        &self,
        recorded: Value,
        args: &CallArgs,
    ) -> Result<Value, TapedeckError>;
}

/// Pluggable hook transforming intercepted output arguments on their way
/// into and out of a recording.
pub trait OutputDataHandler: Send + Sync {
    fn prepare_output_for_recording(
        &self,
        interception_key: &str,
        args: &CallArgs,
    ) -> Result<Value, TapedeckError>;

    fn restore_output_from_recording(&self, recorded: Value) -> Result<Value, TapedeckError>;
}

/// Applies the alias parameter resolver, substituting `{param}`
/// placeholders. A placeholder left unresolved is a key-creation error.
pub fn format_alias(
    alias: &str,
    resolver: Option<AliasParamsResolver<'_>>,
    args: &CallArgs,
) -> Result<String, TapedeckError> {
    let Some(resolver) = resolver else {
        return Ok(alias.to_string());
    };
    let mut formatted = alias.to_string();
    for (name, value) in resolver(args) {
        formatted = formatted.replace(&format!("{{{name}}}"), &value);
    }
    if formatted.contains('{') || formatted.contains('}') {
        return Err(TapedeckError::InputKeyCreation(format!(
            "alias '{alias}' has unresolved parameters: '{formatted}'"
        )));
    }
    Ok(formatted)
}

/// Derives the key uniquely identifying an input invocation from its
/// alias and the captured arguments, canonically encoded.
pub fn input_interception_key(
    alias: &str,
    policy: &CapturePolicy,
    args: &CallArgs,
) -> Result<String, TapedeckError> {
    let (captured_args, captured_kwargs) = match policy {
        CapturePolicy::All => (args.positional.clone(), args.keyword.clone()),
        CapturePolicy::None => (Vec::new(), BTreeMap::new()),
        CapturePolicy::Selected(selected) => {
            let mut captured_args = Vec::new();
            let mut captured_kwargs = BTreeMap::new();
            for captured in selected {
                // Name takes precedence: it covers both keyword-only
                // arguments and mandatory arguments passed by name.
                if let Some(value) = args.keyword.get(&captured.name) {
                    captured_kwargs.insert(captured.name.clone(), value.clone());
                } else if let Some(position) = captured.position {
                    let value = args.positional.get(position).ok_or_else(|| {
                        TapedeckError::InputKeyCreation(format!(
                            "captured arg '{}' position {position} out of range for alias '{alias}'",
                            captured.name
                        ))
                    })?;
                    captured_args.push(value.clone());
                }
            }
            (captured_args, captured_kwargs)
        }
    };

    let args_key = serde_json::to_string(&captured_args)
        .map_err(|e| TapedeckError::InputKeyCreation(e.to_string()))?;
    // Encoded as a name-sorted pair list, the BTreeMap iterates in order
    let kwargs_pairs: Vec<(&String, &Value)> = captured_kwargs.iter().collect();
    let kwargs_key = serde_json::to_string(&kwargs_pairs)
        .map_err(|e| TapedeckError::InputKeyCreation(e.to_string()))?;
    Ok(format!("input: {alias} args={args_key}, kwargs={kwargs_key}"))
}

/// Derives the key identifying the Nth output invocation of an alias.
pub fn output_interception_key(alias: &str, invocation_number: u64) -> String {
    format!("output: {alias} #{invocation_number}")
}

/// Deep copy through the serialization boundary, so recorded values match
/// what a playback would read back from a persisted recording.
pub fn serialized_copy(value: &Value) -> Result<Value, TapedeckError> {
    let encoded =
        serde_json::to_string(value).map_err(|e| TapedeckError::Serialization(e.to_string()))?;
    serde_json::from_str(&encoded).map_err(|e| TapedeckError::Serialization(e.to_string()))
}

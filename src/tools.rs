//! Caller-registered functions the model may call.

use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::error::FunctionError;
use crate::types::{FunctionCall, InputItem, Tool};
use crate::Error;

type Validator = Arc<dyn Fn(&Value) -> Result<Value, FunctionError> + Send + Sync>;
type Executor = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, FunctionError>> + Send + Sync>;

/// A callable capability offered to the model: schema, validator and executor.
///
/// Cloning is cheap; the validator and executor are shared.
#[derive(Clone)]
pub struct FunctionDescriptor {
    name: String,
    description: String,
    input_schema: Value,
    output_schema: Option<Value>,
    validator: Option<Validator>,
    executor: Executor,
}

impl FunctionDescriptor {
    /// Describe a function. Arguments are validated against `input_schema`
    /// unless a custom validator is installed with [`with_validator`](Self::with_validator).
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        execute: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, FunctionError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            output_schema: None,
            validator: None,
            executor: Arc::new(move |args| Box::pin(execute(args))),
        }
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Replace schema validation with a custom validator.
    ///
    /// The validator may normalize the arguments; its output is what `execute` receives.
    pub fn with_validator<V>(mut self, validate: V) -> Self
    where
        V: Fn(&Value) -> Result<Value, FunctionError> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validate));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    pub fn output_schema(&self) -> Option<&Value> {
        self.output_schema.as_ref()
    }

    /// Validate model-supplied arguments.
    pub fn validate(&self, args: &Value) -> Result<Value, FunctionError> {
        match &self.validator {
            Some(validate) => validate(args),
            None => {
                check_schema(&self.input_schema, args)?;
                Ok(args.clone())
            }
        }
    }

    /// Execute the function with already-validated arguments.
    pub async fn execute(&self, args: Value) -> Result<Value, FunctionError> {
        (self.executor)(args).await
    }

    /// The tool declaration sent to providers.
    pub fn declaration(&self) -> Tool {
        Tool::function(&self.name, &self.description, self.input_schema.clone())
    }
}

impl fmt::Debug for FunctionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("custom_validator", &self.validator.is_some())
            .finish_non_exhaustive()
    }
}

/// Validate `value` against a JSON schema, joining every violation into one message.
pub fn check_schema(schema: &Value, value: &Value) -> Result<(), FunctionError> {
    let validator = jsonschema::options()
        .build(schema)
        .map_err(|e| FunctionError::new(format!("invalid schema: {e}")))?;

    let errors: Vec<String> = validator
        .iter_errors(value)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{e} at {path}")
            }
        })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(FunctionError::new(errors.join("; ")))
    }
}

/// The payload of a tool call result.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolPayload {
    Output(Value),
    Error(Value),
}

/// The answer to one function call, correlated by `call_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallResult {
    pub call_id: String,
    pub name: String,
    pub payload: ToolPayload,
}

impl ToolCallResult {
    fn output(call: &FunctionCall, value: Value) -> Self {
        Self {
            call_id: call.call_id.clone(),
            name: call.name.clone(),
            payload: ToolPayload::Output(value),
        }
    }

    fn error(call: &FunctionCall, message: impl Into<String>) -> Self {
        Self {
            call_id: call.call_id.clone(),
            name: call.name.clone(),
            payload: ToolPayload::Error(json!({ "error": message.into() })),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.payload, ToolPayload::Error(_))
    }

    /// The JSON text sent back to the model.
    pub fn output_json(&self) -> String {
        match &self.payload {
            ToolPayload::Output(value) | ToolPayload::Error(value) => value.to_string(),
        }
    }

    /// The transcript item carrying this result.
    pub fn to_input_item(&self) -> InputItem {
        InputItem::function_call_output(&self.call_id, &self.name, self.output_json())
    }
}

/// The functions offered on one request, indexed by name.
#[derive(Debug, Clone, Default)]
pub struct FunctionSet<'a> {
    functions: Vec<&'a FunctionDescriptor>,
    by_name: HashMap<&'a str, usize>,
}

impl<'a> FunctionSet<'a> {
    /// Index `functions`, rejecting duplicate names.
    pub fn new(functions: &'a [FunctionDescriptor]) -> Result<Self, Error> {
        let mut set = Self::default();
        for function in functions {
            if set.by_name.insert(function.name(), set.functions.len()).is_some() {
                return Err(Error::config(format!(
                    "duplicate function name '{}'",
                    function.name()
                )));
            }
            set.functions.push(function);
        }
        Ok(set)
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&'a FunctionDescriptor> {
        self.by_name.get(name).map(|&index| self.functions[index])
    }

    /// Tool declarations in registration order.
    pub fn declarations(&self) -> Vec<Tool> {
        self.functions.iter().map(|f| f.declaration()).collect()
    }

    /// Answer one function call. Never fails: every problem becomes an error-shaped result.
    pub async fn call(&self, call: &FunctionCall) -> ToolCallResult {
        let Some(function) = self.get(&call.name) else {
            tracing::warn!(function = %call.name, "model requested an unknown function");
            return ToolCallResult::error(call, format!("Unknown function: {}", call.name));
        };

        let raw_args = if call.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str::<Value>(&call.arguments) {
                Ok(args) => args,
                Err(e) => {
                    return ToolCallResult::error(
                        call,
                        format!("Arguments for {} are not valid JSON: {e}", call.name),
                    )
                }
            }
        };

        let args = match function.validate(&raw_args) {
            Ok(args) => args,
            Err(e) => {
                tracing::debug!(function = %call.name, error = %e, "function arguments rejected");
                return ToolCallResult::error(call, format!("Invalid arguments for {}: {e}", call.name));
            }
        };

        match function.execute(args).await {
            Ok(value) => {
                if let Some(schema) = function.output_schema() {
                    if let Err(e) = check_schema(schema, &value) {
                        tracing::warn!(function = %call.name, error = %e, "function output does not match its schema");
                    }
                }
                ToolCallResult::output(call, value)
            }
            Err(e) => {
                tracing::warn!(function = %call.name, error = %e, "function execution failed");
                ToolCallResult::error(call, format!("{} failed: {e}", call.name))
            }
        }
    }

    /// Answer every call of one round concurrently. Results keep the order of `calls`.
    pub async fn call_all(&self, calls: &[&FunctionCall]) -> Vec<ToolCallResult> {
        futures::future::join_all(calls.iter().map(|call| self.call(call))).await
    }
}

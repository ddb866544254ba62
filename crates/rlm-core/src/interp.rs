//! Interpreter adapter: the opaque sandbox boundary evaluated programs run
//! behind, plus the three re-entrant host callbacks a running program can
//! call back into its owning worker through.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

/// Opaque, ordered binding environment. Only the three reserved names are
/// ever inspected by the engine itself; everything else is round-tripped
/// untouched between evaluations.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    entries: Vec<(String, Value)>,
}

pub const RESERVED_CONTEXT: &str = "context";
pub const RESERVED_FINAL_ANSWER: &str = "final_answer";
pub const RESERVED_COMPACTED_HISTORY: &str = "compacted_history";

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == &name) {
            entry.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn final_answer(&self) -> Option<&Value> {
        self.get(RESERVED_FINAL_ANSWER)
    }

    /// Shape summary of every binding, the only thing outside the
    /// interpreter adapter is allowed to see about their contents.
    pub fn info(&self) -> Vec<BindingSummary> {
        self.entries
            .iter()
            .map(|(name, value)| BindingSummary {
                name: name.clone(),
                ty: json_type_name(value).to_string(),
                bytes: serde_json::to_string(value).map(|s| s.len()).unwrap_or(0),
            })
            .collect()
    }
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone)]
pub struct BindingSummary {
    pub name: String,
    pub ty: String,
    pub bytes: usize,
}

/// Outcome of one evaluation.
pub enum EvalOutcome {
    Ok {
        stdout: String,
        value: Option<Value>,
        new_bindings: Bindings,
    },
    Err {
        error_output: String,
        original_bindings: Bindings,
    },
}

/// Model size hint a subcall/direct-query request can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSize {
    Large,
    Small,
}

/// The three re-entrant callbacks a running evaluation can invoke on its
/// owning worker. Implemented by the worker's handle; the interpreter
/// adapter never needs to know what's on the other side.
#[async_trait]
pub trait HostCallbacks: Send + Sync {
    async fn spawn_subcall(
        &self,
        text: String,
        model_size: ModelSize,
    ) -> Result<String, String>;

    async fn direct_query(
        &self,
        text: String,
        model_size: ModelSize,
        schema: Option<Value>,
    ) -> Result<Value, String>;

    async fn bindings_info(&self) -> Vec<BindingSummary>;
}

#[async_trait]
pub trait InterpreterAdapter: Send + Sync {
    async fn eval(
        &self,
        program: &str,
        bindings: Bindings,
        timeout: Duration,
        callbacks: Arc<dyn HostCallbacks>,
    ) -> EvalOutcome;
}

/// A scripted program for [`MockInterpreterAdapter`], expressed directly
/// rather than parsed from text, so worker/run tests can drive the
/// iterate loop deterministically without a real language sandbox.
pub enum ScriptedStep {
    SetFinalAnswer(Value),
    SetBinding(String, Value),
    Print(String),
    Subcall {
        text: String,
        model_size: ModelSize,
        binding: String,
    },
    DirectQuery {
        text: String,
        model_size: ModelSize,
        schema: Option<Value>,
        binding: String,
    },
    /// Like `Subcall`, but the program catches the result itself instead of
    /// letting a rejection fail the whole evaluation — `binding` ends up
    /// holding `{"ok": answer}` or `{"error": reason}`.
    CatchSubcall {
        text: String,
        model_size: ModelSize,
        binding: String,
    },
    /// Like `DirectQuery`, but the program catches the result itself.
    CatchDirectQuery {
        text: String,
        model_size: ModelSize,
        schema: Option<Value>,
        binding: String,
    },
    Fail(String),
}

pub struct MockInterpreterAdapter {
    programs: std::sync::Mutex<std::collections::HashMap<String, VecDeque<ScriptedStep>>>,
}

impl MockInterpreterAdapter {
    pub fn new() -> Self {
        Self {
            programs: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Register the steps to run when `eval` is called with `program` as
    /// the literal program text.
    pub fn script(&self, program: impl Into<String>, steps: Vec<ScriptedStep>) {
        self.programs
            .lock()
            .unwrap()
            .insert(program.into(), steps.into_iter().collect());
    }
}

impl Default for MockInterpreterAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InterpreterAdapter for MockInterpreterAdapter {
    async fn eval(
        &self,
        program: &str,
        bindings: Bindings,
        _timeout: Duration,
        callbacks: Arc<dyn HostCallbacks>,
    ) -> EvalOutcome {
        let steps = {
            let mut programs = self.programs.lock().unwrap();
            match programs.get_mut(program) {
                Some(steps) => std::mem::take(steps),
                None => {
                    return EvalOutcome::Err {
                        error_output: format!("no script registered for program: {program}"),
                        original_bindings: bindings,
                    };
                }
            }
        };

        let mut bindings = bindings;
        let mut stdout = String::new();

        for step in steps {
            match step {
                ScriptedStep::SetFinalAnswer(v) => bindings.insert(RESERVED_FINAL_ANSWER, v),
                ScriptedStep::SetBinding(name, v) => bindings.insert(name, v),
                ScriptedStep::Print(s) => {
                    stdout.push_str(&s);
                    stdout.push('\n');
                }
                ScriptedStep::Subcall {
                    text,
                    model_size,
                    binding,
                } => match callbacks.spawn_subcall(text, model_size).await {
                    Ok(answer) => bindings.insert(binding, Value::String(answer)),
                    Err(reason) => {
                        return EvalOutcome::Err {
                            error_output: reason,
                            original_bindings: bindings,
                        };
                    }
                },
                ScriptedStep::DirectQuery {
                    text,
                    model_size,
                    schema,
                    binding,
                } => match callbacks.direct_query(text, model_size, schema).await {
                    Ok(value) => bindings.insert(binding, value),
                    Err(reason) => {
                        return EvalOutcome::Err {
                            error_output: reason,
                            original_bindings: bindings,
                        };
                    }
                },
                ScriptedStep::CatchSubcall {
                    text,
                    model_size,
                    binding,
                } => {
                    let value = match callbacks.spawn_subcall(text, model_size).await {
                        Ok(answer) => serde_json::json!({"ok": answer}),
                        Err(reason) => serde_json::json!({"error": reason}),
                    };
                    bindings.insert(binding, value);
                }
                ScriptedStep::CatchDirectQuery {
                    text,
                    model_size,
                    schema,
                    binding,
                } => {
                    let value = match callbacks.direct_query(text, model_size, schema).await {
                        Ok(v) => serde_json::json!({"ok": v}),
                        Err(reason) => serde_json::json!({"error": reason}),
                    };
                    bindings.insert(binding, value);
                }
                ScriptedStep::Fail(reason) => {
                    return EvalOutcome::Err {
                        error_output: reason,
                        original_bindings: bindings,
                    };
                }
            }
        }

        EvalOutcome::Ok {
            stdout,
            value: bindings.final_answer().cloned(),
            new_bindings: bindings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopCallbacks;

    #[async_trait]
    impl HostCallbacks for NoopCallbacks {
        async fn spawn_subcall(&self, _text: String, _model_size: ModelSize) -> Result<String, String> {
            Ok("child answer".to_string())
        }
        async fn direct_query(
            &self,
            _text: String,
            _model_size: ModelSize,
            _schema: Option<Value>,
        ) -> Result<Value, String> {
            Ok(serde_json::json!({"ok": true}))
        }
        async fn bindings_info(&self) -> Vec<BindingSummary> {
            vec![]
        }
    }

    #[tokio::test]
    async fn scripted_final_answer_is_returned() {
        let interp = MockInterpreterAdapter::new();
        interp.script(
            "final_answer = 42",
            vec![ScriptedStep::SetFinalAnswer(serde_json::json!(42))],
        );
        let outcome = interp
            .eval(
                "final_answer = 42",
                Bindings::new(),
                Duration::from_secs(1),
                Arc::new(NoopCallbacks),
            )
            .await;
        match outcome {
            EvalOutcome::Ok { value, .. } => assert_eq!(value, Some(serde_json::json!(42))),
            EvalOutcome::Err { .. } => panic!("expected ok"),
        }
    }

    #[tokio::test]
    async fn unregistered_program_errors() {
        let interp = MockInterpreterAdapter::new();
        let outcome = interp
            .eval(
                "nonexistent",
                Bindings::new(),
                Duration::from_secs(1),
                Arc::new(NoopCallbacks),
            )
            .await;
        assert!(matches!(outcome, EvalOutcome::Err { .. }));
    }

    #[test]
    fn bindings_info_reports_shape_not_contents() {
        let mut bindings = Bindings::new();
        bindings.insert("x", serde_json::json!("a secret string"));
        let info = bindings.info();
        assert_eq!(info[0].name, "x");
        assert_eq!(info[0].ty, "string");
    }
}

//! MetroScript-lite evaluator for the simulated server
//!
//! Understands just enough of a script to exercise the client end to end:
//!
//! - `print <expr>[, <expr>...]` appends the space-joined values and a newline
//!   to the script output
//! - `stop <expr>` sets the stop value (numeric or text)
//! - `status <kind>` raises a status notification, e.g. `status begin_acquire`
//! - anything else is run as Rhai code; consecutive lines form one chunk, so
//!   blocks may span lines
//!
//! Expressions are evaluated by an embedded Rhai engine with a shared scope,
//! so `let x = 2` on one line is visible to `print x * 3` on the next.

use rhai::{Dynamic, Engine, EvalAltResult, Scope};
use tracing::trace;

use crate::status::StatusKind;

/// Maximum operations per script before it is aborted.
const MAX_OPERATIONS: u64 = 100_000;

/// Stop value left behind by a script.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct StopSlot {
    pub number: f64,
    pub text: String,
}

/// Everything a finished script leaves behind.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct Evaluation {
    pub output: String,
    pub stop: StopSlot,
    /// Error message if the script aborted.
    pub error: Option<String>,
}

/// Rhai-backed evaluator, shared by all simulated interfaces.
pub(crate) struct ScriptEvaluator {
    engine: Engine,
}

impl ScriptEvaluator {
    pub fn new() -> Self {
        let mut engine = Engine::new();

        // Safety limit against runaway loops
        engine.on_progress(|count| {
            if count > MAX_OPERATIONS {
                Some(format!("Safety limit exceeded: maximum {MAX_OPERATIONS} operations").into())
            } else {
                None
            }
        });
        engine.on_print(|text| trace!(text, "script print"));

        // MetroScript accepts integer arguments to its math functions
        engine.register_fn("sqrt", |x: i64| (x as f64).sqrt());

        Self { engine }
    }

    /// Run a script. `emit` is called for every `status` line, in order.
    pub fn evaluate(&self, script: &str, emit: &mut dyn FnMut(StatusKind)) -> Evaluation {
        let mut scope = Scope::new();
        let mut evaluation = Evaluation::default();
        let mut chunk = String::new();

        for line in script.lines() {
            let directive = Directive::parse(line);
            if matches!(directive, Directive::Code) {
                chunk.push_str(line);
                chunk.push('\n');
                continue;
            }

            let result = match self.run_chunk(&mut scope, &mut chunk) {
                Ok(()) => self.apply(&mut scope, directive, &mut evaluation, &mut *emit),
                Err(message) => Err(message),
            };
            if let Err(message) = result {
                evaluation.output.push_str(&message);
                evaluation.error = Some(message);
                return evaluation;
            }
        }

        if let Err(message) = self.run_chunk(&mut scope, &mut chunk) {
            evaluation.output.push_str(&message);
            evaluation.error = Some(message);
        }
        evaluation
    }

    fn run_chunk(&self, scope: &mut Scope<'static>, chunk: &mut String) -> Result<(), String> {
        if chunk.trim().is_empty() {
            chunk.clear();
            return Ok(());
        }
        let code = std::mem::take(chunk);
        self.engine
            .run_with_scope(scope, &code)
            .map_err(|e| convert_rhai_error(&e))
    }

    fn apply(
        &self,
        scope: &mut Scope<'static>,
        directive: Directive<'_>,
        evaluation: &mut Evaluation,
        emit: &mut dyn FnMut(StatusKind),
    ) -> Result<(), String> {
        match directive {
            Directive::Print(args) => {
                let mut values = Vec::new();
                for expr in split_arguments(args) {
                    values.push(format_value(&self.eval(scope, expr)?));
                }
                evaluation.output.push_str(&values.join(" "));
                evaluation.output.push('\n');
            }
            Directive::Stop(expr) => {
                let value = self.eval(scope, expr)?;
                evaluation.stop = if let Ok(n) = value.as_float() {
                    StopSlot {
                        number: n,
                        text: format_value(&value),
                    }
                } else if let Ok(n) = value.as_int() {
                    StopSlot {
                        number: n as f64,
                        text: n.to_string(),
                    }
                } else {
                    StopSlot {
                        number: 0.0,
                        text: format_value(&value),
                    }
                };
            }
            Directive::Status(name) => {
                let kind = StatusKind::from_name(name)
                    .ok_or_else(|| format!("Unknown status '{name}'"))?;
                emit(kind);
            }
            Directive::Blank | Directive::Code => {}
        }
        Ok(())
    }

    fn eval(&self, scope: &mut Scope<'static>, expr: &str) -> Result<Dynamic, String> {
        self.engine
            .eval_expression_with_scope::<Dynamic>(scope, expr)
            .map_err(|e| convert_rhai_error(&e))
    }
}

enum Directive<'a> {
    Blank,
    Print(&'a str),
    Stop(&'a str),
    Status(&'a str),
    Code,
}

impl<'a> Directive<'a> {
    fn parse(line: &'a str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Directive::Blank;
        }
        let (word, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (trimmed, ""),
        };
        match word {
            "print" => Directive::Print(rest),
            "stop" if !rest.is_empty() => Directive::Stop(rest),
            "status" if !rest.is_empty() => Directive::Status(rest),
            _ => Directive::Code,
        }
    }
}

/// Split `a, "b, c", f(d, e)` on top-level commas only.
fn split_arguments(args: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in args.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(args[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = args[start..].trim();
    if !last.is_empty() || !parts.is_empty() {
        parts.push(last);
    }
    parts
}

fn format_value(value: &Dynamic) -> String {
    if let Ok(s) = value.clone().into_string() {
        return s;
    }
    if value.is_unit() {
        return String::new();
    }
    value.to_string()
}

fn convert_rhai_error(err: &EvalAltResult) -> String {
    format!("Script error: {err}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(script: &str) -> (Evaluation, Vec<StatusKind>) {
        let evaluator = ScriptEvaluator::new();
        let mut raised = Vec::new();
        let evaluation = evaluator.evaluate(script, &mut |kind| raised.push(kind));
        (evaluation, raised)
    }

    #[test]
    fn test_print_expression() {
        let (evaluation, _) = run("print 1+1");
        assert_eq!(evaluation.output, "2\n");
        assert!(evaluation.error.is_none());
    }

    #[test]
    fn test_print_multiple_arguments() {
        let (evaluation, _) = run("\t print \"the square root of 4 is\", sqrt(4)");
        assert_eq!(evaluation.output, "the square root of 4 is 2.0\n");
    }

    #[test]
    fn test_scope_persists_between_lines() {
        let (evaluation, _) = run("let x = 3;\nprint x * 2\nstop x + 0.5");
        assert_eq!(evaluation.output, "6\n");
        assert_eq!(evaluation.stop.number, 3.5);
        assert_eq!(evaluation.stop.text, "3.5");
    }

    #[test]
    fn test_text_stop_value() {
        let (evaluation, _) = run("stop \"done\"");
        assert_eq!(evaluation.stop.text, "done");
        assert_eq!(evaluation.stop.number, 0.0);
    }

    #[test]
    fn test_status_lines_are_raised_in_order() {
        let (_, raised) = run("status begin_acquire\nstatus end_acquire");
        assert_eq!(raised, vec![StatusKind::BeginAcquire, StatusKind::EndAcquire]);
    }

    #[test]
    fn test_error_aborts_script() {
        let (evaluation, _) = run("print 1\nprint undefined_variable\nprint 3");
        assert!(evaluation.error.is_some());
        assert!(evaluation.output.starts_with("1\n"));
        assert!(!evaluation.output.contains("3\n"));
    }

    #[test]
    fn test_runaway_loop_is_stopped() {
        let (evaluation, _) = run("loop { }");
        let message = evaluation.error.unwrap();
        assert!(message.contains("Safety limit") || message.contains("terminated"));
    }

    #[test]
    fn test_split_arguments() {
        assert_eq!(split_arguments("a, \"b, c\", f(d, e)"), vec!["a", "\"b, c\"", "f(d, e)"]);
        assert!(split_arguments("").is_empty());
    }
}

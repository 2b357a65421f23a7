//! Script compiler
//!
//! A job's `script` arrives in one of three encodings:
//!
//! 1. a structured object `{ "steps": [...] }`, taken as-is;
//! 2. JSON text of such an object, parsed (and written back in place);
//! 3. line-oriented text, one instruction per line.
//!
//! Line grammar (keywords are case-insensitive, the colon is optional):
//!
//! ```text
//! navigate[:] [to] <url>
//! capture[:] <url-substring>
//! extract[:] <instruction>          -> prompt is the whole line
//! evaluate[:] <javascript>
//! sleep[:] [for] <milliseconds>
//! <anything else>                   -> AI action, prompt is the whole line
//! ```
//!
//! Lines that do not start with a word character (blank lines, `#` and `//`
//! comments) are ignored. Rules are tried in the order above and the first
//! one whose full shape matches wins.

use super::step::{CaptureStep, EvaluateStep, NavigateStep, PromptStep, SleepStep, Step};
use crate::error::{Result, StepError};
use serde_json::Value;

/// One line rule: returns a step when the whole line has this rule's shape.
type LineRule = fn(&str) -> Option<Step>;

const LINE_RULES: &[LineRule] = &[
    navigate_rule,
    capture_rule,
    extract_rule,
    evaluate_rule,
    sleep_rule,
];

/// Compile a job's script into steps.
///
/// JSON text is replaced in place by the parsed object so later consumers
/// (and the verbose job dump) see the normalized form. An empty result is
/// not an error here; the executor refuses to run it.
pub fn compile(script: &mut Value) -> Result<Vec<Step>> {
    match script {
        Value::Object(_) => steps_from_object(script),
        Value::String(text) => {
            if looks_like_json_object(text) {
                let parsed: Value = serde_json::from_str(text.trim())?;
                *script = parsed;
                steps_from_object(script)
            } else {
                Ok(compile_lines(text))
            }
        }
        Value::Null => Ok(Vec::new()),
        other => Err(StepError::validation(format!(
            "Script must be an object or text, got: {}",
            other
        ))),
    }
}

/// Compile line-oriented text.
pub fn compile_lines(text: &str) -> Vec<Step> {
    text.lines()
        .map(str::trim)
        .filter(|line| starts_with_word_char(line))
        .map(compile_line)
        .collect()
}

fn compile_line(line: &str) -> Step {
    LINE_RULES
        .iter()
        .find_map(|rule| rule(line))
        .unwrap_or_else(|| {
            Step::Action(PromptStep {
                prompt: Some(line.to_string()),
                timeout: None,
            })
        })
}

fn steps_from_object(script: &Value) -> Result<Vec<Step>> {
    match script.get("steps") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.iter().cloned().map(Step::from_value).collect()),
        Some(_) => Err(StepError::validation("Script 'steps' must be a list")),
    }
}

fn looks_like_json_object(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.len() >= 3 && trimmed.starts_with('{') && trimmed.ends_with('}')
}

fn starts_with_word_char(line: &str) -> bool {
    line.chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Strip `keyword`, an optional `:` and at least one whitespace character.
/// Returns the (non-empty) remainder.
fn after_keyword<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let head = line.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    let rest = &line[keyword.len()..];
    let rest = rest.strip_prefix(':').unwrap_or(rest);
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let rest = rest.trim_start();
    (!rest.is_empty()).then_some(rest)
}

/// `rest` as one whitespace-free token, optionally preceded by `word` and whitespace.
fn single_token_after_optional<'a>(rest: &'a str, word: &str) -> Option<&'a str> {
    if let Some(tail) = after_keyword(rest, word) {
        if !tail.contains(char::is_whitespace) {
            return Some(tail);
        }
    }
    (!rest.contains(char::is_whitespace)).then_some(rest)
}

fn navigate_rule(line: &str) -> Option<Step> {
    let rest = after_keyword(line, "navigate")?;
    let url = single_token_after_optional(rest, "to")?;
    Some(Step::Navigate(NavigateStep {
        url: Some(Value::String(url.to_string())),
        ..Default::default()
    }))
}

fn capture_rule(line: &str) -> Option<Step> {
    let rest = after_keyword(line, "capture")?;
    if rest.contains(char::is_whitespace) {
        return None;
    }
    Some(Step::Capture(CaptureStep {
        url: Some(Value::String(rest.to_string())),
        ..Default::default()
    }))
}

fn extract_rule(line: &str) -> Option<Step> {
    after_keyword(line, "extract")?;
    Some(Step::Extract(PromptStep {
        prompt: Some(line.to_string()),
        timeout: None,
    }))
}

fn evaluate_rule(line: &str) -> Option<Step> {
    let code = after_keyword(line, "evaluate")?;
    Some(Step::Evaluate(EvaluateStep {
        script: Some(code.to_string()),
    }))
}

fn sleep_rule(line: &str) -> Option<Step> {
    let rest = after_keyword(line, "sleep")?;
    let digits = single_token_after_optional(rest, "for")?;
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let duration = digits.parse().ok()?;
    Some(Step::Sleep(SleepStep {
        duration: Some(duration),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn navigate(url: &str) -> Step {
        Step::Navigate(NavigateStep {
            url: Some(json!(url)),
            ..Default::default()
        })
    }

    #[test]
    fn test_navigate_line() {
        assert_eq!(
            compile_lines("navigate https://example.com"),
            vec![navigate("https://example.com")]
        );
        assert_eq!(
            compile_lines("Navigate: to https://example.com/a?b=c"),
            vec![navigate("https://example.com/a?b=c")]
        );
        assert_eq!(compile_lines("NAVIGATE to"), vec![navigate("to")]);
    }

    #[test]
    fn test_comments_and_blanks_skipped() {
        let steps = compile_lines("# a comment\n\n   \n// another\n  - bullet\nsleep 10");
        assert_eq!(
            steps,
            vec![Step::Sleep(SleepStep {
                duration: Some(10)
            })]
        );
    }

    #[test]
    fn test_keyword_rules() {
        let steps = compile_lines(
            "capture: api/users\n\
             extract the product names and prices\n\
             evaluate: document.title\n\
             sleep for 250\n\
             click the login button",
        );

        assert_eq!(
            steps,
            vec![
                Step::Capture(CaptureStep {
                    url: Some(json!("api/users")),
                    ..Default::default()
                }),
                Step::Extract(PromptStep {
                    prompt: Some("extract the product names and prices".to_string()),
                    timeout: None,
                }),
                Step::Evaluate(EvaluateStep {
                    script: Some("document.title".to_string()),
                }),
                Step::Sleep(SleepStep {
                    duration: Some(250)
                }),
                Step::Action(PromptStep {
                    prompt: Some("click the login button".to_string()),
                    timeout: None,
                }),
            ]
        );
    }

    #[test]
    fn test_near_misses_fall_through_to_action() {
        let action = |line: &str| {
            Step::Action(PromptStep {
                prompt: Some(line.to_string()),
                timeout: None,
            })
        };

        // keyword must be followed by whitespace
        assert_eq!(compile_lines("navigatehome now"), vec![action("navigatehome now")]);
        // navigate takes exactly one token
        assert_eq!(
            compile_lines("navigate to the home page"),
            vec![action("navigate to the home page")]
        );
        // sleep wants an integer
        assert_eq!(compile_lines("sleep a while"), vec![action("sleep a while")]);
        // bare keyword with nothing after it
        assert_eq!(compile_lines("extract"), vec![action("extract")]);
    }

    #[test]
    fn test_encodings_are_equivalent() {
        let mut structured = json!({
            "steps": [
                {"type": "navigate", "url": "https://example.com"},
                {"type": "capture", "url": "api/users"},
                {"type": "evaluate", "script": "document.title"},
                {"type": "sleep", "duration": 500},
                {"type": "action", "prompt": "click the first result"}
            ]
        });
        let mut json_text = Value::String(format!("  {}\n", structured));
        let mut lines = json!(
            "navigate https://example.com\n\
             capture api/users\n\
             evaluate document.title\n\
             sleep 500\n\
             click the first result"
        );

        let a = compile(&mut structured).unwrap();
        let b = compile(&mut json_text).unwrap();
        let c = compile(&mut lines).unwrap();

        assert_eq!(a.len(), 5);
        assert_eq!(a, b);
        assert_eq!(a, c);

        // JSON text is normalized in place
        assert!(json_text.is_object());
    }

    #[test]
    fn test_malformed_json_text_is_parse_error() {
        let mut script = json!("{ \"steps\": [ oops ] }");
        assert!(matches!(compile(&mut script), Err(StepError::ScriptParse(_))));
    }

    #[test]
    fn test_empty_scripts_compile_to_nothing() {
        assert!(compile(&mut json!({})).unwrap().is_empty());
        assert!(compile(&mut json!({"steps": []})).unwrap().is_empty());
        assert!(compile(&mut json!("# only a comment\n")).unwrap().is_empty());
        assert!(compile(&mut Value::Null).unwrap().is_empty());
    }
}

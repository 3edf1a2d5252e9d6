//! String templating with a fixed filter set.
//!
//! Rendering uses an empty minijinja environment, so only the filters
//! registered here exist; any other filter is a render error. Control flow
//! is limited to `{% for %}` and `{% if %}` as far as step authors are
//! concerned. Undefined variables render as the empty string unless strict
//! mode is on.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use kgflow_core::SharedClock;
use minijinja::value::ValueKind;
use minijinja::{Environment, Error as JinjaError, ErrorKind, UndefinedBehavior, Value};
use serde_json::Map;
use std::cmp::Ordering;
use thiserror::Error;

/// Names of every filter a template may use.
pub const FILTERS: &[&str] = &[
    "date",
    "split",
    "join",
    "length",
    "sum",
    "max",
    "min",
    "round",
    "int",
    "float",
    "tojson",
    "default",
    "capitalize",
    "truncate",
];

#[derive(Error, Debug, Clone, PartialEq)]
#[error("template error: {0}")]
pub struct RenderError(pub String);

impl From<JinjaError> for RenderError {
    fn from(err: JinjaError) -> Self {
        let mut message = err.to_string();
        if let Some(detail) = err.detail() {
            if !message.contains(detail) {
                message = format!("{message}: {detail}");
            }
        }
        Self(message)
    }
}

#[derive(Debug)]
pub struct TemplateRenderer {
    env: Environment<'static>,
    clock: SharedClock,
    strict: bool,
}

impl TemplateRenderer {
    pub fn new(clock: SharedClock, strict: bool) -> Self {
        let mut env = Environment::empty();
        env.set_keep_trailing_newline(true);
        env.set_undefined_behavior(if strict {
            UndefinedBehavior::Strict
        } else {
            UndefinedBehavior::Chainable
        });

        let date_clock = clock.clone();
        env.add_filter("date", move |value: Value, format: Option<String>| {
            date(&date_clock, value, format)
        });
        env.add_filter("split", split);
        env.add_filter("join", join);
        env.add_filter("length", length);
        env.add_filter("sum", sum);
        env.add_filter("max", |value: Value, attribute: Option<String>| extreme(value, attribute, Ordering::Greater));
        env.add_filter("min", |value: Value, attribute: Option<String>| extreme(value, attribute, Ordering::Less));
        env.add_filter("round", round);
        env.add_filter("int", int);
        env.add_filter("float", float);
        env.add_filter("tojson", tojson);
        env.add_filter("default", default);
        env.add_filter("capitalize", capitalize);
        env.add_filter("truncate", truncate);

        Self { env, clock, strict }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Whether `text` contains template syntax.
    pub fn is_template(text: &str) -> bool {
        text.contains("{{") || text.contains("{%")
    }

    /// Renders `source` with `vars`. `now` is available as an RFC 3339
    /// string unless the caller supplies its own.
    pub fn render(&self, source: &str, vars: &Map<String, serde_json::Value>) -> Result<String, RenderError> {
        let mut ctx = vars.clone();
        if !ctx.contains_key("now") {
            ctx.insert("now".to_string(), serde_json::Value::String(self.clock.now().to_rfc3339()));
        }
        Ok(self.env.render_str(source, ctx)?)
    }

    /// Renders strings that contain template syntax, recursing into arrays
    /// and objects; other values are returned unchanged.
    pub fn render_value(
        &self,
        value: &serde_json::Value,
        vars: &Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, RenderError> {
        Ok(match value {
            serde_json::Value::String(s) if Self::is_template(s) => serde_json::Value::String(self.render(s, vars)?),
            serde_json::Value::Array(items) => serde_json::Value::Array(
                items.iter().map(|v| self.render_value(v, vars)).collect::<Result<_, _>>()?,
            ),
            serde_json::Value::Object(map) => {
                let mut out = Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), self.render_value(v, vars)?);
                }
                serde_json::Value::Object(out)
            }
            other => other.clone(),
        })
    }
}

// ============================================================================
// Filters
// ============================================================================

fn invalid(message: impl Into<String>) -> JinjaError {
    JinjaError::new(ErrorKind::InvalidOperation, message.into())
}

fn missing(value: &Value) -> bool {
    value.is_undefined() || value.is_none()
}

fn to_json(value: &Value) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

fn number(value: &Value) -> Result<f64, JinjaError> {
    match to_json(value) {
        serde_json::Value::Number(n) => n.as_f64().ok_or_else(|| invalid("number out of range")),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| invalid(format!("{s:?} is not a number"))),
        other => Err(invalid(format!("{other} is not a number"))),
    }
}

fn attribute(item: Value, attribute: Option<&str>) -> Result<Value, JinjaError> {
    match attribute {
        Some(name) => item.get_attr(name),
        None => Ok(item),
    }
}

fn date(clock: &SharedClock, value: Value, format: Option<String>) -> Result<String, JinjaError> {
    let format = format.unwrap_or_else(|| "%Y-%m-%d".to_string());
    if StrftimeItems::new(&format).any(|item| matches!(item, Item::Error)) {
        return Err(invalid(format!("invalid date format {format:?}")));
    }
    let instant: DateTime<Utc> = if missing(&value) {
        clock.now()
    } else if value.kind() == ValueKind::Number {
        let secs = number(&value)? as i64;
        Utc.timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| invalid(format!("timestamp {secs} out of range")))?
    } else {
        let text = value.to_string();
        if text == "now" {
            clock.now()
        } else if let Ok(dt) = DateTime::parse_from_rfc3339(text.trim()) {
            dt.with_timezone(&Utc)
        } else if let Ok(day) = NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d") {
            day.and_hms_opt(0, 0, 0)
                .map(|naive| naive.and_utc())
                .ok_or_else(|| invalid(format!("invalid date {text:?}")))?
        } else {
            return Err(invalid(format!("cannot parse {text:?} as a date")));
        }
    };
    Ok(instant.format(&format).to_string())
}

fn split(value: String, separator: Option<String>) -> Vec<String> {
    match separator {
        Some(sep) if !sep.is_empty() => value.split(sep.as_str()).map(str::to_string).collect(),
        _ => value.split_whitespace().map(str::to_string).collect(),
    }
}

fn join(value: Value, separator: Option<String>) -> Result<String, JinjaError> {
    if missing(&value) {
        return Ok(String::new());
    }
    let parts: Vec<String> = value.try_iter()?.map(|item| item.to_string()).collect();
    Ok(parts.join(separator.as_deref().unwrap_or("")))
}

fn length(value: Value) -> Result<usize, JinjaError> {
    if missing(&value) {
        return Ok(0);
    }
    value
        .len()
        .ok_or_else(|| invalid(format!("cannot take the length of {}", value.kind())))
}

fn sum(value: Value, attr: Option<String>) -> Result<Value, JinjaError> {
    if missing(&value) {
        return Ok(Value::from(0));
    }
    let mut integer_total: i64 = 0;
    let mut float_total = 0.0;
    let mut integral = true;
    for item in value.try_iter()? {
        let item = attribute(item, attr.as_deref())?;
        match to_json(&item) {
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => {
                    integer_total = integer_total.saturating_add(i);
                    float_total += i as f64;
                }
                None => {
                    integral = false;
                    float_total += n.as_f64().unwrap_or(0.0);
                }
            },
            other => return Err(invalid(format!("sum expects numbers, got {other}"))),
        }
    }
    Ok(if integral { Value::from(integer_total) } else { Value::from(float_total) })
}

fn compare(a: &serde_json::Value, b: &serde_json::Value) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => match (a.as_str(), b.as_str()) {
            (Some(x), Some(y)) => x.cmp(y),
            _ => a.to_string().cmp(&b.to_string()),
        },
    }
}

/// `max` / `min`: the item whose (attribute) value compares `wanted`
/// against every other; the first such item wins ties.
fn extreme(value: Value, attr: Option<String>, wanted: Ordering) -> Result<Value, JinjaError> {
    if missing(&value) {
        return Ok(Value::UNDEFINED);
    }
    let mut best: Option<(Value, serde_json::Value)> = None;
    for item in value.try_iter()? {
        let key = to_json(&attribute(item.clone(), attr.as_deref())?);
        let replace = match &best {
            None => true,
            Some((_, best_key)) => compare(&key, best_key) == wanted,
        };
        if replace {
            best = Some((item, key));
        }
    }
    Ok(best.map(|(item, _)| item).unwrap_or(Value::UNDEFINED))
}

fn round(value: Value, precision: Option<i32>) -> Result<Value, JinjaError> {
    let factor = 10f64.powi(precision.unwrap_or(0));
    Ok(Value::from((number(&value)? * factor).round() / factor))
}

fn int(value: Value) -> Value {
    let n = match to_json(&value) {
        serde_json::Value::Number(n) => n.as_i64().unwrap_or_else(|| n.as_f64().unwrap_or(0.0).trunc() as i64),
        serde_json::Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f.trunc() as i64))
                .unwrap_or(0)
        }
        serde_json::Value::Bool(b) => i64::from(b),
        _ => 0,
    };
    Value::from(n)
}

fn float(value: Value) -> Value {
    let f = match to_json(&value) {
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        serde_json::Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        serde_json::Value::Bool(b) => f64::from(u8::from(b)),
        _ => 0.0,
    };
    Value::from(f)
}

fn tojson(value: Value) -> Result<String, JinjaError> {
    serde_json::to_string(&value).map_err(|e| invalid(format!("cannot serialize to JSON: {e}")))
}

fn default(value: Value, fallback: Option<Value>) -> Value {
    if missing(&value) {
        fallback.unwrap_or_else(|| Value::from(""))
    } else {
        value
    }
}

fn capitalize(value: String) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn truncate(value: String, length: Option<usize>) -> String {
    let limit = length.unwrap_or(255);
    if value.chars().count() <= limit {
        value
    } else {
        let mut out: String = value.chars().take(limit).collect();
        out.push_str("...");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgflow_core::FixedClock;
    use serde_json::json;
    use std::sync::Arc;

    fn renderer(strict: bool) -> TemplateRenderer {
        let clock: SharedClock = Arc::new(FixedClock::parse("2024-01-01T00:00:00Z").unwrap());
        TemplateRenderer::new(clock, strict)
    }

    fn vars(value: serde_json::Value) -> Map<String, serde_json::Value> {
        match value {
            serde_json::Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn length_of_results() {
        let out = renderer(false)
            .render("Found {{ items | length }} commits", &vars(json!({"items": [{"c": 1}, {"c": 2}]})))
            .unwrap();
        assert_eq!(out, "Found 2 commits");
    }

    #[test]
    fn numeric_filters() {
        let r = renderer(false);
        let v = vars(json!({"xs": [{"n": 3}, {"n": 9}, {"n": 4}], "f": 2.456}));
        assert_eq!(r.render("{{ xs | sum('n') }}", &v).unwrap(), "16");
        assert_eq!(r.render("{{ (xs | max('n')).n }}", &v).unwrap(), "9");
        assert_eq!(r.render("{{ (xs | min('n')).n }}", &v).unwrap(), "3");
        assert_eq!(r.render("{{ f | round(1) }}", &v).unwrap(), "2.5");
        assert_eq!(r.render("{{ '42.9' | int }}", &v).unwrap(), "42");
        assert_eq!(r.render("{{ '1.5' | float }}", &v).unwrap(), "1.5");
    }

    #[test]
    fn string_filters() {
        let r = renderer(false);
        let v = vars(json!({"csv": "a,b,c", "name": "hELLO"}));
        assert_eq!(r.render("{{ csv | split(',') | join('-') }}", &v).unwrap(), "a-b-c");
        assert_eq!(r.render("{{ name | capitalize }}", &v).unwrap(), "Hello");
        assert_eq!(r.render("{{ name | truncate(2) }}", &v).unwrap(), "hE...");
        assert_eq!(r.render("{{ missing | default('none') }}", &v).unwrap(), "none");
        assert_eq!(r.render("{{ csv | split(',') | tojson }}", &v).unwrap(), r#"["a","b","c"]"#);
    }

    #[test]
    fn date_uses_the_clock() {
        let r = renderer(false);
        assert_eq!(r.render("{{ none | date('%Y/%m/%d') }}", &Map::new()).unwrap(), "2024/01/01");
        assert_eq!(r.render("{{ '2023-05-06' | date }}", &Map::new()).unwrap(), "2023-05-06");
    }

    #[test]
    fn control_flow() {
        let v = vars(json!({"xs": ["a", "b"], "flag": true}));
        let out = renderer(false)
            .render("{% for x in xs %}[{{ x }}]{% endfor %}{% if flag %}!{% endif %}", &v)
            .unwrap();
        assert_eq!(out, "[a][b]!");
    }

    #[test]
    fn unknown_filter_and_strict_mode() {
        assert!(renderer(false).render("{{ x | upper }}", &vars(json!({"x": "a"}))).is_err());
        assert_eq!(renderer(false).render("[{{ nope }}]", &Map::new()).unwrap(), "[]");
        assert!(renderer(true).render("[{{ nope }}]", &Map::new()).is_err());
    }
}

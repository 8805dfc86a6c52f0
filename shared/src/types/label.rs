//! Label values and annotation schema descriptions

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Kind of annotation a schema collects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationType {
    Radio,
    Select,
    Likert,
    Multiselect,
    #[serde(alias = "textbox", alias = "textarea")]
    Text,
    Span,
    #[serde(alias = "numeric", alias = "slider")]
    Number,
    #[serde(other)]
    Unknown,
}

impl AnnotationType {
    pub fn as_str(self) -> &'static str {
        match self {
            AnnotationType::Radio => "radio",
            AnnotationType::Select => "select",
            AnnotationType::Likert => "likert",
            AnnotationType::Multiselect => "multiselect",
            AnnotationType::Text => "text",
            AnnotationType::Span => "span",
            AnnotationType::Number => "number",
            AnnotationType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AnnotationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for AnnotationType {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "radio" => AnnotationType::Radio,
            "select" => AnnotationType::Select,
            "likert" => AnnotationType::Likert,
            "multiselect" => AnnotationType::Multiselect,
            "text" | "textbox" | "textarea" => AnnotationType::Text,
            "span" => AnnotationType::Span,
            "number" | "numeric" | "slider" => AnnotationType::Number,
            _ => AnnotationType::Unknown,
        }
    }
}

/// A highlighted character range `[start, end)` in the instance text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanLabel {
    pub start: usize,
    pub end: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl SpanLabel {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end, label: None }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A label produced by a human or by the model.
///
/// Deserialization is shape-driven: `null`, numbers, strings, string lists
/// and span-object lists map onto the matching variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LabelValue {
    Empty,
    Number(f64),
    Text(String),
    Options(Vec<String>),
    Spans(Vec<SpanLabel>),
}

impl LabelValue {
    pub fn text(value: impl Into<String>) -> Self {
        LabelValue::Text(value.into())
    }

    pub fn number(value: f64) -> Self {
        LabelValue::Number(value)
    }

    pub fn options(values: &[&str]) -> Self {
        LabelValue::Options(values.iter().map(|v| v.to_string()).collect())
    }

    pub fn spans(ranges: &[(usize, usize)]) -> Self {
        LabelValue::Spans(ranges.iter().map(|&(start, end)| SpanLabel::new(start, end)).collect())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            LabelValue::Empty => true,
            LabelValue::Number(_) => false,
            LabelValue::Text(s) => s.trim().is_empty(),
            LabelValue::Options(v) => v.is_empty(),
            LabelValue::Spans(v) => v.is_empty(),
        }
    }

    /// Stable string form used for exact matching, counters and confusion keys
    pub fn canonical(&self) -> String {
        match self {
            LabelValue::Empty => String::new(),
            LabelValue::Number(n) => format_number(*n),
            LabelValue::Text(s) => s.clone(),
            LabelValue::Options(v) => v.join(","),
            LabelValue::Spans(v) => v
                .iter()
                .map(|span| match &span.label {
                    Some(label) => format!("{}-{}:{}", span.start, span.end, label),
                    None => format!("{}-{}", span.start, span.end),
                })
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// Integer reading of the value; fractional numbers are not integers
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            LabelValue::Number(n) if n.is_finite() && n.fract() == 0.0 => Some(*n as i64),
            LabelValue::Text(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            LabelValue::Number(n) if n.is_finite() => Some(*n),
            LabelValue::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            _ => None,
        }
    }

    /// Selected options as a set; comma-separated text is split
    pub fn as_option_set(&self) -> Option<BTreeSet<String>> {
        match self {
            LabelValue::Empty => Some(BTreeSet::new()),
            LabelValue::Number(n) => Some(BTreeSet::from([format_number(*n)])),
            LabelValue::Text(s) => Some(
                s.split(',')
                    .map(|part| part.trim())
                    .filter(|part| !part.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            LabelValue::Options(v) => Some(
                v.iter()
                    .map(|part| part.trim())
                    .filter(|part| !part.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            LabelValue::Spans(_) => None,
        }
    }

    /// Span reading of the value; `None` when the value is not span-shaped
    pub fn as_spans(&self) -> Option<Vec<SpanLabel>> {
        match self {
            LabelValue::Spans(v) => Some(v.clone()),
            LabelValue::Empty => Some(Vec::new()),
            LabelValue::Options(v) if v.is_empty() => Some(Vec::new()),
            LabelValue::Text(s) if s.trim().is_empty() => Some(Vec::new()),
            _ => None,
        }
    }
}

impl fmt::Display for LabelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl From<&str> for LabelValue {
    fn from(s: &str) -> Self {
        LabelValue::Text(s.to_string())
    }
}

impl From<String> for LabelValue {
    fn from(s: String) -> Self {
        LabelValue::Text(s)
    }
}

impl From<f64> for LabelValue {
    fn from(n: f64) -> Self {
        LabelValue::Number(n)
    }
}

impl From<Vec<String>> for LabelValue {
    fn from(v: Vec<String>) -> Self {
        LabelValue::Options(v)
    }
}

fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Description of one annotation schema and its comparison constraints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub name: String,
    pub annotation_type: AnnotationType,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub min_value: Option<f64>,
    #[serde(default)]
    pub max_value: Option<f64>,
    /// Overrides the evaluator's likert/numeric tolerance
    #[serde(default)]
    pub tolerance: Option<f64>,
    /// Overrides the evaluator's multiselect/span threshold
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
}

impl SchemaInfo {
    pub fn new(name: impl Into<String>, annotation_type: AnnotationType) -> Self {
        Self {
            name: name.into(),
            annotation_type,
            labels: Vec::new(),
            min_value: None,
            max_value: None,
            tolerance: None,
            threshold: None,
            description: None,
        }
    }

    pub fn with_labels(mut self, labels: &[&str]) -> Self {
        self.labels = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min_value = Some(min);
        self.max_value = Some(max);
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Declared value range, if both bounds exist and are ordered
    pub fn value_range(&self) -> Option<f64> {
        match (self.min_value, self.max_value) {
            (Some(min), Some(max)) if max > min => Some(max - min),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_value_shapes_deserialize() {
        let values: Vec<LabelValue> =
            serde_json::from_str(r#"[null, 3, "pos", ["a", "b"], [{"start": 0, "end": 4}]]"#).unwrap();
        assert_eq!(values[0], LabelValue::Empty);
        assert_eq!(values[1], LabelValue::Number(3.0));
        assert_eq!(values[2], LabelValue::text("pos"));
        assert_eq!(values[3], LabelValue::options(&["a", "b"]));
        assert_eq!(values[4], LabelValue::spans(&[(0, 4)]));
    }

    #[test]
    fn test_canonical_forms() {
        assert_eq!(LabelValue::Number(3.0).canonical(), "3");
        assert_eq!(LabelValue::Number(2.5).canonical(), "2.5");
        assert_eq!(LabelValue::options(&["x", "y"]).canonical(), "x,y");
        assert_eq!(LabelValue::Empty.canonical(), "");
    }

    #[test]
    fn test_integer_and_number_readings() {
        assert_eq!(LabelValue::text(" 4 ").as_integer(), Some(4));
        assert_eq!(LabelValue::Number(4.5).as_integer(), None);
        assert_eq!(LabelValue::text("abc").as_number(), None);
        assert_eq!(LabelValue::text("2.25").as_number(), Some(2.25));
    }

    #[test]
    fn test_option_set_splits_text() {
        let set = LabelValue::text("a, b,,c").as_option_set().unwrap();
        assert_eq!(set.len(), 3);
        assert!(LabelValue::spans(&[(0, 1)]).as_option_set().is_none());
    }

    #[test]
    fn test_annotation_type_parsing() {
        assert_eq!(AnnotationType::from("Textbox"), AnnotationType::Text);
        assert_eq!(AnnotationType::from("slider"), AnnotationType::Number);
        assert_eq!(AnnotationType::from("bounding_box"), AnnotationType::Unknown);
        let parsed: AnnotationType = serde_json::from_str("\"video\"").unwrap();
        assert_eq!(parsed, AnnotationType::Unknown);
    }

    #[test]
    fn test_value_range_requires_ordered_bounds() {
        let schema = SchemaInfo::new("score", AnnotationType::Number).with_range(0.0, 100.0);
        assert_eq!(schema.value_range(), Some(100.0));
        let inverted = SchemaInfo::new("score", AnnotationType::Number).with_range(5.0, 5.0);
        assert_eq!(inverted.value_range(), None);
    }
}

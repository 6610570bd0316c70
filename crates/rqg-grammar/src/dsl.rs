//! Constructor functions for building element trees.
//!
//! These mirror how grammars are written by hand:
//!
//! ```
//! use rqg_grammar::dsl::*;
//!
//! let _query = t(
//!     "INSERT INTO {tab} (id) VALUES ({vals});",
//!     vec![("vals", repeat(number(1, 100), 1, 5, ", "))],
//! );
//! ```

use crate::context::Context;
use crate::element::{
    ColumnFilter, Element, ExpandError, LambdaFn, TableFilter, TemplatePart,
};

/// A fixed string.
pub fn lit(text: impl Into<String>) -> Element {
    Element::Literal(text.into())
}

/// Uniform choice over options.
pub fn choice(options: Vec<Element>) -> Element {
    Element::Choice {
        options,
        weights: None,
    }
}

/// Weighted choice; weights are positive integers.
pub fn weighted(options: Vec<(u32, Element)>) -> Element {
    let (weights, options) = options.into_iter().unzip();
    Element::Choice {
        options,
        weights: Some(weights),
    }
}

/// Template whose `{placeholder}` fragments resolve against the grammar's
/// rule table at expansion time.
pub fn template(tmpl: &str) -> Element {
    Element::Template {
        parts: parse_template(tmpl, &[]),
    }
}

/// Template with inline bindings; unbound placeholders resolve to rules.
pub fn t(tmpl: &str, binds: Vec<(&str, Element)>) -> Element {
    Element::Template {
        parts: parse_template(tmpl, &binds),
    }
}

/// Expand `child` between `min` and `max` times, joined by `sep`.
pub fn repeat(child: Element, min: u32, max: u32, sep: &str) -> Element {
    Element::Repeat {
        child: Box::new(child),
        min,
        max,
        sep: sep.to_string(),
    }
}

/// Expand `child` with probability `p`, else emit nothing.
pub fn maybe(child: Element, p: f64) -> Element {
    Element::Maybe {
        child: Box::new(child),
        p,
    }
}

/// Reference to a named rule.
pub fn rule_ref(name: impl Into<String>) -> Element {
    Element::RuleRef(name.into())
}

/// Decimal integer uniform in `[lo, hi]`.
pub fn number(lo: i64, hi: i64) -> Element {
    Element::Number { lo, hi }
}

/// Single decimal digit.
pub fn digit() -> Element {
    Element::Digit
}

/// Column name drawn from the schema snapshot.
pub fn field(filter: ColumnFilter) -> Element {
    Element::Field(filter)
}

/// Table name drawn from the schema snapshot.
pub fn table(filter: TableFilter) -> Element {
    Element::Table(filter)
}

/// User-supplied generator function.
pub fn lambda<F>(f: F) -> Element
where
    F: Fn(&mut Context) -> Result<String, ExpandError> + Send + Sync + 'static,
{
    Element::Lambda(LambdaFn::new(f))
}

/// Split a template string into text fragments and `{name}` placeholders.
/// Braces do not nest and there is no escape; a `{` without a closing `}`
/// is kept as literal text.
fn parse_template(tmpl: &str, binds: &[(&str, Element)]) -> Vec<TemplatePart> {
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut rest = tmpl;
    while let Some(open) = rest.find('{') {
        match rest[open..].find('}') {
            Some(close_offset) => {
                text.push_str(&rest[..open]);
                if !text.is_empty() {
                    parts.push(TemplatePart::Text(std::mem::take(&mut text)));
                }
                let name = &rest[open + 1..open + close_offset];
                let inline = binds
                    .iter()
                    .find(|(bind, _)| *bind == name)
                    .map(|(_, element)| Box::new(element.clone()));
                parts.push(TemplatePart::Placeholder {
                    name: name.to_string(),
                    inline,
                });
                rest = &rest[open + close_offset + 1..];
            }
            None => {
                text.push_str(rest);
                rest = "";
            }
        }
    }
    text.push_str(rest);
    if !text.is_empty() {
        parts.push(TemplatePart::Text(text));
    }
    parts
}

//! The element algebra: the closed set of generator node kinds.

use std::fmt;
use std::sync::Arc;

use rqg_schema::{Column, Table, TypeTag};

use crate::context::Context;
use crate::grammar::Grammar;

/// Expansion cost of a subtree that cannot complete without unbounded
/// recursion.
pub(crate) const UNBOUNDED: u32 = u32::MAX;

/// Error surfaced while expanding a single query.
///
/// These are per-query: the worker records the error and moves on to the
/// next global index.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExpandError {
    /// A lambda element returned an error.
    #[error("lambda failed: {0}")]
    Lambda(String),
    /// A rule reference did not resolve. Frozen grammars validate all
    /// references, so this only fires for rules expanded by name.
    #[error("rule '{0}' is not defined")]
    UnknownRule(String),
}

/// Predicate applied by `Field` when picking a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnFilter {
    /// Any column of any table.
    Any,
    /// Columns with an integer or numeric type tag.
    Numeric,
    /// Columns with a character type tag.
    Text,
    /// Columns with exactly this type tag.
    Tag(TypeTag),
    /// Primary key columns.
    PrimaryKey,
}

impl ColumnFilter {
    fn matches(&self, column: &Column) -> bool {
        match self {
            ColumnFilter::Any => true,
            ColumnFilter::Numeric => column.type_tag.is_numeric(),
            ColumnFilter::Text => column.type_tag == TypeTag::Text,
            ColumnFilter::Tag(tag) => column.type_tag == *tag,
            ColumnFilter::PrimaryKey => column.primary_key,
        }
    }
}

/// Predicate applied by `Table` when picking a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableFilter {
    /// Any table in the schema.
    Any,
    /// Tables whose estimated row count lies within the given bounds.
    Rows { min: Option<u64>, max: Option<u64> },
}

impl TableFilter {
    fn matches(&self, table: &Table) -> bool {
        match self {
            TableFilter::Any => true,
            TableFilter::Rows { min, max } => {
                min.is_none_or(|m| table.row_count >= m)
                    && max.is_none_or(|m| table.row_count <= m)
            }
        }
    }
}

/// A user-supplied generator function.
///
/// Lambdas run on the owning worker thread and may read and mutate
/// `Context::state` to coordinate within a single top-level expansion; they
/// must not capture mutable global state.
#[derive(Clone)]
pub struct LambdaFn(Arc<dyn Fn(&mut Context) -> Result<String, ExpandError> + Send + Sync>);

impl LambdaFn {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut Context) -> Result<String, ExpandError> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, ctx: &mut Context) -> Result<String, ExpandError> {
        (self.0)(ctx)
    }
}

impl fmt::Debug for LambdaFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LambdaFn")
    }
}

/// One fragment of a template: literal text or a named placeholder.
///
/// Placeholders resolve to an inline element when one was bound at
/// construction, otherwise to the rule of the same name in the owning
/// grammar. An unresolvable placeholder is a freeze-time error.
#[derive(Debug, Clone)]
pub enum TemplatePart {
    Text(String),
    Placeholder {
        name: String,
        inline: Option<Box<Element>>,
    },
}

/// One node in the generator tree.
#[derive(Debug, Clone)]
pub enum Element {
    /// A fixed string.
    Literal(String),
    /// Pick one option, uniformly or by positive integer weights.
    Choice {
        options: Vec<Element>,
        weights: Option<Vec<u32>>,
    },
    /// Literal fragments interleaved with named placeholders.
    Template { parts: Vec<TemplatePart> },
    /// Expand `child` between `min` and `max` times, joined by `sep`.
    Repeat {
        child: Box<Element>,
        min: u32,
        max: u32,
        sep: String,
    },
    /// Expand `child` with probability `p`, else emit nothing.
    Maybe { child: Box<Element>, p: f64 },
    /// Reference to a named rule in the owning grammar.
    RuleRef(String),
    /// Opaque generator function.
    Lambda(LambdaFn),
    /// Decimal integer uniform in `[lo, hi]`.
    Number { lo: i64, hi: i64 },
    /// Single decimal digit.
    Digit,
    /// A column name picked from the schema snapshot.
    Field(ColumnFilter),
    /// A table name picked from the schema snapshot.
    Table(TableFilter),
}

impl Element {
    pub(crate) fn expand(&self, grammar: &Grammar, ctx: &mut Context) -> Result<String, ExpandError> {
        match self {
            Element::Literal(text) => Ok(text.clone()),
            Element::Choice { options, weights } => {
                let entered = ctx.enter();
                let result = expand_choice(options, weights.as_deref(), grammar, ctx);
                ctx.exit(entered);
                result
            }
            Element::Template { parts } => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(text) => out.push_str(text),
                        TemplatePart::Placeholder { name, inline } => match inline {
                            Some(element) => out.push_str(&element.expand(grammar, ctx)?),
                            None => out.push_str(&grammar.expand_rule(name, ctx)?),
                        },
                    }
                }
                Ok(out)
            }
            Element::Repeat { child, min, max, sep } => {
                let entered = ctx.enter();
                let result = expand_repeat(child, *min, *max, sep, grammar, ctx);
                ctx.exit(entered);
                result
            }
            Element::Maybe { child, p } => {
                if ctx.at_cap() && child.min_cost(grammar.rule_costs()) == UNBOUNDED {
                    return Ok(String::new());
                }
                if ctx.next_f64() < *p {
                    child.expand(grammar, ctx)
                } else {
                    Ok(String::new())
                }
            }
            Element::RuleRef(name) => grammar.expand_rule(name, ctx),
            Element::Lambda(lambda) => lambda.call(ctx),
            Element::Number { lo, hi } => Ok(ctx.int_in(*lo, *hi).to_string()),
            Element::Digit => Ok(ctx.int_in(0, 9).to_string()),
            Element::Field(filter) => Ok(pick_field(filter, ctx)),
            Element::Table(filter) => Ok(pick_table(filter, ctx)),
        }
    }

    /// Minimal number of rule descents needed to complete this subtree, or
    /// [`UNBOUNDED`] when no finite expansion exists. Used by the freeze-time
    /// termination analysis and by depth-cap pruning.
    pub(crate) fn min_cost(&self, rule_costs: &std::collections::BTreeMap<String, u32>) -> u32 {
        match self {
            Element::Literal(_)
            | Element::Lambda(_)
            | Element::Number { .. }
            | Element::Digit
            | Element::Field(_)
            | Element::Table(_) => 0,
            Element::RuleRef(name) => rule_costs
                .get(name)
                .copied()
                .unwrap_or(UNBOUNDED)
                .saturating_add(1),
            Element::Choice { options, .. } => options
                .iter()
                .map(|option| option.min_cost(rule_costs))
                .min()
                .unwrap_or(UNBOUNDED),
            Element::Template { parts } => {
                let mut cost = 0u32;
                for part in parts {
                    let part_cost = match part {
                        TemplatePart::Text(_) => 0,
                        TemplatePart::Placeholder { inline: Some(element), .. } => {
                            element.min_cost(rule_costs)
                        }
                        TemplatePart::Placeholder { name, inline: None } => rule_costs
                            .get(name)
                            .copied()
                            .unwrap_or(UNBOUNDED)
                            .saturating_add(1),
                    };
                    cost = cost.max(part_cost);
                }
                cost
            }
            // A repeat that may draw zero iterations always completes.
            Element::Repeat { child, min, .. } => {
                if *min == 0 {
                    0
                } else {
                    child.min_cost(rule_costs)
                }
            }
            Element::Maybe { .. } => 0,
        }
    }

    /// Visit this element and every nested child.
    pub(crate) fn visit(&self, f: &mut impl FnMut(&Element)) {
        f(self);
        match self {
            Element::Choice { options, .. } => {
                for option in options {
                    option.visit(f);
                }
            }
            Element::Template { parts } => {
                for part in parts {
                    if let TemplatePart::Placeholder { inline: Some(element), .. } = part {
                        element.visit(f);
                    }
                }
            }
            Element::Repeat { child, .. } | Element::Maybe { child, .. } => child.visit(f),
            _ => {}
        }
    }
}

fn expand_choice(
    options: &[Element],
    weights: Option<&[u32]>,
    grammar: &Grammar,
    ctx: &mut Context,
) -> Result<String, ExpandError> {
    if ctx.at_cap() {
        // Restrict to the options with the cheapest finite expansion; the
        // cost strictly decreases through every rule descent, so the
        // remaining expansion is bounded.
        let costs: Vec<u32> = options
            .iter()
            .map(|option| option.min_cost(grammar.rule_costs()))
            .collect();
        let best = costs.iter().copied().min().unwrap_or(UNBOUNDED);
        if best == UNBOUNDED {
            ctx.warnings.depth_truncations += 1;
            return Ok(String::new());
        }
        let viable: Vec<usize> = (0..options.len()).filter(|i| costs[*i] == best).collect();
        let pick = viable[ctx.pick_index(viable.len())];
        return options[pick].expand(grammar, ctx);
    }

    let index = match weights {
        None => ctx.pick_index(options.len()),
        Some(weights) => {
            let total: u64 = weights.iter().map(|w| u64::from(*w)).sum();
            let draw = ctx.next_u64() % total;
            let mut cumulative = 0u64;
            let mut picked = options.len() - 1;
            for (i, weight) in weights.iter().enumerate() {
                cumulative += u64::from(*weight);
                if draw < cumulative {
                    picked = i;
                    break;
                }
            }
            picked
        }
    };
    options[index].expand(grammar, ctx)
}

fn expand_repeat(
    child: &Element,
    min: u32,
    max: u32,
    sep: &str,
    grammar: &Grammar,
    ctx: &mut Context,
) -> Result<String, ExpandError> {
    let cap = ctx.config.repeat_cap;
    let min = min.min(cap);
    let max = max.min(cap);
    if ctx.at_cap() && child.min_cost(grammar.rule_costs()) == UNBOUNDED {
        ctx.warnings.depth_truncations += 1;
        return Ok(String::new());
    }
    let n = if ctx.at_cap() {
        min
    } else {
        ctx.int_in(i64::from(min), i64::from(max)) as u32
    };
    let mut parts = Vec::with_capacity(n as usize);
    for _ in 0..n {
        parts.push(child.expand(grammar, ctx)?);
    }
    Ok(parts.join(sep))
}

/// Pick a column name matching the filter, searching tables in sorted order.
/// Falls back to `"id"` when the schema has no match; the fallback is
/// counted as a warning.
fn pick_field(filter: &ColumnFilter, ctx: &mut Context) -> String {
    let schema = Arc::clone(&ctx.schema);
    let mut matching: Vec<&str> = Vec::new();
    for table in schema.tables() {
        for column in &table.columns {
            if filter.matches(column) {
                matching.push(column.name.as_str());
            }
        }
    }
    if matching.is_empty() {
        ctx.warnings.schema_fallbacks += 1;
        return "id".to_string();
    }
    let pick = ctx.pick_index(matching.len());
    matching[pick].to_string()
}

/// Pick a table name matching the filter from the sorted table list. Falls
/// back to the first table, or `"t1"` on an empty schema; the fallback is
/// counted as a warning.
fn pick_table(filter: &TableFilter, ctx: &mut Context) -> String {
    let schema = Arc::clone(&ctx.schema);
    let matching: Vec<&str> = schema
        .tables()
        .filter(|table| filter.matches(table))
        .map(|table| table.name.as_str())
        .collect();
    if matching.is_empty() {
        ctx.warnings.schema_fallbacks += 1;
        return schema
            .tables()
            .next()
            .map(|table| table.name.clone())
            .unwrap_or_else(|| "t1".to_string());
    }
    let pick = ctx.pick_index(matching.len());
    matching[pick].to_string()
}

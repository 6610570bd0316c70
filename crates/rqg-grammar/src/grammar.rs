//! Rule tables: building, freezing, and expanding grammars.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::context::Context;
use crate::element::{Element, ExpandError, TemplatePart, UNBOUNDED};

/// Default entry rule name.
pub const DEFAULT_ENTRY: &str = "query";

/// Fatal grammar construction errors, detected when the grammar is frozen.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GrammarError {
    #[error("rule '{referenced}' referenced from '{from}' is not defined")]
    UnknownRule { referenced: String, from: String },
    #[error("template placeholder '{{{placeholder}}}' in rule '{rule}' resolves to no rule or inline element")]
    UnknownPlaceholder { placeholder: String, rule: String },
    #[error("choice in rule '{rule}' has no options")]
    EmptyChoice { rule: String },
    #[error("choice in rule '{rule}' has {options} options but {weights} weights")]
    WeightMismatch {
        rule: String,
        options: usize,
        weights: usize,
    },
    #[error("choice in rule '{rule}' has a zero weight")]
    ZeroWeight { rule: String },
    #[error("repeat in rule '{rule}' has min {min} > max {max}")]
    InvalidRepeat { rule: String, min: u32, max: u32 },
    #[error("maybe in rule '{rule}' has probability {p} outside [0, 1]")]
    InvalidProbability { rule: String, p: f64 },
    #[error("entry rule '{entry}' is not defined")]
    MissingEntry { entry: String },
}

/// Mutable rule table; call [`GrammarBuilder::freeze`] to obtain an
/// immutable, shareable [`Grammar`].
#[derive(Debug)]
pub struct GrammarBuilder {
    name: String,
    entry: String,
    rules: BTreeMap<String, Element>,
}

impl GrammarBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry: DEFAULT_ENTRY.to_string(),
            rules: BTreeMap::new(),
        }
    }

    /// Register a rule, replacing any previous definition of the same name.
    pub fn rule(mut self, name: impl Into<String>, element: Element) -> Self {
        self.rules.insert(name.into(), element);
        self
    }

    /// Override the entry rule (default `"query"`).
    pub fn entry(mut self, name: impl Into<String>) -> Self {
        self.entry = name.into();
        self
    }

    /// Validate the rule table and snapshot it for expansion.
    ///
    /// Freezing checks every rule reference, template placeholder, choice
    /// and repeat for the invariants of the element algebra, then runs the
    /// termination fixpoint used by depth-cap pruning.
    pub fn freeze(self) -> Result<Grammar, GrammarError> {
        if !self.rules.contains_key(&self.entry) {
            return Err(GrammarError::MissingEntry { entry: self.entry });
        }
        for (rule_name, element) in &self.rules {
            self.validate_element(rule_name, element)?;
        }
        let costs = compute_rule_costs(&self.rules);
        for (rule_name, cost) in &costs {
            if *cost == UNBOUNDED {
                tracing::warn!(
                    grammar = %self.name,
                    rule = %rule_name,
                    "rule has no terminating expansion; depth capping will emit empty strings"
                );
            }
        }
        Ok(Grammar {
            name: self.name,
            entry: self.entry,
            rules: Arc::new(self.rules),
            costs: Arc::new(costs),
        })
    }

    fn validate_element(&self, rule_name: &str, element: &Element) -> Result<(), GrammarError> {
        let mut error = None;
        element.visit(&mut |node| {
            if error.is_some() {
                return;
            }
            error = self.check_node(rule_name, node).err();
        });
        match error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn check_node(&self, rule_name: &str, node: &Element) -> Result<(), GrammarError> {
        match node {
            Element::RuleRef(name) => {
                if !self.rules.contains_key(name) {
                    return Err(GrammarError::UnknownRule {
                        referenced: name.clone(),
                        from: rule_name.to_string(),
                    });
                }
            }
            Element::Choice { options, weights } => {
                if options.is_empty() {
                    return Err(GrammarError::EmptyChoice {
                        rule: rule_name.to_string(),
                    });
                }
                if let Some(weights) = weights {
                    if weights.len() != options.len() {
                        return Err(GrammarError::WeightMismatch {
                            rule: rule_name.to_string(),
                            options: options.len(),
                            weights: weights.len(),
                        });
                    }
                    if weights.iter().any(|w| *w == 0) {
                        return Err(GrammarError::ZeroWeight {
                            rule: rule_name.to_string(),
                        });
                    }
                }
            }
            Element::Template { parts } => {
                for part in parts {
                    if let TemplatePart::Placeholder { name, inline: None } = part {
                        if !self.rules.contains_key(name) {
                            return Err(GrammarError::UnknownPlaceholder {
                                placeholder: name.clone(),
                                rule: rule_name.to_string(),
                            });
                        }
                    }
                }
            }
            Element::Repeat { min, max, .. } => {
                if min > max {
                    return Err(GrammarError::InvalidRepeat {
                        rule: rule_name.to_string(),
                        min: *min,
                        max: *max,
                    });
                }
            }
            Element::Maybe { p, .. } => {
                if !(0.0..=1.0).contains(p) {
                    return Err(GrammarError::InvalidProbability {
                        rule: rule_name.to_string(),
                        p: *p,
                    });
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Least number of rule descents each rule needs to complete, computed as a
/// monotone fixpoint. Rules stuck at [`UNBOUNDED`] cannot terminate without
/// the depth cap.
fn compute_rule_costs(rules: &BTreeMap<String, Element>) -> BTreeMap<String, u32> {
    let mut costs: BTreeMap<String, u32> =
        rules.keys().map(|name| (name.clone(), UNBOUNDED)).collect();
    loop {
        let mut changed = false;
        for (name, element) in rules {
            let cost = element.min_cost(&costs);
            if let Some(entry) = costs.get_mut(name) {
                if cost < *entry {
                    *entry = cost;
                    changed = true;
                }
            }
        }
        if !changed {
            return costs;
        }
    }
}

/// An immutable, frozen grammar. Cheap to clone and safe to share across
/// worker threads.
#[derive(Debug, Clone)]
pub struct Grammar {
    name: String,
    entry: String,
    rules: Arc<BTreeMap<String, Element>>,
    costs: Arc<BTreeMap<String, u32>>,
}

impl Grammar {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Rule names in sorted order.
    pub fn rule_names(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    /// The same grammar with a different entry rule.
    pub fn with_entry(&self, entry: impl Into<String>) -> Result<Grammar, GrammarError> {
        let entry = entry.into();
        if !self.rules.contains_key(&entry) {
            return Err(GrammarError::MissingEntry { entry });
        }
        Ok(Grammar {
            name: self.name.clone(),
            entry,
            rules: Arc::clone(&self.rules),
            costs: Arc::clone(&self.costs),
        })
    }

    pub(crate) fn rule_costs(&self) -> &BTreeMap<String, u32> {
        &self.costs
    }

    /// Expand the entry rule as a top-level expansion: scratch state and
    /// depth are reset first.
    pub fn generate(&self, ctx: &mut Context) -> Result<String, ExpandError> {
        self.generate_rule(&self.entry, ctx)
    }

    /// Expand a named rule as a top-level expansion.
    pub fn generate_rule(&self, name: &str, ctx: &mut Context) -> Result<String, ExpandError> {
        ctx.state.clear();
        ctx.depth = 0;
        self.expand_rule(name, ctx)
    }

    /// Expand a rule reference mid-expansion, honoring the depth cap.
    pub(crate) fn expand_rule(&self, name: &str, ctx: &mut Context) -> Result<String, ExpandError> {
        let element = self
            .rules
            .get(name)
            .ok_or_else(|| ExpandError::UnknownRule(name.to_string()))?;
        let entered = ctx.enter();
        let result = if !entered
            && self.costs.get(name).copied().unwrap_or(UNBOUNDED) == UNBOUNDED
        {
            // At the cap, a rule with no terminating expansion collapses.
            ctx.warnings.depth_truncations += 1;
            Ok(String::new())
        } else {
            element.expand(self, ctx)
        };
        ctx.exit(entered);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExpandConfig;
    use crate::dsl::*;
    use rqg_schema::SchemaView;

    fn ctx_with(seed: u64, config: ExpandConfig) -> Context {
        Context::new(seed, Arc::new(SchemaView::empty()), config)
    }

    fn ctx(seed: u64) -> Context {
        ctx_with(seed, ExpandConfig::default())
    }

    #[test]
    fn test_unknown_rule_reference_fails_freeze() {
        let err = GrammarBuilder::new("g")
            .rule("query", rule_ref("missing"))
            .freeze()
            .unwrap_err();
        assert!(matches!(err, GrammarError::UnknownRule { .. }));
    }

    #[test]
    fn test_unknown_placeholder_fails_freeze() {
        let err = GrammarBuilder::new("g")
            .rule("query", template("SELECT {nope}"))
            .freeze()
            .unwrap_err();
        assert!(matches!(err, GrammarError::UnknownPlaceholder { .. }));
    }

    #[test]
    fn test_weight_mismatch_fails_freeze() {
        let err = GrammarBuilder::new("g")
            .rule("query", weighted(vec![(1, lit("a")), (2, lit("b"))]))
            .rule(
                "bad",
                Element::Choice {
                    options: vec![lit("a")],
                    weights: Some(vec![1, 2]),
                },
            )
            .freeze()
            .unwrap_err();
        assert!(matches!(err, GrammarError::WeightMismatch { .. }));
    }

    #[test]
    fn test_missing_entry_fails_freeze() {
        let err = GrammarBuilder::new("g")
            .rule("other", lit("x"))
            .freeze()
            .unwrap_err();
        assert!(matches!(err, GrammarError::MissingEntry { .. }));
    }

    #[test]
    fn test_template_resolves_rules() {
        let grammar = GrammarBuilder::new("g")
            .rule("query", template("SELECT {col} FROM {tab};"))
            .rule("col", lit("id"))
            .rule("tab", lit("t"))
            .freeze()
            .unwrap();
        for seed in [0u64, 1, 42, 1_000_000] {
            let mut ctx = ctx(seed);
            assert_eq!(grammar.generate(&mut ctx).unwrap(), "SELECT id FROM t;");
        }
    }

    #[test]
    fn test_inline_binding_overrides_rule() {
        let grammar = GrammarBuilder::new("g")
            .rule("query", t("{col}", vec![("col", lit("inline"))]))
            .rule("col", lit("from_rule"))
            .freeze()
            .unwrap();
        let mut ctx = ctx(3);
        assert_eq!(grammar.generate(&mut ctx).unwrap(), "inline");
    }

    #[test]
    fn test_expansion_is_deterministic() {
        let grammar = GrammarBuilder::new("g")
            .rule(
                "query",
                t(
                    "SELECT {cols} FROM t WHERE x = {n}",
                    vec![
                        ("cols", repeat(rule_ref("col"), 1, 5, ", ")),
                        ("n", number(0, 1_000_000)),
                    ],
                ),
            )
            .rule("col", choice(vec![lit("a"), lit("b"), lit("c")]))
            .freeze()
            .unwrap();
        for seed in 0..50u64 {
            let mut a = ctx(seed);
            let mut b = ctx(seed);
            assert_eq!(
                grammar.generate(&mut a).unwrap(),
                grammar.generate(&mut b).unwrap()
            );
        }
    }

    #[test]
    fn test_weighted_choice_distribution() {
        // choice("A" x3 : "B" x1), 400 draws: expect roughly 300/100.
        let grammar = GrammarBuilder::new("g")
            .rule("query", weighted(vec![(3, lit("A")), (1, lit("B"))]))
            .freeze()
            .unwrap();
        let mut count_a = 0;
        for i in 0..400u64 {
            let mut ctx = Context::for_query(
                1,
                0,
                i,
                Arc::new(SchemaView::empty()),
                ExpandConfig::default(),
            );
            if grammar.generate(&mut ctx).unwrap() == "A" {
                count_a += 1;
            }
        }
        assert!(
            (260..=340).contains(&count_a),
            "weighted draw skewed: {count_a}/400 As"
        );
    }

    #[test]
    fn test_recursive_grammar_is_depth_bounded() {
        // expr -> expr + expr | number; heavily biased toward recursion.
        let grammar = GrammarBuilder::new("g")
            .rule(
                "query",
                weighted(vec![
                    (9, t("({a} + {b})", vec![("a", rule_ref("query")), ("b", rule_ref("query"))])),
                    (1, number(0, 9)),
                ]),
            )
            .freeze()
            .unwrap();
        let config = ExpandConfig {
            max_depth: 8,
            repeat_cap: 8,
        };
        for seed in 0..200u64 {
            let mut ctx = ctx_with(seed, config);
            let out = grammar.generate(&mut ctx).unwrap();
            assert!(!out.is_empty());
            assert_eq!(ctx.depth(), 0);
        }
    }

    #[test]
    fn test_unterminable_rule_collapses_at_cap() {
        // loop -> loop, with no escape: expansion must emit "" and count it.
        let grammar = GrammarBuilder::new("g")
            .rule("query", template("x{loop}"))
            .rule("loop", template("y{loop}"))
            .freeze()
            .unwrap();
        let config = ExpandConfig {
            max_depth: 4,
            repeat_cap: 8,
        };
        let mut ctx = ctx_with(7, config);
        let out = grammar.generate(&mut ctx).unwrap();
        assert!(out.starts_with('x'));
        assert!(ctx.warnings.depth_truncations > 0);
    }

    #[test]
    fn test_repeat_zero_emits_empty() {
        let grammar = GrammarBuilder::new("g")
            .rule("query", repeat(digit(), 0, 0, ","))
            .freeze()
            .unwrap();
        let mut ctx = ctx(11);
        assert_eq!(grammar.generate(&mut ctx).unwrap(), "");
    }

    #[test]
    fn test_repeat_fixed_count_with_separator() {
        let grammar = GrammarBuilder::new("g")
            .rule("query", repeat(digit(), 3, 3, ","))
            .freeze()
            .unwrap();
        let mut first_ctx = ctx(42);
        let out = grammar.generate(&mut first_ctx).unwrap();
        let parts: Vec<&str> = out.split(',').collect();
        assert_eq!(parts.len(), 3);
        for part in parts {
            assert!(part.len() == 1 && part.chars().all(|c| c.is_ascii_digit()));
        }
        // Same seed replays the same digits.
        let mut again_ctx = ctx(42);
        assert_eq!(grammar.generate(&mut again_ctx).unwrap(), out);
    }

    #[test]
    fn test_repeat_at_cap_draws_minimum() {
        // At the depth cap a repeat with a finite-cost child still expands,
        // but draws exactly `min` iterations instead of sampling [min, max].
        let grammar = GrammarBuilder::new("g")
            .rule("query", repeat(digit(), 2, 9, ","))
            .freeze()
            .unwrap();
        let capped = ExpandConfig {
            max_depth: 0,
            repeat_cap: 16,
        };
        for seed in 0..30u64 {
            let mut ctx = ctx_with(seed, capped);
            let out = grammar.generate(&mut ctx).unwrap();
            assert_eq!(out.split(',').count(), 2, "seed {seed}: {out}");
        }
        // Below the cap the same rule samples the full range.
        let mut saw_longer = false;
        for seed in 0..30u64 {
            let mut ctx = ctx(seed);
            if grammar.generate(&mut ctx).unwrap().split(',').count() > 2 {
                saw_longer = true;
            }
        }
        assert!(saw_longer);
    }

    #[test]
    fn test_maybe_extremes() {
        let grammar = GrammarBuilder::new("g")
            .rule("query", t("a{x}b", vec![("x", maybe(lit("X"), 0.0))]))
            .freeze()
            .unwrap();
        let always = GrammarBuilder::new("g")
            .rule("query", t("a{x}b", vec![("x", maybe(lit("X"), 1.0))]))
            .freeze()
            .unwrap();
        for seed in 0..50u64 {
            let mut ctx0 = ctx(seed);
            assert_eq!(grammar.generate(&mut ctx0).unwrap(), "ab");
            let mut ctx1 = ctx(seed);
            assert_eq!(always.generate(&mut ctx1).unwrap(), "aXb");
        }
    }

    #[test]
    fn test_repeat_honors_repeat_cap() {
        let grammar = GrammarBuilder::new("g")
            .rule("query", repeat(lit("x"), 10, 100, ""))
            .freeze()
            .unwrap();
        let config = ExpandConfig {
            max_depth: 32,
            repeat_cap: 5,
        };
        for seed in 0..20u64 {
            let mut ctx = ctx_with(seed, config);
            let out = grammar.generate(&mut ctx).unwrap();
            assert_eq!(out.len(), 5);
        }
    }

    #[test]
    fn test_state_resets_between_expansions() {
        let grammar = GrammarBuilder::new("g")
            .rule(
                "query",
                lambda(|ctx| {
                    let seen = ctx.state.contains_key("marker");
                    ctx.state
                        .insert("marker".to_string(), serde_json::Value::Bool(true));
                    Ok(if seen { "stale" } else { "fresh" }.to_string())
                }),
            )
            .freeze()
            .unwrap();
        let mut ctx = ctx(1);
        assert_eq!(grammar.generate(&mut ctx).unwrap(), "fresh");
        assert_eq!(grammar.generate(&mut ctx).unwrap(), "fresh");
    }

    #[test]
    fn test_lambda_error_surfaces() {
        let grammar = GrammarBuilder::new("g")
            .rule("query", lambda(|_| Err(ExpandError::Lambda("boom".into()))))
            .freeze()
            .unwrap();
        let mut ctx = ctx(1);
        assert!(matches!(
            grammar.generate(&mut ctx),
            Err(ExpandError::Lambda(_))
        ));
    }
}

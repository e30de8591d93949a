// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Author: Pushp Kharat

//! Randomized enumeration of constructed rules under the universal prior.
//!
//! Rules are sampled from the Bayesian prior over rule trees. The *drawing
//! number* is a real-valued budget of prior draws: at every node it is split
//! between the attribute choices and the nested-rule choices of the current
//! operand, a child with zero draws is pruned, and a complete rule is
//! emitted for every surviving path. If a pass yields fewer rules than
//! requested, the budget is doubled and the pass rerun from the same seed,
//! so the enumeration stays a deterministic function of its inputs.

use std::sync::Arc;

use rand::seq::SliceRandom;
use tracing::{debug, warn};

use tb_core::prior::universal_code_length;
use tb_core::{DataType, Domain, Name, RunContext, SampleGenerator};
use tb_rules::{
    extract_matching_attributes, extract_matching_rules, ConstructionRule, DomainCompliantRules,
};

use crate::selection::{
    SelectionAnalyser, SelectionOperand, SelectionValueSource, MAX_SELECTION_GRANULARITY,
};
use crate::tree::{sort_by_cost_and_random_index, ConstructedRule, Operand, PartRef};

/// Decide whether construction must stop for lack of memory; receives the
/// produced rule count, the mean per-rule memory estimate and the remaining
/// available memory.
pub type MemoryPolicy = fn(produced: usize, mean_rule_memory: u64, available: u64) -> bool;

/// The original engine's rule of thumb: stop when three times the current
/// footprint would not fit.
pub fn default_memory_policy(produced: usize, mean_rule_memory: u64, available: u64) -> bool {
    3 * (produced as u64) * mean_rule_memory >= available
}

/// Generation parameters.
#[derive(Clone, Copy)]
pub struct GeneratorParams {
    /// Number of rules requested by the caller.
    pub rule_number: usize,
    /// Hard cap on the rules held at any point of the enumeration.
    pub max_rule_number: usize,
    /// Maximum rule-tree expansion depth.
    pub max_rule_depth: usize,
    /// Maximum prior cost of a produced rule.
    pub max_rule_cost: f64,
    /// Forbid selection rules entirely.
    pub selection_rules_forbidden: bool,
    /// Cost of choosing to construct a feature instead of keeping a native
    /// attribute (folded into every produced rule).
    pub root_rule_choice_cost: f64,
    /// Memory-exhaustion policy.
    pub memory_policy: MemoryPolicy,
}

impl Default for GeneratorParams {
    fn default() -> Self {
        Self {
            rule_number: 100,
            max_rule_number: 1_000_000,
            max_rule_depth: 100,
            max_rule_cost: 1000.0,
            selection_rules_forbidden: false,
            root_rule_choice_cost: 0.0,
            memory_policy: default_memory_policy,
        }
    }
}

/// A (granularity, partile) draw for one selection operand.
struct SelectionValue {
    granularity: u32,
    part_index: usize,
    cost: f64,
}

/// Randomised constructed-rule generator.
pub struct RuleGenerator<'a> {
    domain: &'a Domain,
    compliant: &'a DomainCompliantRules,
    params: GeneratorParams,
    analyser: SelectionAnalyser,
    sampler: SampleGenerator,
    /// Cap in force during the current generation (inflated while drawing).
    cap: usize,
}

impl<'a> RuleGenerator<'a> {
    /// Create a generator over precomputed compliant-rule sets.
    pub fn new(
        domain: &'a Domain,
        compliant: &'a DomainCompliantRules,
        params: GeneratorParams,
    ) -> Self {
        let cap = params.max_rule_number;
        Self {
            domain,
            compliant,
            params,
            analyser: SelectionAnalyser::new(),
            sampler: SampleGenerator::new(),
            cap,
        }
    }

    /// The selection analyser, populated by the enumeration.
    pub fn analyser(&self) -> &SelectionAnalyser {
        &self.analyser
    }

    /// Consume the generator, keeping the analyser for the class builder.
    pub fn into_analyser(self) -> SelectionAnalyser {
        self.analyser
    }

    /// Run the full two-phase construction and return the accepted rules,
    /// sorted by (cost, reproducible random index) and truncated to the
    /// requested count.
    ///
    /// `source` feeds the data-driven second pass; without it the dry-run
    /// rules are kept (conceptual selection partiles included).
    pub fn construct_rules(
        &mut self,
        source: Option<&dyn SelectionValueSource>,
        ctx: &mut RunContext,
    ) -> Vec<ConstructedRule> {
        let requested = self.params.rule_number;
        let existing = self
            .compliant
            .main_class_rules()
            .constructed_attribute_count();
        let selection_used =
            !self.params.selection_rules_forbidden && self.compliant.is_selection_rule_used();

        // Inflate the requested count to absorb later filtering: pre-existing
        // derived attributes may collide with new rules, and selection rules
        // can be filtered out when secondary tables lack values
        let mut required = requested + existing;
        if selection_used {
            required *= 2;
        }
        self.cap = (2 * required).min(self.params.max_rule_number).max(1);
        let required = required.min(self.cap);

        // Phase 1: dry run, recording candidate selection operands
        let mut rules = self.build_requested_rules(required, ctx);

        // When no selection rule survives among the most probable rules, the
        // provisioned surplus is useless and pass 2 can be skipped entirely
        let mut selection_filtered = false;
        if existing == 0 && selection_used {
            selection_filtered = filter_useless_selection_rules(&mut rules, requested.max(1));
            if selection_filtered {
                self.analyser.clean_all();
            }
        }

        // Phase 2: recompute selection partiles from data and regenerate
        if selection_used && !rules.is_empty() && !selection_filtered {
            if let Some(source) = source {
                let usable = self.analyser.compute_stats(self.domain, source);
                rules.clear();
                if usable {
                    rules = self.build_requested_rules(required, ctx);
                }
            }
        }

        rules.truncate(requested);
        self.cap = self.params.max_rule_number;
        rules
    }

    /// One budget-doubling trial loop around the root enumeration.
    fn build_requested_rules(
        &mut self,
        rule_number: usize,
        ctx: &mut RunContext,
    ) -> Vec<ConstructedRule> {
        const INITIAL_SEED: u64 = 1;
        const MAX_TRIALS: usize = 5;

        ctx.progress.begin_task();
        if self.analyser.is_stats_computed() {
            ctx.progress
                .display_main_label("Variable construction: using selection operands");
        } else {
            ctx.progress.display_main_label("Variable construction");
        }

        let initial_available = ctx.memory.remaining_available();
        let mut rules: Vec<ConstructedRule> = Vec::new();
        let mut drawing = rule_number as f64;
        let mut previous_count = 0usize;
        let mut trial = 0usize;
        let mut step = 0usize;

        while rules.len() < rule_number && trial <= MAX_TRIALS {
            step += 1;

            // Every drawing pass starts from the same seed
            ctx.reseed(INITIAL_SEED);
            ctx.progress.begin_task();
            ctx.progress.display_main_label(&format!("Step {step}"));

            rules = self.build_main_class_rules(drawing, ctx);
            let new_rules = rules.len().saturating_sub(previous_count);
            previous_count = rules.len();

            // Mean memory per rule, from the probe deltas when available
            let mean_rule_memory = match (initial_available, ctx.memory.remaining_available()) {
                (Some(initial), Some(now)) => Some(initial.abs_diff(now) / (1 + rules.len() as u64)),
                _ => None,
            };
            ctx.progress.end_task();

            if new_rules > 0 {
                trial = 0;
            } else {
                trial += 1;
            }
            debug!(step, drawing, produced = rules.len(), "construction step");

            if rules.len() < rule_number {
                ctx.progress
                    .display_progression((100 * rules.len() / rule_number.max(1)) as u32);
            } else {
                ctx.progress.display_progression(100);
            }
            ctx.progress
                .display_label(&format!("{} constructed features", rules.len()));
            if ctx.interruption_requested() {
                // Discarding everything inhibits the downstream stages
                rules.clear();
                break;
            }

            // Next trial, while the budget stays representable
            drawing *= 2.0;
            if drawing > 1e100 {
                break;
            }

            if rules.len() < rule_number && trial <= MAX_TRIALS {
                if let (Some(mean), Some(available)) =
                    (mean_rule_memory, ctx.memory.remaining_available())
                {
                    if (self.params.memory_policy)(rules.len(), mean, available) {
                        warn!(
                            produced = rules.len(),
                            mean_rule_memory = mean,
                            available,
                            "not enough memory to construct all requested rules"
                        );
                        break;
                    }
                }
            }
        }

        // Shuffle from the initial seed, then sort by cost with the shuffle
        // position as a reproducible tie-break
        ctx.reseed(INITIAL_SEED);
        rules.shuffle(&mut ctx.rng);
        for (i, rule) in rules.iter_mut().enumerate() {
            rule.set_random_index(i);
        }
        sort_by_cost_and_random_index(&mut rules);
        for rule in rules.iter_mut() {
            rule.set_random_index(0);
        }

        ctx.progress.end_task();
        rules
    }

    /// Enumerate rules applicable on the root class (simple return types
    /// only) and expand each with its share of the budget.
    fn build_main_class_rules(
        &mut self,
        drawing: f64,
        ctx: &mut RunContext,
    ) -> Vec<ConstructedRule> {
        let mut out = Vec::new();
        let main = self.compliant.main_class_rules();
        let main_class = main.class();

        let simple_rules: Vec<Arc<ConstructionRule>> = main
            .compliant_rules()
            .iter()
            .filter(|r| r.returns_simple_type())
            .cloned()
            .collect();
        if drawing <= 0.0 || simple_rules.is_empty() {
            return out;
        }

        let rule_choice_cost = self.params.root_rule_choice_cost;
        if rule_choice_cost > self.params.max_rule_cost {
            return out;
        }

        let (sorted_rules, probs, draws) = self.compute_rule_probs(drawing, simple_rules);
        let rule_count = sorted_rules.len();
        for (i, rule) in sorted_rules.iter().enumerate() {
            if draws[i] == 0.0 {
                continue;
            }
            let rule_cost = rule_choice_cost - probs[i].ln();
            if rule_cost > self.params.max_rule_cost {
                continue;
            }

            ctx.progress
                .display_progression((100 * (i + 1) / rule_count) as u32);
            ctx.progress.display_label(rule.name());
            if ctx.interruption_requested() {
                out.clear();
                break;
            }

            let sub = self.build_all_rules(
                rule,
                main_class,
                0,
                rule_cost,
                draws[i],
                self.params.selection_rules_forbidden,
                ctx,
            );
            out.extend(sub);
        }
        out
    }

    /// Build every rule drawn for one construction rule on one class.
    ///
    /// `selection_forbidden` is carried explicitly down the recursion: it is
    /// raised while inside a selection subtree, which both rejects nested
    /// selection rules and removes them from the prior's choice space.
    fn build_all_rules(
        &mut self,
        rule: &Arc<ConstructionRule>,
        class: Name,
        depth: usize,
        rule_cost: f64,
        drawing: f64,
        selection_forbidden: bool,
        ctx: &mut RunContext,
    ) -> Vec<ConstructedRule> {
        let mut out = Vec::new();
        if rule.is_selection_rule() && selection_forbidden {
            return out;
        }
        let inner_forbidden = selection_forbidden || rule.is_selection_rule();

        let mut operands: Vec<Operand> = Vec::with_capacity(rule.operand_count());
        self.build_from_operands(
            rule,
            class,
            None,
            0,
            &mut operands,
            depth + 1,
            0.0,
            drawing,
            inner_forbidden,
            &mut out,
            ctx,
        );

        // The choice cost of this rule applies to every produced tree
        for constructed in out.iter_mut() {
            constructed.set_cost(constructed.cost() + rule_cost);
        }
        out
    }

    /// Fill operand `operand_index` and recurse over the remaining ones.
    #[allow(clippy::too_many_arguments)]
    fn build_from_operands(
        &mut self,
        rule: &Arc<ConstructionRule>,
        class: Name,
        secondary: Option<Name>,
        operand_index: usize,
        operands: &mut Vec<Operand>,
        depth: usize,
        cost_so_far: f64,
        drawing: f64,
        selection_forbidden: bool,
        out: &mut Vec<ConstructedRule>,
        ctx: &mut RunContext,
    ) {
        debug_assert_eq!(operands.len(), operand_index);
        debug_assert!(drawing > 0.0);

        // Scope of this operand
        let operand_class = if rule.is_secondary_scope_operand(operand_index) {
            match secondary {
                Some(class) => class,
                None => return,
            }
        } else {
            class
        };
        let operand_rules = match self.compliant.lookup(operand_class) {
            Some(rules) => rules,
            None => return,
        };

        // The predicate operand of a selection rule has its own machinery
        if rule.is_selection_rule() && operand_index == 1 {
            self.build_selection_rules(
                rule,
                operand_class,
                operands,
                depth,
                cost_so_far,
                drawing,
                out,
                ctx,
            );
            return;
        }

        let matching_attributes =
            extract_matching_attributes(self.domain, rule, operand_index, operand_rules);
        let matching_rules =
            extract_matching_rules(rule, operand_index, operand_rules, selection_forbidden);
        let attribute_count = matching_attributes.len();
        let rule_count = matching_rules.len();

        let (attribute_cost, rule_choice_cost) =
            operand_regularization_costs(attribute_count, rule_count);
        let (attribute_draws, all_rules_draw) =
            dispatch_attribute_draws(&self.sampler, drawing, attribute_count, rule_count);
        let (sorted_rules, rule_probs, rule_draws) = if all_rules_draw > 0.0 && rule_count > 0 {
            self.compute_rule_probs(all_rules_draw, matching_rules)
        } else {
            (Vec::new(), Vec::new(), Vec::new())
        };

        // Attribute choices for this operand
        if attribute_count > 0 && cost_so_far + attribute_cost <= self.params.max_rule_cost {
            let redundant: Vec<bool> = matching_attributes
                .iter()
                .map(|&(name, _)| operand_rules.is_attribute_redundant(name))
                .collect();
            for (i, &(name, data_type)) in matching_attributes.iter().enumerate() {
                if out.len() >= self.cap {
                    break;
                }
                if attribute_draws[i] == 0.0 {
                    continue;
                }
                if redundant[i] {
                    continue;
                }

                operands.push(Operand::Attribute { name, data_type });
                if operand_index == rule.operand_count() - 1 {
                    out.push(ConstructedRule::new(
                        Arc::clone(rule),
                        operands.clone(),
                        cost_so_far + attribute_cost,
                    ));
                } else {
                    let next_secondary = data_type
                        .referenced_class()
                        .filter(|c| self.compliant.lookup(*c).is_some());
                    self.build_from_operands(
                        rule,
                        class,
                        next_secondary,
                        operand_index + 1,
                        operands,
                        depth + 1,
                        cost_so_far + attribute_cost,
                        attribute_draws[i],
                        selection_forbidden,
                        out,
                        ctx,
                    );
                }
                operands.pop();
            }
        }

        // Nested-rule choices for this operand
        if all_rules_draw > 0.0
            && !sorted_rules.is_empty()
            && depth <= self.params.max_rule_depth
            && cost_so_far + rule_choice_cost <= self.params.max_rule_cost
        {
            for (i, matching_rule) in sorted_rules.iter().enumerate() {
                if out.len() >= self.cap {
                    break;
                }
                if rule_draws[i] == 0.0 {
                    continue;
                }
                let rule_operand_cost = rule_choice_cost - rule_probs[i].ln();

                // Every rule usable as this operand, with its own budget
                let operand_candidates = self.build_all_rules(
                    matching_rule,
                    operand_class,
                    depth + 1,
                    rule_operand_cost,
                    rule_draws[i],
                    selection_forbidden,
                    ctx,
                );
                // Nothing may come back when a limit was hit below
                if operand_candidates.is_empty() {
                    continue;
                }
                let operand_draws =
                    self.dispatch_constructed_rule_draws(rule_draws[i], &operand_candidates);

                for (j, operand_rule) in operand_candidates.into_iter().enumerate() {
                    if out.len() >= self.cap {
                        break;
                    }
                    if operand_draws[j] == 0.0 {
                        continue;
                    }
                    let operand_cost = operand_rule.cost();
                    let next_secondary = operand_rule
                        .referenced_class()
                        .filter(|c| self.compliant.lookup(*c).is_some());

                    operands.push(Operand::Rule(Box::new(operand_rule)));
                    if operand_index == rule.operand_count() - 1 {
                        out.push(ConstructedRule::new(
                            Arc::clone(rule),
                            operands.clone(),
                            cost_so_far + operand_cost,
                        ));
                    } else {
                        self.build_from_operands(
                            rule,
                            class,
                            next_secondary,
                            operand_index + 1,
                            operands,
                            depth + 1,
                            cost_so_far + operand_cost,
                            operand_draws[j],
                            selection_forbidden,
                            out,
                            ctx,
                        );
                    }
                    operands.pop();
                }
            }
        }
    }

    /// Build the selection rules for the predicate operand: draw a selection
    /// size under the universal prior, operand subsets by product
    /// probability, then (granularity, partile) values per member.
    #[allow(clippy::too_many_arguments)]
    fn build_selection_rules(
        &mut self,
        rule: &Arc<ConstructionRule>,
        secondary_class: Name,
        operands: &mut Vec<Operand>,
        depth: usize,
        cost_so_far: f64,
        drawing: f64,
        out: &mut Vec<ConstructedRule>,
        ctx: &mut RunContext,
    ) {
        let secondary_rules = match self.compliant.lookup(secondary_class) {
            Some(rules) => rules,
            None => return,
        };

        // Candidate univariate operands: attributes and nested simple rules
        // of the secondary scope (selection rules excluded inside)
        let matching_attributes =
            extract_matching_attributes(self.domain, rule, 1, secondary_rules);
        let matching_rules = extract_matching_rules(rule, 1, secondary_rules, true);
        let attribute_count = matching_attributes.len();
        let rule_count = matching_rules.len();

        let (attribute_cost, rule_choice_cost) =
            operand_regularization_costs(attribute_count, rule_count);
        let (_attribute_draws, all_rules_draw) =
            dispatch_attribute_draws(&self.sampler, drawing, attribute_count, rule_count);

        // Build the candidate rule operands
        let mut rule_operands: Vec<ConstructedRule> = Vec::new();
        if all_rules_draw > 0.0 && rule_count > 0 {
            let (sorted_rules, rule_probs, rule_draws) =
                self.compute_rule_probs(all_rules_draw, matching_rules);
            for (i, matching_rule) in sorted_rules.iter().enumerate() {
                if rule_draws[i] == 0.0 {
                    continue;
                }
                let rule_operand_cost = rule_choice_cost - rule_probs[i].ln();
                let built = self.build_all_rules(
                    matching_rule,
                    secondary_class,
                    depth + 1,
                    rule_operand_cost,
                    rule_draws[i],
                    true,
                    ctx,
                );
                if built.is_empty() {
                    continue;
                }
                let operand_draws = self.dispatch_constructed_rule_draws(rule_draws[i], &built);
                for (j, candidate) in built.into_iter().enumerate() {
                    if operand_draws[j] > 0.0 {
                        rule_operands.push(candidate);
                    }
                }
            }
        }

        // Register the candidates and collect their prior probabilities;
        // in pass 2 an operand without data-driven granularities is dead
        let candidate_attributes: Vec<(Name, DataType)> = matching_attributes
            .iter()
            .filter(|&&(name, _)| !secondary_rules.is_attribute_redundant(name))
            .copied()
            .collect();
        let mut entries: Vec<(usize, f64)> = Vec::new();
        for &(name, data_type) in &candidate_attributes {
            let index = self.analyser.register_operand(
                self.domain,
                secondary_class,
                SelectionOperand::Attribute { name, data_type },
            );
            let probability = (-attribute_cost).exp();
            if self.operand_usable(secondary_class, index) && probability > f64::MIN_POSITIVE {
                entries.push((index, probability));
            }
        }
        for candidate in rule_operands {
            let cost = candidate.cost();
            let index = self.analyser.register_operand(
                self.domain,
                secondary_class,
                SelectionOperand::Rule(candidate),
            );
            let probability = (-cost).exp();
            if self.operand_usable(secondary_class, index) && probability > f64::MIN_POSITIVE {
                entries.push((index, probability));
            }
        }
        if entries.is_empty() {
            return;
        }

        // Canonical operand order makes partitions unique whatever the
        // random path that reached them
        let stats = self
            .analyser
            .class_stats(secondary_class)
            .expect("operands were registered");
        let mut keys: Vec<((u8, String), usize)> = entries
            .iter()
            .enumerate()
            .map(|(position, &(index, _))| {
                (stats.operand(index).operand().sort_key(self.domain), position)
            })
            .collect();
        keys.sort();
        let entries: Vec<(usize, f64)> = keys.iter().map(|&(_, position)| entries[position]).collect();
        let probs: Vec<f64> = entries.iter().map(|&(_, p)| p).collect();

        // Draws per selection size under the universal natural-number prior
        let size_draws = self
            .sampler
            .best_natural_numbers_prior_sample(drawing, entries.len());

        for size in 1..=size_draws.len() {
            let selection_draw = size_draws[size - 1];
            let initial_count = out.len();
            if selection_draw > 0.0 {
                let subsets = self
                    .sampler
                    .best_selection_sample(selection_draw, size, &probs);
                let parts =
                    self.build_selection_parts(secondary_class, size, &entries, &subsets);

                for (part_ref, part_cost) in parts {
                    if out.len() >= self.cap {
                        break;
                    }
                    let mut bound = operands.clone();
                    bound.push(Operand::Part(part_ref));
                    out.push(ConstructedRule::new(
                        Arc::clone(rule),
                        bound,
                        cost_so_far + part_cost,
                    ));
                }

                // Prune rules too improbable to ever be drawn
                filter_rules_for_drawing(drawing, out);
            }

            if out.len() >= self.cap || out.len() == initial_count {
                break;
            }
        }
    }

    /// Expand operand subsets into concrete selection parts, deduplicated
    /// through the analyser's partition side-tables.
    fn build_selection_parts(
        &mut self,
        secondary_class: Name,
        size: usize,
        entries: &[(usize, f64)],
        subsets: &[tb_core::IndexedFrequency],
    ) -> Vec<(PartRef, f64)> {
        let size_cost = universal_code_length(size as u64);
        let mut results = Vec::new();

        for subset in subsets {
            if subset.frequency <= 0.0 {
                continue;
            }
            let operands_cost = -subset.prob.ln();

            // Value distributions per subset member
            let mut value_sets: Vec<Vec<SelectionValue>> = Vec::with_capacity(size);
            let mut usable = true;
            for &position in &subset.indexes {
                let values = self.compute_selection_values(
                    secondary_class,
                    entries[position].0,
                    subset.frequency,
                );
                if values.is_empty() {
                    usable = false;
                    break;
                }
                value_sets.push(values);
            }
            if !usable {
                continue;
            }

            let prob_vectors: Vec<Vec<f64>> = value_sets
                .iter()
                .map(|values| values.iter().map(|v| (-v.cost).exp()).collect())
                .collect();
            let composites = self
                .sampler
                .best_multiple_product_sample(subset.frequency, &prob_vectors);

            for composite in &composites {
                if composite.frequency <= 0.0 {
                    continue;
                }
                let mut dimensions = Vec::with_capacity(size);
                let mut partile_indexes = Vec::with_capacity(size);
                let mut partiles_cost = 0.0;
                for (member, &value_index) in composite.indexes.iter().enumerate() {
                    let value = &value_sets[member][value_index];
                    dimensions.push((entries[subset.indexes[member]].0, value.granularity));
                    partile_indexes.push(value.part_index);
                    partiles_cost += value.cost;
                }
                let total_cost = size_cost + operands_cost + partiles_cost;
                if total_cost > self.params.max_rule_cost {
                    continue;
                }
                let part_ref = self.analyser.register_part(
                    secondary_class,
                    dimensions,
                    partile_indexes,
                    total_cost,
                );
                results.push((part_ref, total_cost));
            }
        }
        results
    }

    /// Draw (granularity, partile) values for one selection operand.
    ///
    /// Pass 1 spreads draws over conceptual power-of-two granularities up to
    /// the drawing number; pass 2 uses the granularities whose actual
    /// partiles were computed from data.
    fn compute_selection_values(
        &self,
        class: Name,
        operand_index: usize,
        drawing: f64,
    ) -> Vec<SelectionValue> {
        let mut values = Vec::new();
        if drawing <= 0.0 {
            return values;
        }

        if !self.analyser.is_stats_computed() {
            // Conceptual granularities 2, 4, 8, ... with universal-prior
            // probabilities on the exponent
            let mut granularities = Vec::new();
            let mut probs = Vec::new();
            let mut granularity: u32 = 2;
            let mut exponent: u32 = 1;
            while granularity <= MAX_SELECTION_GRANULARITY {
                granularities.push((granularity, exponent));
                probs.push((-universal_code_length(exponent as u64)).exp());
                granularity *= 2;
                exponent += 1;
                // Granularities beyond the drawing number cannot be filled
                if granularity as f64 >= drawing {
                    break;
                }
            }
            let frequencies = self.sampler.best_sample(drawing, &probs);
            for (i, &(granularity, exponent)) in granularities.iter().enumerate() {
                if frequencies[i] <= 0.0 {
                    continue;
                }
                let partile_frequencies = self
                    .sampler
                    .best_equidistributed_sample(frequencies[i], granularity as usize);
                for (part_index, &frequency) in partile_frequencies.iter().enumerate() {
                    if frequency > 0.0 {
                        values.push(SelectionValue {
                            granularity,
                            part_index,
                            cost: universal_code_length(exponent as u64)
                                + (granularity as f64).ln(),
                        });
                    }
                }
            }
        } else {
            let operand_stats = match self.analyser.class_stats(class) {
                Some(stats) => stats.operand(operand_index),
                None => return values,
            };
            let available = operand_stats.granularities();
            if available.is_empty() {
                return values;
            }
            let probs: Vec<f64> = available
                .iter()
                .map(|g| (-universal_code_length(g.exponent as u64)).exp())
                .collect();
            let frequencies = self.sampler.best_sample(drawing, &probs);
            for (i, granularity_partiles) in available.iter().enumerate() {
                let partiles = &granularity_partiles.partiles;
                let partile_frequencies = self
                    .sampler
                    .best_equidistributed_sample(frequencies[i], partiles.len());
                for (j, partile) in partiles.iter().enumerate() {
                    if partile_frequencies[j] > 0.0 {
                        values.push(SelectionValue {
                            granularity: granularity_partiles.granularity,
                            part_index: partile.index(),
                            cost: universal_code_length(granularity_partiles.exponent as u64)
                                + (partiles.len() as f64).ln(),
                        });
                    }
                }
            }
        }
        values
    }

    /// In pass 2, operands without data-driven granularities are disabled.
    fn operand_usable(&self, class: Name, operand_index: usize) -> bool {
        if !self.analyser.is_stats_computed() {
            return true;
        }
        self.analyser
            .class_stats(class)
            .map(|stats| stats.operand(operand_index).granularity_count() > 0)
            .unwrap_or(false)
    }

    /// Probabilities over matching construction rules: uniform, perturbed
    /// downward with recursion level and operand count so that simpler,
    /// earlier rules win ties, then normalised and converted to draws.
    fn compute_rule_probs(
        &self,
        drawing: f64,
        mut rules: Vec<Arc<ConstructionRule>>,
    ) -> (Vec<Arc<ConstructionRule>>, Vec<f64>, Vec<f64>) {
        const EPSILON_PROB: f64 = 1e-9;
        debug_assert!(drawing > 0.0);
        debug_assert!(!rules.is_empty());

        rules.sort_by(|a, b| {
            a.recursion_level()
                .cmp(&b.recursion_level())
                .then(a.name().cmp(b.name()))
        });
        let max_operand_count = rules.iter().map(|r| r.operand_count()).max().unwrap_or(0);

        let mut probs = Vec::with_capacity(rules.len());
        let mut total = 0.0;
        for rule in &rules {
            let penalty = rule.recursion_level() as f64 * max_operand_count as f64
                + rule.operand_count() as f64;
            let prob = (1.0 / rules.len() as f64) * (1.0 - EPSILON_PROB * penalty);
            total += prob;
            probs.push(prob);
        }
        for prob in probs.iter_mut() {
            *prob /= total;
        }

        let draws = self.sampler.best_sample(drawing, &probs);
        (rules, probs, draws)
    }

    /// Budget split among already-built operand rules, proportional to
    /// their prior probabilities `exp(-cost)`.
    fn dispatch_constructed_rule_draws(
        &self,
        drawing: f64,
        rules: &[ConstructedRule],
    ) -> Vec<f64> {
        debug_assert!(!rules.is_empty());
        if rules.len() == 1 {
            return vec![drawing];
        }
        let probs: Vec<f64> = rules.iter().map(|r| (-r.cost()).exp()).collect();
        debug_assert!(self.sampler.check_partial_prob_vector(&probs));
        self.sampler.best_sample(drawing, &probs)
    }
}

/// Regularisation costs of one operand choice: `ln(nAttr)` when only
/// attributes can feed it, `ln(nAttr + 1)` for both branches when nested
/// rules are an alternative.
fn operand_regularization_costs(attribute_count: usize, rule_count: usize) -> (f64, f64) {
    if rule_count == 0 {
        if attribute_count > 0 {
            ((attribute_count as f64).ln(), 0.0)
        } else {
            (0.0, 0.0)
        }
    } else {
        let cost = (attribute_count as f64 + 1.0).ln();
        (cost, cost)
    }
}

/// Split the drawing number between attribute choices and the rule
/// sub-space. Attributes are preferred while the budget does not even cover
/// them; otherwise the rules receive one (rounded) share out of
/// `nAttr + 1`.
fn dispatch_attribute_draws(
    sampler: &SampleGenerator,
    drawing: f64,
    attribute_count: usize,
    rule_count: usize,
) -> (Vec<f64>, f64) {
    debug_assert!(drawing >= 0.0);
    if rule_count == 0 {
        return (
            sampler.best_equidistributed_sample(drawing, attribute_count),
            0.0,
        );
    }
    if attribute_count == 0 {
        return (Vec::new(), drawing);
    }
    if drawing <= attribute_count as f64 {
        (
            sampler.best_equidistributed_sample(drawing, attribute_count),
            0.0,
        )
    } else {
        let rules_share = (0.5 + drawing / (attribute_count as f64 + 1.0)).floor();
        (
            sampler.best_equidistributed_sample(drawing - rules_share, attribute_count),
            rules_share,
        )
    }
}

/// Keep only the rules whose probability is large enough to receive a draw:
/// scanning the sorted probabilities from the largest, the threshold is the
/// first `p <= p_max / (drawing - rank + 2)`.
fn filter_rules_for_drawing(drawing: f64, rules: &mut Vec<ConstructedRule>) -> bool {
    if rules.len() <= 1 {
        return false;
    }
    let mut probs: Vec<f64> = rules.iter().map(|r| (-r.cost()).exp()).collect();
    probs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let max_prob = *probs.last().expect("non-empty");
    let mut threshold = 0.0;
    let mut rank = 2usize;
    for i in (0..probs.len() - 1).rev() {
        let prob = probs[i];
        if prob <= max_prob / (drawing - rank as f64 + 2.0) {
            threshold = prob;
            break;
        }
        rank += 1;
    }

    let filtered = threshold > 0.0;
    if filtered {
        rules.retain(|r| (-r.cost()).exp() > threshold);
    }
    filtered
}

/// When no rule among the `max_rules` most probable ones uses a selection,
/// the surplus provisioned for selection filtering is useless: truncate.
fn filter_useless_selection_rules(rules: &mut Vec<ConstructedRule>, max_rules: usize) -> bool {
    if rules.len() <= max_rules {
        return false;
    }
    let selection_among_best = rules[..max_rules].iter().any(|r| r.uses_selection_rule());
    if selection_among_best {
        return false;
    }
    rules.truncate(max_rules);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tb_core::{DataType, DomainBuilder};
    use tb_rules::{compute_all_classes_compliant_rules, standard_catalogue, RuleCatalogue};

    fn order_item_domain() -> Domain {
        let mut builder = DomainBuilder::new();
        let order = builder.add_class("Order");
        let item = builder.add_class("Item");
        let id = builder
            .add_attribute(order, "Id", DataType::Categorical)
            .unwrap();
        builder
            .add_attribute(order, "Items", DataType::Table(item))
            .unwrap();
        builder
            .add_attribute(item, "Price", DataType::Numeric)
            .unwrap();
        builder.set_key(order, &[id]).unwrap();
        builder.build(order).unwrap()
    }

    fn count_mean_catalogue() -> RuleCatalogue {
        let mut catalogue = standard_catalogue();
        for rule in ["TableCountDistinct", "TableMode", "TableMedian", "TableMin",
                     "TableMax", "TableSum", "TableStdDev", "TableSelection"] {
            catalogue.set_rule_used(rule, false);
        }
        catalogue
    }

    #[test]
    fn test_dispatch_attribute_draws_conservation() {
        let sampler = SampleGenerator::new();
        for drawing in [1.0, 5.0, 17.0, 100.0] {
            for attrs in [1usize, 3, 10] {
                for rules in [0usize, 1, 4] {
                    let (attr_draws, rules_draw) =
                        dispatch_attribute_draws(&sampler, drawing, attrs, rules);
                    let total: f64 = rules_draw + attr_draws.iter().sum::<f64>();
                    if rules > 0 && attrs == 0 {
                        assert_eq!(total, drawing);
                    } else {
                        assert_eq!(total, drawing, "drawing={drawing} attrs={attrs} rules={rules}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_one_table_aggregation_costs() {
        // Rules = {Count, Mean}: two rules, one attribute path each, so
        // each feature costs one binary rule choice
        let domain = order_item_domain();
        let catalogue = count_mean_catalogue();
        let compliant = compute_all_classes_compliant_rules(&domain, &catalogue, None);
        let params = GeneratorParams {
            rule_number: 2,
            ..GeneratorParams::default()
        };
        let mut generator = RuleGenerator::new(&domain, &compliant, params);
        let mut ctx = RunContext::new(1);
        let rules = generator.construct_rules(None, &mut ctx);

        assert_eq!(rules.len(), 2);
        let formulas: Vec<String> = rules.iter().map(|r| r.render(&domain)).collect();
        assert!(formulas.contains(&"TableCount(Items)".to_string()));
        assert!(formulas.contains(&"TableMean(Items, Price)".to_string()));
        for rule in &rules {
            assert!((rule.cost() - 2f64.ln()).abs() < 1e-6, "cost {}", rule.cost());
        }
    }

    #[test]
    fn test_no_rules_no_construction() {
        let domain = order_item_domain();
        let catalogue = RuleCatalogue::new();
        let compliant = compute_all_classes_compliant_rules(&domain, &catalogue, None);
        let mut generator =
            RuleGenerator::new(&domain, &compliant, GeneratorParams::default());
        let mut ctx = RunContext::new(1);
        let rules = generator.construct_rules(None, &mut ctx);
        assert!(rules.is_empty());
    }

    #[test]
    fn test_reproducibility_same_seed() {
        let domain = order_item_domain();
        let catalogue = standard_catalogue();
        let compliant = compute_all_classes_compliant_rules(&domain, &catalogue, None);
        let params = GeneratorParams {
            rule_number: 20,
            ..GeneratorParams::default()
        };

        let render_all = || {
            let mut generator = RuleGenerator::new(&domain, &compliant, params);
            let mut ctx = RunContext::new(1);
            let rules = generator.construct_rules(None, &mut ctx);
            rules
                .iter()
                .map(|r| format!("{}:{:.9}", r.render(&domain), r.cost()))
                .collect::<Vec<_>>()
        };
        assert_eq!(render_all(), render_all());
    }

    #[test]
    fn test_rule_number_and_cost_bounds() {
        let domain = order_item_domain();
        let catalogue = standard_catalogue();
        let compliant = compute_all_classes_compliant_rules(&domain, &catalogue, None);
        let params = GeneratorParams {
            rule_number: 10,
            max_rule_depth: 3,
            max_rule_cost: 50.0,
            ..GeneratorParams::default()
        };
        let mut generator = RuleGenerator::new(&domain, &compliant, params);
        let mut ctx = RunContext::new(1);
        let rules = generator.construct_rules(None, &mut ctx);

        assert!(rules.len() <= 10);
        for rule in &rules {
            assert!(rule.cost() >= 0.0);
            assert!(rule.cost() <= 50.0 + 1e-9);
        }
        // Sorted by increasing cost
        for pair in rules.windows(2) {
            assert!(pair[0].cost() <= pair[1].cost() + 1e-12);
        }
    }

    #[test]
    fn test_selection_never_nested() {
        // A selection subtree must not contain another selection
        let domain = order_item_domain();
        let catalogue = standard_catalogue();
        let compliant = compute_all_classes_compliant_rules(&domain, &catalogue, None);
        let params = GeneratorParams {
            rule_number: 100,
            max_rule_depth: 3,
            ..GeneratorParams::default()
        };
        let mut generator = RuleGenerator::new(&domain, &compliant, params);
        let mut ctx = RunContext::new(1);
        let rules = generator.construct_rules(None, &mut ctx);

        fn selection_nodes(rule: &ConstructedRule) -> usize {
            let own = usize::from(rule.rule().is_selection_rule());
            own + rule
                .operands()
                .iter()
                .map(|op| match op {
                    Operand::Rule(inner) => selection_nodes(inner),
                    _ => 0,
                })
                .sum::<usize>()
        }
        for rule in &rules {
            assert!(
                selection_nodes(rule) <= 1,
                "nested selection in {}",
                rule.render(&domain)
            );
        }
    }

    #[test]
    fn test_selection_rules_forbidden_parameter() {
        let domain = order_item_domain();
        let catalogue = standard_catalogue();
        let compliant = compute_all_classes_compliant_rules(&domain, &catalogue, None);
        let params = GeneratorParams {
            rule_number: 50,
            selection_rules_forbidden: true,
            ..GeneratorParams::default()
        };
        let mut generator = RuleGenerator::new(&domain, &compliant, params);
        let mut ctx = RunContext::new(1);
        let rules = generator.construct_rules(None, &mut ctx);
        assert!(rules.iter().all(|r| !r.uses_selection_rule()));
    }

    #[test]
    fn test_interruption_discards_everything() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct InterruptSecondCall(AtomicUsize);
        impl tb_core::Progress for InterruptSecondCall {
            fn is_interruption_requested(&self) -> bool {
                self.0.fetch_add(1, Ordering::SeqCst) >= 1
            }
        }

        let domain = order_item_domain();
        let catalogue = standard_catalogue();
        let compliant = compute_all_classes_compliant_rules(&domain, &catalogue, None);
        let params = GeneratorParams {
            rule_number: 50,
            ..GeneratorParams::default()
        };
        let mut generator = RuleGenerator::new(&domain, &compliant, params);
        let mut ctx = RunContext::new(1)
            .with_progress(Box::new(InterruptSecondCall(AtomicUsize::new(0))));
        let rules = generator.construct_rules(None, &mut ctx);
        assert!(rules.is_empty());
    }

    #[test]
    fn test_filter_rules_for_drawing_threshold() {
        // Hand-computed: probs sorted ascending [e^-4, e^-2, e^-1];
        // max = e^-1; with drawing = 3 the scan tests
        // rank 2: e^-2 <= e^-1 / (3 - 2 + 2) = e^-1/3?  0.1353 <= 0.1226 is false;
        // rank 3: e^-4 <= e^-1 / (3 - 3 + 2) = e^-1/2 = 0.1839: true,
        // so only the e^-4 rule is dropped
        let domain = order_item_domain();
        let catalogue = standard_catalogue();
        let count = Arc::new(catalogue.lookup("TableCount").unwrap().clone());
        let items = domain.name_of("Items").unwrap();
        let item_class = domain.name_of("Item").unwrap();
        let make = |cost: f64| {
            ConstructedRule::new(
                Arc::clone(&count),
                vec![Operand::Attribute {
                    name: items,
                    data_type: DataType::Table(item_class),
                }],
                cost,
            )
        };
        let mut rules = vec![make(1.0), make(2.0), make(4.0)];
        let filtered = filter_rules_for_drawing(3.0, &mut rules);
        assert!(filtered);
        assert_eq!(rules.len(), 2);
        assert!(rules.iter().all(|r| r.cost() < 4.0));

        // A large budget keeps everything
        let mut rules = vec![make(1.0), make(2.0), make(4.0)];
        assert!(!filter_rules_for_drawing(1000.0, &mut rules));
        assert_eq!(rules.len(), 3);
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Author: Pushp Kharat

//! Aggregate construction rules over secondary tables.

use tb_core::TypeKind;

use crate::rule::{ConstructionRule, OperandSpec, ReturnSpec, RuleFamily};

fn numeric_aggregate(name: &'static str, label: &'static str) -> ConstructionRule {
    ConstructionRule::new(
        name,
        label,
        RuleFamily::Aggregate,
        vec![
            OperandSpec::primary(TypeKind::Table),
            OperandSpec::secondary(TypeKind::Numeric),
        ],
        ReturnSpec::Simple(TypeKind::Numeric),
    )
}

/// All aggregate rules.
pub fn aggregate_rules() -> Vec<ConstructionRule> {
    vec![
        ConstructionRule::new(
            "TableCount",
            "Number of records in a table",
            RuleFamily::Aggregate,
            vec![OperandSpec::primary(TypeKind::Table)],
            ReturnSpec::Simple(TypeKind::Numeric),
        ),
        ConstructionRule::new(
            "TableCountDistinct",
            "Number of distinct values in a table column",
            RuleFamily::Aggregate,
            vec![
                OperandSpec::primary(TypeKind::Table),
                OperandSpec::secondary(TypeKind::Categorical),
            ],
            ReturnSpec::Simple(TypeKind::Numeric),
        ),
        ConstructionRule::new(
            "TableMode",
            "Most frequent value of a table column",
            RuleFamily::Aggregate,
            vec![
                OperandSpec::primary(TypeKind::Table),
                OperandSpec::secondary(TypeKind::Categorical),
            ],
            ReturnSpec::Simple(TypeKind::Categorical),
        ),
        numeric_aggregate("TableMean", "Mean of a table column"),
        numeric_aggregate("TableMedian", "Median of a table column"),
        numeric_aggregate("TableMin", "Minimum of a table column"),
        numeric_aggregate("TableMax", "Maximum of a table column"),
        numeric_aggregate("TableSum", "Sum of a table column"),
        numeric_aggregate("TableStdDev", "Standard deviation of a table column"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_rules() {
        let rules = aggregate_rules();
        assert_eq!(rules.len(), 9);
        for rule in &rules {
            assert_eq!(rule.family(), RuleFamily::Aggregate);
            assert_eq!(rule.operand_at(0).kind, TypeKind::Table);
            assert!(!rule.is_selection_rule());
            assert!(rule.returns_simple_type());
        }
    }
}

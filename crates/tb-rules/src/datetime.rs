// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Author: Pushp Kharat

//! Date and time decomposition rules.

use tb_core::TypeKind;

use crate::rule::{ConstructionRule, OperandSpec, ReturnSpec, RuleFamily};

fn date_part(name: &'static str, label: &'static str) -> ConstructionRule {
    ConstructionRule::new(
        name,
        label,
        RuleFamily::DateTime,
        vec![OperandSpec::primary(TypeKind::Date)],
        ReturnSpec::Simple(TypeKind::Numeric),
    )
}

/// All date/time decomposition rules.
pub fn datetime_rules() -> Vec<ConstructionRule> {
    vec![
        date_part("Year", "Year of a date"),
        date_part("Month", "Month of a date"),
        date_part("Day", "Day of month of a date"),
        date_part("WeekDay", "Day of week of a date"),
        date_part("YearDay", "Day of year of a date"),
        ConstructionRule::new(
            "DecimalTime",
            "Time of day as a decimal hour",
            RuleFamily::DateTime,
            vec![OperandSpec::primary(TypeKind::Time)],
            ReturnSpec::Simple(TypeKind::Numeric),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datetime_rules() {
        let rules = datetime_rules();
        assert_eq!(rules.len(), 6);
        for rule in &rules {
            assert_eq!(rule.family(), RuleFamily::DateTime);
            assert_eq!(rule.operand_count(), 1);
            assert_eq!(rule.return_kind(), TypeKind::Numeric);
        }
    }
}

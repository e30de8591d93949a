// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Author: Pushp Kharat

//! Sub-table selection rules.
//!
//! `TableSelection` restricts a sub-table to the records matching a
//! univariate predicate built from partiles of a selection operand. The
//! second operand slot is a placeholder: its effective type is resolved by
//! the selection-operand machinery, which accepts numeric or categorical
//! operands.

use crate::rule::ConstructionRule;

/// All selection rules.
pub fn selection_rules() -> Vec<ConstructionRule> {
    vec![ConstructionRule::selection(
        "TableSelection",
        "Selection of table records matching a predicate",
    )]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_rules() {
        let rules = selection_rules();
        assert_eq!(rules.len(), 1);
        assert!(rules[0].is_selection_rule());
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Author: Pushp Kharat

//! Text decomposition rules.

use tb_core::TypeKind;

use crate::rule::{ConstructionRule, OperandSpec, ReturnSpec, RuleFamily};

/// All text decomposition rules.
pub fn text_rules() -> Vec<ConstructionRule> {
    vec![ConstructionRule::new(
        "TextLength",
        "Length of a text value",
        RuleFamily::Text,
        vec![OperandSpec::primary(TypeKind::Text)],
        ReturnSpec::Simple(TypeKind::Numeric),
    )]
}

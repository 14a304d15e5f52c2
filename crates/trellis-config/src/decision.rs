use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::param::ParamValue;

/// Jump target that terminates the module early.
pub const END_TARGET: &str = "_end";

/// Decision routing for sequential modules.
///
/// After the step succeeds, `switch` is rendered and matched against `cases`;
/// `default` is used when nothing matches. Without a match and without a
/// default, execution advances to the next step.
///
/// ```yaml
/// decision:
///   switch: "{{ mode }}"
///   cases:
///     fast: { goto: report }
///     skip: { goto: _end }
///   default: { goto: deep-scan }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionConfig {
  pub switch: ParamValue,
  #[serde(default)]
  pub cases: HashMap<String, DecisionCase>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub default: Option<DecisionCase>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionCase {
  /// Step name to jump to, or [`END_TARGET`].
  pub goto: String,
}

impl DecisionCase {
  pub fn is_end(&self) -> bool {
    self.goto == END_TARGET
  }
}

//! Selection to variable assignment
//!
//! Selected option booleans are true, every other option boolean is false.
//! Numeric pseudo-variables (order quantity, base price, per-group
//! quantities) are computed from the selections and only reach the diagram
//! through the derived comparison booleans declared in the registry.

use crate::error::{Error, Result};
use crate::model::{CustomerContext, Model, Selection};
use crate::registry::{
    group_quantity_var, option_var, VarRole, VarSource, VariableRegistry, PRICE_QUANTITY,
    PRICE_TOTAL,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Concrete values for every registry variable
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    bits: Vec<bool>,
    numeric: BTreeMap<String, f64>,
    selected: BTreeSet<String>,
}

impl Assignment {
    /// Assignment for a selection set
    ///
    /// Unknown option IDs are rejected. Zero-quantity selections and inactive
    /// options count as not selected.
    pub fn build(
        registry: &VariableRegistry,
        model: &Model,
        selections: &[Selection],
        customer: Option<&CustomerContext>,
    ) -> Result<Self> {
        let mut numeric: BTreeMap<String, f64> = BTreeMap::new();
        let mut selected = BTreeSet::new();
        let mut total_quantity = 0.0;
        let mut total_price = 0.0;

        for group in &model.groups {
            numeric.insert(group_quantity_var(&group.id), 0.0);
        }

        for selection in selections {
            let option = model
                .option(&selection.option_id)
                .ok_or_else(|| Error::UnknownOption(selection.option_id.clone()))?;
            if selection.quantity == 0 || !option.active {
                continue;
            }
            let quantity = f64::from(selection.quantity);
            selected.insert(option.id.clone());
            total_quantity += quantity;
            total_price += option.price * quantity;
            *numeric
                .entry(group_quantity_var(&option.group_id))
                .or_insert(0.0) += quantity;
        }
        numeric.insert(PRICE_QUANTITY.to_string(), total_quantity);
        numeric.insert(PRICE_TOTAL.to_string(), total_price);

        Self::from_parts(registry, selected, numeric, customer)
    }

    /// Assignment from explicit parts; used where there is no selection set
    pub fn from_parts(
        registry: &VariableRegistry,
        selected: BTreeSet<String>,
        numeric: BTreeMap<String, f64>,
        customer: Option<&CustomerContext>,
    ) -> Result<Self> {
        let mut bits = vec![false; registry.next_index() as usize];

        for option_id in &selected {
            if let Some(index) = registry.index_of(&option_var(option_id)) {
                bits[index as usize] = true;
            }
        }

        for var in registry.variables_with_role(VarRole::Customer) {
            if let (Some(customer), VarSource::Customer(attribute)) = (customer, &var.source) {
                bits[var.index as usize] = customer.attribute(attribute);
            }
        }

        for var in registry.variables_with_role(VarRole::Derived) {
            if let VarSource::Comparison { var: source, op, value } = &var.source {
                let lhs = numeric.get(source).copied().unwrap_or(0.0);
                bits[var.index as usize] = op.apply(lhs, *value);
            }
        }

        Ok(Self {
            bits,
            numeric,
            selected,
        })
    }

    /// Values indexed by variable index
    pub fn bits(&self) -> &[bool] {
        &self.bits
    }

    pub fn value(&self, index: u32) -> bool {
        self.bits.get(index as usize).copied().unwrap_or(false)
    }

    pub fn set(&mut self, index: u32, value: bool) {
        let index = index as usize;
        if index >= self.bits.len() {
            self.bits.resize(index + 1, false);
        }
        self.bits[index] = value;
    }

    pub fn numeric(&self, name: &str) -> Option<f64> {
        self.numeric.get(name).copied()
    }

    pub fn selected(&self) -> &BTreeSet<String> {
        &self.selected
    }

    /// Copy with one variable flipped
    pub fn with(&self, index: u32, value: bool) -> Assignment {
        let mut copy = self.clone();
        copy.set(index, value);
        copy
    }

    /// Fixed values for every non-option variable plus the given option values
    ///
    /// Used for satisfiability queries where unselected options stay free.
    pub fn partial(&self, registry: &VariableRegistry) -> HashMap<u32, bool> {
        let mut fixed = HashMap::new();
        for var in registry.all_variables() {
            match var.role {
                Some(VarRole::Option) => {
                    if self.value(var.index) {
                        fixed.insert(var.index, true);
                    }
                }
                Some(VarRole::Customer) | Some(VarRole::Derived) => {
                    fixed.insert(var.index, self.value(var.index));
                }
                _ => {}
            }
        }
        fixed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::CmpOp;
    use crate::model::{Group, ModelOption};
    use crate::registry::{derived_var, VarType};

    fn setup() -> (Model, VariableRegistry) {
        let model = Model::builder("m", "M")
            .group(Group::multi("g", "G", 0, 5))
            .option(ModelOption::new("a", "A", "g", 10.0))
            .option(ModelOption::new("b", "B", "g", 5.0))
            .option(ModelOption::new("old", "Old", "g", 7.0).inactive())
            .build()
            .unwrap();
        let mut registry = VariableRegistry::new();
        registry.declare_option("a").unwrap();
        registry.declare_option("b").unwrap();
        registry.declare_option("old").unwrap();
        registry
            .declare(PRICE_QUANTITY, VarType::Integer, VarSource::Pricing("quantity".into()))
            .unwrap();
        registry
            .declare(
                &derived_var(PRICE_QUANTITY, CmpOp::Ge, 3.0),
                VarType::Boolean,
                VarSource::Comparison {
                    var: PRICE_QUANTITY.into(),
                    op: CmpOp::Ge,
                    value: 3.0,
                },
            )
            .unwrap();
        (model, registry)
    }

    #[test]
    fn test_selected_options_and_derived_values() {
        let (model, registry) = setup();
        let assignment = Assignment::build(
            &registry,
            &model,
            &[Selection::new("a", 2), Selection::one("b")],
            None,
        )
        .unwrap();
        assert!(assignment.value(registry.index_of("opt_a").unwrap()));
        assert_eq!(assignment.numeric(PRICE_TOTAL), Some(25.0));
        assert_eq!(assignment.numeric("grp_g_qty"), Some(3.0));
        let derived = registry.index_of("drv_price_quantity_ge_3").unwrap();
        assert!(assignment.value(derived));
    }

    #[test]
    fn test_zero_quantity_not_selected() {
        let (model, registry) = setup();
        let assignment =
            Assignment::build(&registry, &model, &[Selection::new("a", 0)], None).unwrap();
        assert!(!assignment.value(registry.index_of("opt_a").unwrap()));
        assert!(assignment.selected().is_empty());
    }

    #[test]
    fn test_inactive_option_excluded_from_counts() {
        let (model, registry) = setup();
        let assignment = Assignment::build(
            &registry,
            &model,
            &[Selection::one("a"), Selection::new("old", 5)],
            None,
        )
        .unwrap();
        assert!(!assignment.value(registry.index_of("opt_old").unwrap()));
        assert_eq!(assignment.numeric(PRICE_QUANTITY), Some(1.0));
        assert_eq!(assignment.numeric(PRICE_TOTAL), Some(10.0));
        assert_eq!(assignment.numeric("grp_g_qty"), Some(1.0));
        let derived = registry.index_of("drv_price_quantity_ge_3").unwrap();
        assert!(!assignment.value(derived));
    }

    #[test]
    fn test_unknown_option_rejected() {
        let (model, registry) = setup();
        let err = Assignment::build(&registry, &model, &[Selection::one("zzz")], None).unwrap_err();
        assert!(matches!(err, Error::UnknownOption(id) if id == "zzz"));
    }
}

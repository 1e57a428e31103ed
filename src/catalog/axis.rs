//! Axis Expansion
//!
//! Up to three independent axes (`x`, `y`, `z`), each with up to three
//! sub-variables (`x1`, `x2`, `x3`, ...), are cross-multiplied to enumerate
//! targets. Within one axis the sub-variables are zipped positionally.
//!
//! An axis is as long as its longest sub-list. Shorter sub-lists are padded
//! with empty strings, so `x1 = "a,b"` with `x2 = "c"` yields the pairs
//! `(a, c)` and `(b, "")`.

use serde_json::Value;

use crate::cartesian::Cartesian;
use crate::template::Bindings;

/// Axis names in expansion order (outermost first)
pub const AXES: [char; 3] = ['x', 'y', 'z'];

/// Sub-variable slots per axis
pub const SLOTS: usize = 3;

/// Split a comma-separated configuration value into trimmed items
///
/// A missing or empty value yields a single empty item, so the axis still
/// contributes one iteration.
pub fn parse_variable(value: Option<&str>) -> Vec<String> {
    match value {
        Some(v) if !v.trim().is_empty() => v.split(',').map(|s| s.trim().to_string()).collect(),
        _ => vec![String::new()],
    }
}

/// The sub-variable lists of one axis
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisVariableSet {
    slots: Vec<Vec<String>>,
}

impl AxisVariableSet {
    /// Build from raw configuration values, one per slot
    pub fn from_config(values: [Option<&str>; SLOTS]) -> Self {
        Self {
            slots: values.iter().map(|v| parse_variable(*v)).collect(),
        }
    }

    /// Build from already-split lists
    pub fn new(slots: Vec<Vec<String>>) -> Self {
        Self { slots }
    }

    /// Effective length: the longest sub-list, at least one
    pub fn len(&self) -> usize {
        self.slots.iter().map(Vec::len).max().unwrap_or(0).max(1)
    }

    /// An axis always yields at least one iteration
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Values of every slot at one position, padding short slots with ""
    pub fn row(&self, index: usize) -> [String; SLOTS] {
        std::array::from_fn(|slot| {
            self.slots
                .get(slot)
                .and_then(|values| values.get(index))
                .cloned()
                .unwrap_or_default()
        })
    }
}

/// One positional assignment of every axis sub-variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisCombination {
    values: [[String; SLOTS]; 3],
}

impl AxisCombination {
    /// Value bound to e.g. `('y', 2)` → `y2`
    pub fn get(&self, axis: char, slot: usize) -> Option<&str> {
        let a = AXES.iter().position(|c| *c == axis)?;
        self.values[a].get(slot.checked_sub(1)?).map(String::as_str)
    }

    /// Write `x1..z3` into a binding map
    pub fn bind(&self, bindings: &mut Bindings) {
        for (axis, row) in AXES.iter().zip(&self.values) {
            for (slot, value) in row.iter().enumerate() {
                bindings.insert(format!("{}{}", axis, slot + 1), Value::String(value.clone()));
            }
        }
    }
}

/// Expands three axes into their cross product
#[derive(Debug, Clone)]
pub struct AxisExpander {
    axes: [AxisVariableSet; 3],
    positions: Cartesian<usize>,
}

impl AxisExpander {
    /// Create an expander over the `x`, `y` and `z` axes
    pub fn new(axes: [AxisVariableSet; 3]) -> Self {
        let positions = Cartesian::new(
            axes.iter()
                .map(|axis| (0..axis.len()).collect())
                .collect(),
        );
        Self { axes, positions }
    }

    /// Number of combinations the expansion yields
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Never empty: every axis contributes at least one iteration
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Enumerate combinations, `x` outermost and `z` innermost
    pub fn expand(&self) -> impl Iterator<Item = AxisCombination> + '_ {
        self.positions.iter().map(move |indices| AxisCombination {
            values: std::array::from_fn(|a| self.axes[a].row(indices[a])),
        })
    }
}

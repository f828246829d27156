//! Breakpoint-related types

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// A line breakpoint, identified by `(script_id, line)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub script_id: String,
    pub line: u32,
    /// Expression that must be truthy for the breakpoint to trigger
    pub condition: Option<String>,
    pub enabled: bool,
    pub hit_count: u64,
}

impl Breakpoint {
    pub fn new(script_id: impl Into<String>, line: u32, condition: Option<String>) -> Self {
        Self {
            script_id: script_id.into(),
            line,
            condition,
            enabled: true,
            hit_count: 0,
        }
    }
}

/// Breakpoints grouped by script, at most one per line
#[derive(Debug, Default)]
pub(crate) struct BreakpointTable {
    by_script: HashMap<String, BTreeMap<u32, Breakpoint>>,
}

impl BreakpointTable {
    /// Insert or replace; returns true if no breakpoint existed at that line
    pub fn insert(&mut self, breakpoint: Breakpoint) -> bool {
        self.by_script
            .entry(breakpoint.script_id.clone())
            .or_default()
            .insert(breakpoint.line, breakpoint)
            .is_none()
    }

    pub fn remove(&mut self, script_id: &str, line: u32) -> Option<Breakpoint> {
        let lines = self.by_script.get_mut(script_id)?;
        let removed = lines.remove(&line);
        if lines.is_empty() {
            self.by_script.remove(script_id);
        }
        removed
    }

    pub fn clear_script(&mut self, script_id: &str) -> Vec<Breakpoint> {
        self.by_script
            .remove(script_id)
            .map(|lines| lines.into_values().collect())
            .unwrap_or_default()
    }

    pub fn clear(&mut self) -> Vec<Breakpoint> {
        self.by_script
            .drain()
            .flat_map(|(_, lines)| lines.into_values())
            .collect()
    }

    pub fn get(&self, script_id: &str, line: u32) -> Option<&Breakpoint> {
        self.by_script.get(script_id)?.get(&line)
    }

    pub fn get_mut(&mut self, script_id: &str, line: u32) -> Option<&mut Breakpoint> {
        self.by_script.get_mut(script_id)?.get_mut(&line)
    }

    pub fn for_script(&self, script_id: &str) -> Vec<Breakpoint> {
        self.by_script
            .get(script_id)
            .map(|lines| lines.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn all(&self) -> Vec<Breakpoint> {
        let mut all: Vec<Breakpoint> = self
            .by_script
            .values()
            .flat_map(|lines| lines.values().cloned())
            .collect();
        all.sort_by(|a, b| a.script_id.cmp(&b.script_id).then(a.line.cmp(&b.line)));
        all
    }

    pub fn len(&self) -> usize {
        self.by_script.values().map(BTreeMap::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_breakpoint_per_line() {
        let mut table = BreakpointTable::default();
        assert!(table.insert(Breakpoint::new("a", 5, None)));
        assert!(!table.insert(Breakpoint::new("a", 5, Some("x > 1".to_string()))));
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.get("a", 5).and_then(|bp| bp.condition.as_deref()),
            Some("x > 1")
        );
    }

    #[test]
    fn test_remove_and_clear() {
        let mut table = BreakpointTable::default();
        table.insert(Breakpoint::new("a", 1, None));
        table.insert(Breakpoint::new("a", 2, None));
        table.insert(Breakpoint::new("b", 1, None));

        assert!(table.remove("a", 1).is_some());
        assert!(table.remove("a", 1).is_none());
        assert_eq!(table.clear_script("a").len(), 1);
        assert!(table.for_script("a").is_empty());
        assert_eq!(table.clear().len(), 1);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_all_is_sorted() {
        let mut table = BreakpointTable::default();
        table.insert(Breakpoint::new("b", 3, None));
        table.insert(Breakpoint::new("a", 9, None));
        table.insert(Breakpoint::new("a", 2, None));

        let lines: Vec<_> = table
            .all()
            .into_iter()
            .map(|bp| (bp.script_id, bp.line))
            .collect();
        assert_eq!(
            lines,
            vec![("a".to_string(), 2), ("a".to_string(), 9), ("b".to_string(), 3)]
        );
    }
}

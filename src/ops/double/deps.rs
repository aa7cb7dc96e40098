//! Dependency edges and the graph queries built on them.

use super::state::DoubleState;
use crate::error::{OpsError, Result};
use crate::model::{Dependency, DependencyType};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashSet};

impl DoubleState {
    pub fn add_dependency(
        &mut self,
        issue: &str,
        depends_on: &str,
        dep_type: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let dep_type: DependencyType = dep_type.parse()?;
        if issue == depends_on {
            return Err(OpsError::bad_argument(
                "dependency",
                format!("{issue} cannot depend on itself"),
            ));
        }
        self.issue(issue)?;
        self.issue(depends_on)?;
        if dep_type.is_blocking() && self.reaches_via_blocks(depends_on, issue) {
            return Err(OpsError::bad_argument(
                "dependency",
                format!("{issue} -> {depends_on} would create a cycle"),
            ));
        }

        self.insert_edge(Dependency {
            issue_id: issue.to_string(),
            depends_on_id: depends_on.to_string(),
            dep_type,
            created_at: now,
        })?;
        self.mutate(issue, |i| {
            i.updated_at = now;
            Ok(())
        })
    }

    pub fn remove_dependency(&mut self, issue: &str, depends_on: &str) -> Result<()> {
        self.issue(issue)?;
        if self.remove_edge(issue, depends_on)? {
            Ok(())
        } else {
            Err(OpsError::not_found(format!(
                "dependency {issue} -> {depends_on}"
            )))
        }
    }

    /// Whether `from` reaches `to` following `blocks` edges.
    fn reaches_via_blocks(&self, from: &str, to: &str) -> bool {
        let mut stack = vec![from.to_string()];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if !seen.insert(current.clone()) {
                continue;
            }
            for dep in self.outgoing(&current) {
                if dep.dep_type.is_blocking() {
                    stack.push(dep.depends_on_id.clone());
                }
            }
        }
        false
    }

    /// Group `members` into waves: topological levels over the `blocks`
    /// edges between them. Members left over form the cycle.
    pub fn waves(&self, members: &[String]) -> (Vec<Vec<String>>, Vec<String>) {
        let member_set: BTreeSet<&str> = members.iter().map(String::as_str).collect();
        let mut pending: BTreeMap<&str, BTreeSet<String>> = members
            .iter()
            .map(|id| {
                let deps = self
                    .outgoing(id)
                    .into_iter()
                    .filter(|d| d.dep_type.is_blocking())
                    .map(|d| d.depends_on_id.clone())
                    .filter(|target| member_set.contains(target.as_str()))
                    .collect();
                (id.as_str(), deps)
            })
            .collect();

        let mut waves = Vec::new();
        loop {
            let wave: Vec<String> = pending
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(id, _)| (*id).to_string())
                .collect();
            if wave.is_empty() {
                break;
            }
            for id in &wave {
                pending.remove(id.as_str());
            }
            for deps in pending.values_mut() {
                for id in &wave {
                    deps.remove(id);
                }
            }
            waves.push(wave);
        }
        let stuck = pending.keys().map(|id| (*id).to_string()).collect();
        (waves, stuck)
    }
}

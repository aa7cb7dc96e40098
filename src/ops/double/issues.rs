//! Issue CRUD and listing for the in-memory double.

use super::state::{DoubleState, Record};
use crate::error::{OpsError, Result};
use crate::model::{Issue, Status, id_prefix};
use crate::ops::{
    CloseOptions, CreateOptions, DeleteOptions, ListOptions, SearchOptions, UpdateOptions,
};
use crate::util::{check_explicit_prefix, validate_id};
use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};
use tracing::debug;

/// Upstream stores `pinned` as `hooked`.
pub(super) fn normalize_status(status: Status) -> Status {
    match status {
        Status::Pinned => Status::Hooked,
        other => other,
    }
}

fn take_limit<T>(items: Vec<T>, limit: usize) -> Vec<T> {
    if limit == 0 {
        items
    } else {
        items.into_iter().take(limit).collect()
    }
}

impl DoubleState {
    pub fn create(
        &mut self,
        explicit_id: Option<&str>,
        opts: &CreateOptions,
        actor: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Issue> {
        let priority = opts.validate()?;
        if let Some(parent) = opts.parent.as_deref() {
            self.issue(parent)?;
        }
        let creator = opts.actor.as_deref().or(actor);

        let db = match explicit_id {
            Some(id) => {
                validate_id(id)?;
                check_explicit_prefix(id, opts.prefix.as_deref())?;
                let db = self.current_db_mut()?;
                if id_prefix(id) != db.prefix {
                    return Err(OpsError::routing(
                        id,
                        format!("prefix does not match database '{}'", db.prefix),
                    ));
                }
                if db.records.contains_key(id) {
                    return Err(OpsError::bad_argument("id", format!("{id} already exists")));
                }
                db
            }
            None => match (opts.parent.as_deref(), opts.prefix.as_deref()) {
                (Some(parent), _) => self.db_for_id_mut(parent)?,
                (None, Some(prefix)) => self.db_named_mut(prefix)?,
                (None, None) => self.current_db_mut()?,
            },
        };

        let id = match (explicit_id, opts.parent.as_deref()) {
            (Some(id), _) => id.to_string(),
            (None, Some(parent)) => db.next_child_id(parent),
            (None, None) => db.generate_id(&opts.title, creator, now),
        };

        let mut issue = Issue::new(&id, opts.title.trim(), now);
        issue.description = opts.description.clone().unwrap_or_default();
        if let Some(issue_type) = &opts.issue_type {
            issue.issue_type.clone_from(issue_type);
        }
        issue.priority = priority.unwrap_or_default();
        issue.parent.clone_from(&opts.parent);
        issue.assignee = opts.assignee.clone().filter(|a| !a.is_empty());
        issue.created_by = creator.map(str::to_string);
        issue.set_labels(&opts.labels);
        issue.ephemeral = opts.ephemeral;
        issue.role_type.clone_from(&opts.role_type);

        db.record_write();
        let prefix = db.prefix.clone();
        let seq = self.next_seq();
        let db = self.db_named_mut(&prefix)?;
        db.records.insert(
            id.clone(),
            Record {
                issue: issue.clone(),
                seq,
                tombstone: false,
            },
        );
        debug!(id = %id, db = %prefix, "Created issue");
        Ok(issue)
    }

    pub fn update(&mut self, id: &str, opts: &UpdateOptions, now: DateTime<Utc>) -> Result<()> {
        opts.validate()?;
        self.issue(id)?;
        if let Some(parent) = opts.parent.as_deref().filter(|p| !p.is_empty()) {
            if parent == id {
                return Err(OpsError::bad_argument("parent", "an issue cannot parent itself"));
            }
            self.issue(parent)?;
        }

        self.mutate(id, |issue| {
            if let Some(title) = &opts.title {
                issue.title = title.trim().to_string();
            }
            if let Some(description) = &opts.description {
                issue.description.clone_from(description);
            }
            if let Some(status) = &opts.status {
                issue.transition(normalize_status(status.parse()?), now);
            }
            if let Some(priority) = opts.priority {
                issue.priority = crate::model::Priority::new(priority)?;
            }
            if let Some(assignee) = &opts.assignee {
                issue.assignee = Some(assignee.clone()).filter(|a| !a.is_empty());
            }
            if let Some(parent) = &opts.parent {
                issue.parent = Some(parent.clone()).filter(|p| !p.is_empty());
            }
            if let Some(labels) = &opts.set_labels {
                issue.set_labels(labels);
            }
            for label in &opts.add_labels {
                issue.add_label(label);
            }
            for label in &opts.remove_labels {
                issue.remove_label(label);
            }
            issue.updated_at = now;
            Ok(())
        })
    }

    pub fn close(
        &mut self,
        ids: &[&str],
        opts: &CloseOptions,
        session: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        for id in ids {
            self.issue(id)?;
        }

        let session = opts.session.as_deref().or(session);
        for id in ids {
            self.mutate(id, |issue| {
                if issue.status.is_closed() {
                    return Ok(());
                }
                issue.transition(Status::Closed, now);
                issue.close_reason.clone_from(&opts.reason);
                issue.closed_by_session = session.map(str::to_string);
                Ok(())
            })?;
        }
        Ok(())
    }

    pub fn reopen(&mut self, id: &str, now: DateTime<Utc>) -> Result<()> {
        self.mutate(id, |issue| {
            if issue.status != Status::Open {
                issue.transition(Status::Open, now);
            }
            Ok(())
        })
    }

    pub fn release(&mut self, id: &str, now: DateTime<Utc>) -> Result<()> {
        self.mutate(id, |issue| {
            issue.transition(Status::Open, now);
            issue.assignee = None;
            Ok(())
        })
    }

    pub fn delete(&mut self, ids: &[&str], opts: &DeleteOptions) -> Result<Vec<String>> {
        let mut doomed: Vec<String> = Vec::new();
        for id in ids {
            self.issue(id)?;
            if !doomed.iter().any(|d| d == id) {
                doomed.push((*id).to_string());
            }
        }

        if opts.cascade {
            let mut queue: VecDeque<String> = doomed.iter().cloned().collect();
            let mut seen: HashSet<String> = doomed.iter().cloned().collect();
            while let Some(id) = queue.pop_front() {
                for dep in self.incoming(&id) {
                    if seen.insert(dep.issue_id.clone()) {
                        doomed.push(dep.issue_id.clone());
                        queue.push_back(dep.issue_id.clone());
                    }
                }
            }
        } else if !opts.force {
            for id in &doomed {
                let outside: Vec<String> = self
                    .incoming(id)
                    .into_iter()
                    .map(|d| d.issue_id.clone())
                    .filter(|source| !doomed.contains(source))
                    .collect();
                if !outside.is_empty() {
                    return Err(OpsError::bad_argument(
                        "force",
                        format!("{id} has dependents: {}", outside.join(", ")),
                    ));
                }
            }
        }

        for id in &doomed {
            self.detach(id)?;
            let db = self.db_for_id_mut(id)?;
            if opts.hard {
                db.records.remove(id);
                db.comments.remove(id);
                db.cursors.remove(id);
            } else if let Some(record) = db.records.get_mut(id) {
                record.tombstone = true;
            }
            db.record_write();
        }
        debug!(ids = ?doomed, hard = opts.hard, "Deleted issues");
        Ok(doomed)
    }

    pub fn show(&self, id: &str) -> Result<Issue> {
        let issue = self.issue(id)?;
        Ok(self.project_show(issue))
    }

    pub fn show_multiple(&self, ids: &[&str]) -> Vec<Issue> {
        ids.iter()
            .filter_map(|id| self.issue(id).ok())
            .map(|issue| self.project_show(issue))
            .collect()
    }

    pub fn list(&self, opts: &ListOptions) -> Result<Vec<Issue>> {
        let db = self.current_db()?;
        let issues = db
            .live_records()
            .into_iter()
            .map(|r| &r.issue)
            .filter(|i| opts.status.matches(&i.status))
            .filter(|i| opts.issue_type.as_ref().is_none_or(|t| &i.issue_type == t))
            .filter(|i| opts.label.as_ref().is_none_or(|l| i.has_label(l)))
            .filter(|i| opts.assignee.as_ref().is_none_or(|a| i.assignee.as_ref() == Some(a)))
            .filter(|i| opts.parent.as_ref().is_none_or(|p| i.parent.as_ref() == Some(p)))
            .map(|i| self.project_counts(i))
            .collect();
        Ok(take_limit(issues, opts.limit))
    }

    /// Ready issues, highest priority value first, then oldest.
    pub fn ready(&self, label: Option<&str>, limit: usize) -> Result<Vec<Issue>> {
        let db = self.current_db()?;
        let mut records: Vec<&Record> = db
            .records
            .values()
            .filter(|r| !r.tombstone && self.is_ready(&r.issue))
            .filter(|r| label.is_none_or(|l| r.issue.has_label(l)))
            .collect();
        sort_by_priority(&mut records);
        let issues = records
            .into_iter()
            .map(|r| self.project_counts(&r.issue))
            .collect();
        Ok(take_limit(issues, limit))
    }

    pub fn blocked(&self) -> Result<Vec<Issue>> {
        let db = self.current_db()?;
        let mut records: Vec<&Record> = db
            .records
            .values()
            .filter(|r| !r.tombstone && self.is_blocked(&r.issue))
            .collect();
        sort_by_priority(&mut records);
        Ok(records
            .into_iter()
            .map(|r| self.project_blocked(&r.issue))
            .collect())
    }

    pub fn search(&self, query: &str, opts: &SearchOptions) -> Result<Vec<Issue>> {
        let db = self.current_db()?;
        let needle = query.to_lowercase();
        let issues = db
            .live_records()
            .into_iter()
            .map(|r| &r.issue)
            .filter(|i| {
                i.title.to_lowercase().contains(&needle)
                    || i.description.to_lowercase().contains(&needle)
            })
            .filter(|i| opts.status.as_ref().is_none_or(|s| s.matches(&i.status)))
            .filter(|i| opts.issue_type.as_ref().is_none_or(|t| &i.issue_type == t))
            .map(|i| self.project_counts(i))
            .collect();
        Ok(take_limit(issues, opts.limit))
    }
}

fn sort_by_priority(records: &mut [&Record]) {
    records.sort_by(|a, b| {
        b.issue
            .priority
            .cmp(&a.issue.priority)
            .then(a.issue.created_at.cmp(&b.issue.created_at))
            .then(a.seq.cmp(&b.seq))
    });
}

//! Ordering and structure rules for a document's section tree.
//!
//! Every function here is a planner: it reads the current sections of one document and
//! returns the position changes a store must write so that siblings stay numbered
//! 1..N and no section becomes its own ancestor. Stores apply a plan inside the same
//! unit of work that read the sections.

use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::db::store::{SectionMove, SectionRow, StoreError};
use crate::models::SectionNode;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("Section {0} not found")]
    SectionNotFound(i64),
    #[error("Parent section {0} not found in this document")]
    ParentNotFound(i64),
    #[error("Cannot make a section its own parent")]
    OwnParent,
    #[error("Cannot make a section a child of its descendant")]
    Cycle,
}

impl From<TreeError> for StoreError {
    fn from(e: TreeError) -> Self {
        match e {
            TreeError::SectionNotFound(id) => StoreError::NotFound(format!("Section {}", id)),
            other => StoreError::Rejected(other.to_string()),
        }
    }
}

/// New placement of one section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionChange {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub position: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovePlan {
    pub parent_id: Option<i64>,
    pub position: i32,
    pub changes: Vec<PositionChange>,
}

fn find(sections: &[SectionRow], id: i64) -> Result<&SectionRow, TreeError> {
    sections
        .iter()
        .find(|s| s.id == id)
        .ok_or(TreeError::SectionNotFound(id))
}

/// Siblings under `parent_id` in render order, leaving out `excluding`
fn siblings(sections: &[SectionRow], parent_id: Option<i64>, excluding: Option<i64>) -> Vec<&SectionRow> {
    let mut sibs: Vec<&SectionRow> = sections
        .iter()
        .filter(|s| s.parent_id == parent_id && Some(s.id) != excluding)
        .collect();
    sibs.sort_by_key(|s| (s.position, s.id));
    sibs
}

fn clamp_position(requested: Option<i32>, len: usize) -> i32 {
    let last = len as i32 + 1;
    requested.unwrap_or(last).clamp(1, last)
}

/// Renumber `ordered` as 1..N, reporting only rows whose placement changes
fn renumber(ordered: &[(i64, Option<i64>, i32)], parent_id: Option<i64>) -> Vec<PositionChange> {
    ordered
        .iter()
        .enumerate()
        .filter_map(|(i, (id, old_parent, old_position))| {
            let position = i as i32 + 1;
            if *old_position == position && *old_parent == parent_id {
                None
            } else {
                Some(PositionChange { id: *id, parent_id, position })
            }
        })
        .collect()
}

fn placements(sibs: &[&SectionRow]) -> Vec<(i64, Option<i64>, i32)> {
    sibs.iter().map(|s| (s.id, s.parent_id, s.position)).collect()
}

/// Position for a new section plus the shifts of the siblings after it
pub fn plan_insert(sections: &[SectionRow], parent_id: Option<i64>, position: Option<i32>) -> Result<(i32, Vec<PositionChange>), TreeError> {
    if let Some(parent) = parent_id {
        find(sections, parent).map_err(|_| TreeError::ParentNotFound(parent))?;
    }
    let sibs = siblings(sections, parent_id, None);
    let position = clamp_position(position, sibs.len());

    let mut ordered = placements(&sibs);
    // Placeholder for the section being inserted, it has no id yet
    ordered.insert(position as usize - 1, (0, parent_id, position));
    let changes = renumber(&ordered, parent_id)
        .into_iter()
        .filter(|c| c.id != 0)
        .collect();
    Ok((position, changes))
}

/// Move a section to `new_position` among its current siblings
pub fn plan_reorder(sections: &[SectionRow], section_id: i64, new_position: i32) -> Result<Vec<PositionChange>, TreeError> {
    let section = find(sections, section_id)?;
    let sibs = siblings(sections, section.parent_id, Some(section_id));
    let position = clamp_position(Some(new_position), sibs.len());

    let mut ordered = placements(&sibs);
    ordered.insert(position as usize - 1, (section.id, section.parent_id, section.position));
    Ok(renumber(&ordered, section.parent_id))
}

/// Ids of `section_id` and all its descendants
pub fn subtree(sections: &[SectionRow], section_id: i64) -> Vec<i64> {
    let mut children: HashMap<i64, Vec<i64>> = HashMap::new();
    for s in sections {
        if let Some(parent) = s.parent_id {
            children.entry(parent).or_default().push(s.id);
        }
    }

    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let mut stack = vec![section_id];
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        out.push(id);
        if let Some(kids) = children.get(&id) {
            stack.extend(kids.iter().copied());
        }
    }
    out
}

/// Sections removed by deleting `section_id` and the renumbering of its remaining siblings
pub fn plan_delete(sections: &[SectionRow], section_id: i64) -> Result<(Vec<i64>, Vec<PositionChange>), TreeError> {
    let section = find(sections, section_id)?;
    let removed = subtree(sections, section_id);
    let sibs = siblings(sections, section.parent_id, Some(section_id));
    Ok((removed, renumber(&placements(&sibs), section.parent_id)))
}

/// Whether `candidate` sits somewhere below `ancestor`
pub fn is_descendant(sections: &[SectionRow], candidate: i64, ancestor: i64) -> bool {
    let parents: HashMap<i64, Option<i64>> = sections.iter().map(|s| (s.id, s.parent_id)).collect();
    let mut current = parents.get(&candidate).copied().flatten();
    let mut steps = 0;
    while let Some(id) = current {
        if id == ancestor {
            return true;
        }
        steps += 1;
        if steps > sections.len() {
            // Corrupt data already contains a loop
            return true;
        }
        current = parents.get(&id).copied().flatten();
    }
    false
}

pub fn plan_move(sections: &[SectionRow], section_id: i64, target: &SectionMove) -> Result<MovePlan, TreeError> {
    let section = find(sections, section_id)?;
    let new_parent = target.parent_id.unwrap_or(section.parent_id);

    if new_parent == section.parent_id {
        let changes = match target.position {
            Some(position) => plan_reorder(sections, section_id, position)?,
            None => Vec::new(),
        };
        let position = changes
            .iter()
            .find(|c| c.id == section_id)
            .map_or(section.position, |c| c.position);
        return Ok(MovePlan { parent_id: new_parent, position, changes });
    }

    if let Some(parent) = new_parent {
        if parent == section_id {
            return Err(TreeError::OwnParent);
        }
        find(sections, parent).map_err(|_| TreeError::ParentNotFound(parent))?;
        if is_descendant(sections, parent, section_id) {
            return Err(TreeError::Cycle);
        }
    }

    let old_sibs = siblings(sections, section.parent_id, Some(section_id));
    let mut changes = renumber(&placements(&old_sibs), section.parent_id);

    let new_sibs = siblings(sections, new_parent, Some(section_id));
    let position = clamp_position(target.position, new_sibs.len());
    let mut ordered = placements(&new_sibs);
    ordered.insert(position as usize - 1, (section.id, section.parent_id, section.position));
    changes.extend(renumber(&ordered, new_parent));

    Ok(MovePlan { parent_id: new_parent, position, changes })
}

/// Nested view of a document's sections, ordered by position at every level
pub fn build_tree(sections: &[SectionRow]) -> Vec<SectionNode> {
    fn build(sections: &[SectionRow], parent_id: Option<i64>, depth: usize) -> Vec<SectionNode> {
        if depth > sections.len() {
            return Vec::new();
        }
        siblings(sections, parent_id, None)
            .into_iter()
            .map(|s| SectionNode {
                id: s.id,
                title: s.title.clone(),
                position: s.position,
                modified_at: s.modified_at,
                children: build(sections, Some(s.id), depth + 1),
            })
            .collect()
    }
    build(sections, None, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Utc;

    fn section(id: i64, parent_id: Option<i64>, position: i32) -> SectionRow {
        SectionRow {
            id,
            document_id: 1,
            parent_id,
            title: format!("Section {id}"),
            content: None,
            position,
            modified_at: Utc::now(),
        }
    }

    /// Apply a plan and return (id, parent, position) sorted by id
    fn apply(sections: &[SectionRow], changes: &[PositionChange]) -> Vec<(i64, Option<i64>, i32)> {
        let mut out: Vec<_> = sections
            .iter()
            .map(|s| {
                changes
                    .iter()
                    .find(|c| c.id == s.id)
                    .map_or((s.id, s.parent_id, s.position), |c| (c.id, c.parent_id, c.position))
            })
            .collect();
        out.sort();
        out
    }

    fn sample() -> Vec<SectionRow> {
        // 1, 2, 3 at the root; 4, 5 under 1; 6 under 4
        vec![
            section(1, None, 1),
            section(2, None, 2),
            section(3, None, 3),
            section(4, Some(1), 1),
            section(5, Some(1), 2),
            section(6, Some(4), 1),
        ]
    }

    #[test]
    fn insert_defaults_to_end() {
        let (position, changes) = plan_insert(&sample(), None, None).unwrap();
        assert_eq!(position, 4);
        assert!(changes.is_empty());
    }

    #[test]
    fn insert_in_the_middle_shifts_later_siblings() {
        let (position, changes) = plan_insert(&sample(), None, Some(2)).unwrap();
        assert_eq!(position, 2);
        assert_eq!(
            changes,
            vec![
                PositionChange { id: 2, parent_id: None, position: 3 },
                PositionChange { id: 3, parent_id: None, position: 4 },
            ]
        );
    }

    #[test]
    fn insert_clamps_out_of_range_positions() {
        let (position, _) = plan_insert(&sample(), Some(1), Some(99)).unwrap();
        assert_eq!(position, 3);
        let (position, changes) = plan_insert(&sample(), Some(1), Some(-4)).unwrap();
        assert_eq!(position, 1);
        assert_eq!(changes.len(), 2);
    }

    #[test]
    fn insert_under_unknown_parent_is_rejected() {
        assert_eq!(plan_insert(&sample(), Some(42), None), Err(TreeError::ParentNotFound(42)));
    }

    #[test]
    fn reorder_keeps_positions_dense() {
        let sections = sample();
        let changes = plan_reorder(&sections, 3, 1).unwrap();
        let result = apply(&sections, &changes);
        assert_eq!(&result[..3], &[(1, None, 2), (2, None, 3), (3, None, 1)]);
    }

    #[test]
    fn delete_removes_subtree_and_renumbers() {
        let sections = sample();
        let (mut removed, changes) = plan_delete(&sections, 1).unwrap();
        removed.sort();
        assert_eq!(removed, vec![1, 4, 5, 6]);
        assert_eq!(
            changes,
            vec![
                PositionChange { id: 2, parent_id: None, position: 1 },
                PositionChange { id: 3, parent_id: None, position: 2 },
            ]
        );
    }

    #[test]
    fn move_rejects_own_parent_and_descendants() {
        let sections = sample();
        let to_self = SectionMove { parent_id: Some(Some(1)), position: None };
        assert_matches!(plan_move(&sections, 1, &to_self), Err(TreeError::OwnParent));

        let to_grandchild = SectionMove { parent_id: Some(Some(6)), position: None };
        assert_matches!(plan_move(&sections, 1, &to_grandchild), Err(TreeError::Cycle));

        let to_child = SectionMove { parent_id: Some(Some(4)), position: None };
        assert_matches!(plan_move(&sections, 1, &to_child), Err(TreeError::Cycle));
    }

    #[test]
    fn move_to_new_parent_renumbers_both_sibling_sets() {
        let sections = sample();
        let target = SectionMove { parent_id: Some(Some(1)), position: Some(1) };
        let plan = plan_move(&sections, 2, &target).unwrap();
        assert_eq!(plan.parent_id, Some(1));
        assert_eq!(plan.position, 1);

        let result = apply(&sections, &plan.changes);
        assert_eq!(
            result,
            vec![
                (1, None, 1),
                (2, Some(1), 1),
                (3, None, 2),
                (4, Some(1), 2),
                (5, Some(1), 3),
                (6, Some(4), 1),
            ]
        );
    }

    #[test]
    fn move_to_root_appends_by_default() {
        let sections = sample();
        let target = SectionMove { parent_id: Some(None), position: None };
        let plan = plan_move(&sections, 6, &target).unwrap();
        assert_eq!(plan.parent_id, None);
        assert_eq!(plan.position, 4);
    }

    #[test]
    fn move_without_parent_change_only_reorders() {
        let sections = sample();
        let target = SectionMove { parent_id: None, position: Some(1) };
        let plan = plan_move(&sections, 5, &target).unwrap();
        assert_eq!(plan.parent_id, Some(1));
        assert_eq!(plan.position, 1);
        let result = apply(&sections, &plan.changes);
        assert_eq!(result[3], (4, Some(1), 2));
        assert_eq!(result[4], (5, Some(1), 1));
    }

    #[test]
    fn tree_is_nested_and_ordered() {
        let mut sections = sample();
        sections.swap(0, 2);
        let tree = build_tree(&sections);
        assert_eq!(tree.iter().map(|n| n.id).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(tree[0].children.iter().map(|n| n.id).collect::<Vec<_>>(), vec![4, 5]);
        assert_eq!(tree[0].children[0].children[0].id, 6);
    }
}

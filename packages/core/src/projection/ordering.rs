//! Sparse Sibling Ordering
//!
//! Sibling order is stored as integer positions with deliberate gaps. A new
//! sibling lands in the midpoint of the surrounding gap; only when a gap is
//! exhausted does the whole sibling list get renumbered back to uniform
//! spacing. Appends and gap inserts are O(1) row writes, renumbering is O(n)
//! in the sibling count.
//!
//! The functions here are pure: they look at an ordered sibling list and
//! decide positions. The projector applies the resulting row updates.

use crate::models::node::RelationAnchorPoint;
use crate::models::relation::HierarchyRelation;
use crate::projection::error::ProjectionError;

/// Spacing between consecutive siblings after an append or a renumbering.
pub const DEFAULT_POSITION_GAP: i64 = 128;

/// Outcome of a position assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionAssignment {
    /// The new sibling fits into an existing gap at this position.
    Direct(i64),
    /// The gap was exhausted: every existing sibling gets a new position and
    /// the new sibling takes `position`.
    Renumbered {
        updates: Vec<(RelationAnchorPoint, i64)>,
        position: i64,
    },
}

impl PositionAssignment {
    /// The position the new sibling ends up at.
    pub fn position(&self) -> i64 {
        match self {
            Self::Direct(position) => *position,
            Self::Renumbered { position, .. } => *position,
        }
    }
}

/// Compute the position for a new sibling among `siblings` (ordered by
/// position ascending), inserted before `succeeding` or at the end when
/// `succeeding` is `None`.
pub fn assign_position(
    siblings: &[HierarchyRelation],
    succeeding: Option<&RelationAnchorPoint>,
) -> Result<PositionAssignment, ProjectionError> {
    match succeeding {
        None => {
            let position = siblings
                .last()
                .map(|last| last.position + DEFAULT_POSITION_GAP)
                .unwrap_or(DEFAULT_POSITION_GAP);
            Ok(PositionAssignment::Direct(position))
        }
        Some(successor) => {
            let index = siblings
                .iter()
                .position(|r| &r.child_anchor == successor)
                .ok_or_else(|| {
                    ProjectionError::invalid_event(format!(
                        "Succeeding sibling {} is not a sibling here",
                        successor
                    ))
                })?;

            let upper = siblings[index].position;
            let lower = if index == 0 {
                0
            } else {
                siblings[index - 1].position
            };

            if upper - lower >= 2 {
                Ok(PositionAssignment::Direct(lower + (upper - lower) / 2))
            } else {
                Ok(renumber(siblings, Some(index)))
            }
        }
    }
}

/// Renumber all siblings to uniform spacing, slotting the new sibling in
/// front of the element at `before_index` (or at the end when `None`).
fn renumber(siblings: &[HierarchyRelation], before_index: Option<usize>) -> PositionAssignment {
    let mut updates = Vec::with_capacity(siblings.len());
    let mut next = DEFAULT_POSITION_GAP;
    let mut new_position = 0;

    for (index, sibling) in siblings.iter().enumerate() {
        if before_index == Some(index) {
            new_position = next;
            next += DEFAULT_POSITION_GAP;
        }
        updates.push((sibling.child_anchor.clone(), next));
        next += DEFAULT_POSITION_GAP;
    }
    if before_index.is_none() || before_index == Some(siblings.len()) {
        new_position = next;
    }

    PositionAssignment::Renumbered {
        updates,
        position: new_position,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::dimension::DimensionSpacePoint;
    use crate::models::stream::ContentStreamId;
    use crate::models::tags::SubtreeTags;

    fn siblings_at(positions: &[i64]) -> Vec<HierarchyRelation> {
        let stream = ContentStreamId::new();
        let hash = DimensionSpacePoint::empty().hash();
        let parent = RelationAnchorPoint::new();
        positions
            .iter()
            .map(|&position| HierarchyRelation {
                parent_anchor: parent.clone(),
                child_anchor: RelationAnchorPoint::new(),
                content_stream_id: stream.clone(),
                dimension_space_point_hash: hash.clone(),
                position,
                subtree_tags: SubtreeTags::new(),
                name: None,
            })
            .collect()
    }

    #[test]
    fn append_to_empty_list() {
        let assignment = assign_position(&[], None).unwrap();
        assert_eq!(assignment, PositionAssignment::Direct(DEFAULT_POSITION_GAP));
    }

    #[test]
    fn append_lands_one_gap_after_last() {
        let siblings = siblings_at(&[128, 256]);
        let assignment = assign_position(&siblings, None).unwrap();
        assert_eq!(assignment, PositionAssignment::Direct(384));
    }

    #[test]
    fn insert_takes_the_midpoint() {
        let siblings = siblings_at(&[128, 256]);
        let successor = siblings[1].child_anchor.clone();
        let assignment = assign_position(&siblings, Some(&successor)).unwrap();
        assert_eq!(assignment, PositionAssignment::Direct(192));
    }

    #[test]
    fn insert_before_first_uses_zero_floor() {
        let siblings = siblings_at(&[128]);
        let successor = siblings[0].child_anchor.clone();
        let assignment = assign_position(&siblings, Some(&successor)).unwrap();
        assert_eq!(assignment, PositionAssignment::Direct(64));
    }

    #[test]
    fn exhausted_gap_triggers_renumbering() {
        let siblings = siblings_at(&[128, 129]);
        let successor = siblings[1].child_anchor.clone();
        let assignment = assign_position(&siblings, Some(&successor)).unwrap();

        match assignment {
            PositionAssignment::Renumbered { updates, position } => {
                assert_eq!(updates.len(), 2);
                assert_eq!(updates[0].1, 128);
                assert_eq!(position, 256);
                assert_eq!(updates[1].1, 384);
            }
            other => panic!("expected renumbering, got {:?}", other),
        }
    }

    #[test]
    fn renumbering_preserves_relative_order() {
        let siblings = siblings_at(&[10, 11, 12, 13]);
        let successor = siblings[2].child_anchor.clone();
        let assignment = assign_position(&siblings, Some(&successor)).unwrap();

        match assignment {
            PositionAssignment::Renumbered { updates, position } => {
                // Existing siblings keep their order with uniform spacing.
                let positions: Vec<i64> = updates.iter().map(|(_, p)| *p).collect();
                assert_eq!(positions, vec![128, 256, 512, 640]);
                // New element sits between its predecessor and successor.
                assert_eq!(position, 384);
            }
            other => panic!("expected renumbering, got {:?}", other),
        }
    }

    #[test]
    fn unknown_successor_is_an_error() {
        let siblings = siblings_at(&[128]);
        let stranger = RelationAnchorPoint::new();
        assert!(assign_position(&siblings, Some(&stranger)).is_err());
    }

    #[test]
    fn midpoint_insertion_is_stable_under_repeats() {
        // Repeated inserts before the same successor keep bisecting the gap
        // until it is exhausted, then renumbering restores room.
        let mut siblings = siblings_at(&[128]);
        let successor = siblings[0].child_anchor.clone();
        let mut renumbered = false;

        for _ in 0..10 {
            match assign_position(&siblings, Some(&successor)).unwrap() {
                PositionAssignment::Direct(position) => {
                    let mut relation = siblings[0].clone();
                    relation.child_anchor = RelationAnchorPoint::new();
                    relation.position = position;
                    siblings.insert(0, relation);
                    siblings.sort_by_key(|r| r.position);
                }
                PositionAssignment::Renumbered { .. } => {
                    renumbered = true;
                    break;
                }
            }
        }
        assert!(renumbered);
    }
}

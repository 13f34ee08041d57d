use std::collections::HashSet;
use std::hash::Hash;

use crate::plane::Aabb;

/// Identifier of a collision shape registered with the trigger system. A
/// traveler may own several shapes; only its designated one is registered,
/// so overlap events for the rest never reach the portal logic.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeId(pub u32);

/// The three trigger zones a portal owns. The approach zones sit on either
/// side of the surface and decide the initial layer pair; the crossing zone
/// straddles the plane and gates the in-portal state.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PortalZone {
    ApproachFront,
    ApproachBack,
    Crossing,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TriggerKind {
    Enter,
    Exit,
}

/// An overlap transition on a trigger volume, tagged with the volume's
/// owner handle `V`. Volumes are constructed with their owner, so dispatch
/// never searches an object hierarchy.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TriggerEvent<V> {
    pub kind: TriggerKind,
    pub volume: V,
    pub shape: ShapeId,
}

/// Converts per-step AABB overlap state into enter/exit events.
///
/// Within one step, exit events are emitted before enter events: a shape
/// handed from one volume to another in a single step (a teleported
/// traveler leaving one crossing zone and landing in the other) must be
/// released before it is re-acquired.
#[derive(Debug)]
pub struct OverlapTracker<V> {
    active: HashSet<(V, ShapeId)>,
    scratch: HashSet<(V, ShapeId)>,
}

impl<V: Copy + Eq + Hash> Default for OverlapTracker<V> {
    fn default() -> Self {
        Self {
            active: HashSet::new(),
            scratch: HashSet::new(),
        }
    }
}

impl<V: Copy + Eq + Hash> OverlapTracker<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(
        &mut self,
        volumes: &[(V, Aabb)],
        shapes: &[(ShapeId, Aabb)],
        events: &mut Vec<TriggerEvent<V>>,
    ) {
        self.scratch.clear();
        for (volume, volume_bounds) in volumes {
            for (shape, shape_bounds) in shapes {
                if volume_bounds.intersects(shape_bounds) {
                    self.scratch.insert((*volume, *shape));
                }
            }
        }

        for (volume, shape) in self.active.iter() {
            if !self.scratch.contains(&(*volume, *shape)) {
                events.push(TriggerEvent {
                    kind: TriggerKind::Exit,
                    volume: *volume,
                    shape: *shape,
                });
            }
        }
        for (volume, shape) in self.scratch.iter() {
            if !self.active.contains(&(*volume, *shape)) {
                events.push(TriggerEvent {
                    kind: TriggerKind::Enter,
                    volume: *volume,
                    shape: *shape,
                });
            }
        }

        std::mem::swap(&mut self.active, &mut self.scratch);
    }

    /// Forgets a shape entirely, without emitting exit events. Used when a
    /// shape is destroyed.
    pub fn remove_shape(&mut self, shape: ShapeId) {
        self.active.retain(|(_, s)| *s != shape);
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use crate::plane::Aabb;

    use super::{OverlapTracker, PortalZone, ShapeId, TriggerEvent, TriggerKind};

    type Volume = (u8, PortalZone);

    fn unit_box(center: Vec3) -> Aabb {
        Aabb::from_center_half_extents(center, Vec3::splat(0.5))
    }

    #[test]
    fn enter_and_exit_fire_once_per_transition() {
        let mut tracker: OverlapTracker<Volume> = OverlapTracker::new();
        let volume = (0u8, PortalZone::Crossing);
        let shape = ShapeId(7);
        let mut events = Vec::new();

        tracker.step(&[(volume, unit_box(Vec3::ZERO))], &[(shape, unit_box(Vec3::ZERO))], &mut events);
        assert_eq!(
            events,
            vec![TriggerEvent {
                kind: TriggerKind::Enter,
                volume,
                shape,
            }]
        );

        // Still overlapping: no repeat.
        events.clear();
        tracker.step(&[(volume, unit_box(Vec3::ZERO))], &[(shape, unit_box(Vec3::ZERO))], &mut events);
        assert!(events.is_empty());

        events.clear();
        tracker.step(&[(volume, unit_box(Vec3::ZERO))], &[(shape, unit_box(Vec3::splat(10.0)))], &mut events);
        assert_eq!(
            events,
            vec![TriggerEvent {
                kind: TriggerKind::Exit,
                volume,
                shape,
            }]
        );
    }

    #[test]
    fn exits_are_emitted_before_enters() {
        let mut tracker: OverlapTracker<Volume> = OverlapTracker::new();
        let front = (0u8, PortalZone::Crossing);
        let back = (1u8, PortalZone::Crossing);
        let shape = ShapeId(1);
        let mut events = Vec::new();

        tracker.step(&[(front, unit_box(Vec3::ZERO))], &[(shape, unit_box(Vec3::ZERO))], &mut events);

        // Shape teleports from the front volume into the back one.
        events.clear();
        tracker.step(
            &[(front, unit_box(Vec3::ZERO)), (back, unit_box(Vec3::splat(20.0)))],
            &[(shape, unit_box(Vec3::splat(20.0)))],
            &mut events,
        );
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, TriggerKind::Exit);
        assert_eq!(events[0].volume, front);
        assert_eq!(events[1].kind, TriggerKind::Enter);
        assert_eq!(events[1].volume, back);
    }

    #[test]
    fn removed_shape_emits_no_exit() {
        let mut tracker: OverlapTracker<Volume> = OverlapTracker::new();
        let volume = (0u8, PortalZone::ApproachFront);
        let shape = ShapeId(3);
        let mut events = Vec::new();

        tracker.step(&[(volume, unit_box(Vec3::ZERO))], &[(shape, unit_box(Vec3::ZERO))], &mut events);
        tracker.remove_shape(shape);

        events.clear();
        tracker.step(&[(volume, unit_box(Vec3::ZERO))], &[], &mut events);
        assert!(events.is_empty());
    }
}

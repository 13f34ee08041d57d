//! Objects that can pass through a portal pair: state tracking, mesh
//! slicing, clone placement, and the collision-layer dance while an
//! object straddles the portal plane.

use glam::Vec3;
use riftgate_shared::layers::{LayerId, LayerSet};
use riftgate_shared::plane::{Aabb, Plane, Pose};
use riftgate_shared::slice::{self, Material, SliceParameters};
use riftgate_shared::trigger::ShapeId;
use rustc_hash::FxHashMap;

/// Stable handle for a traveler, unique within a `TravelerSet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TravelerId(pub u32);

/// Visual stand-in shown at the far portal while the real object is
/// mid-crossing. Shares the traveler's mesh, carries its own material
/// copies so the two can be sliced by different planes.
#[derive(Debug, Clone)]
pub struct TravelerClone {
    pub pose: Pose,
    pub active: bool,
    pub layer: LayerId,
    pub materials: Vec<Material>,
}

#[derive(Debug, Clone)]
pub struct Traveler {
    pub pose: Pose,
    pub velocity: Vec3,
    pub half_extents: Vec3,
    pub shape: ShapeId,
    layer: LayerId,
    materials: Vec<Material>,
    clone: TravelerClone,
    side_sign: f32,
    tracked: bool,
    in_portal: bool,
}

impl Traveler {
    pub fn new(pose: Pose, half_extents: Vec3, shape: ShapeId, layer: LayerId, materials: Vec<Material>) -> Self {
        let clone = TravelerClone {
            pose,
            active: false,
            layer,
            materials: materials.clone(),
        };
        Self {
            pose,
            velocity: Vec3::ZERO,
            half_extents,
            shape,
            layer,
            materials,
            clone,
            side_sign: 0.0,
            tracked: false,
            in_portal: false,
        }
    }

    pub fn layer(&self) -> LayerId {
        self.layer
    }

    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    pub fn clone_state(&self) -> &TravelerClone {
        &self.clone
    }

    pub fn is_tracked(&self) -> bool {
        self.tracked
    }

    pub fn is_in_portal(&self) -> bool {
        self.in_portal
    }

    pub fn side_sign(&self) -> f32 {
        self.side_sign
    }

    /// World-space bounds of the collision shape at the current pose.
    pub fn collision_bounds(&self) -> Aabb {
        Aabb::from_oriented_box(&self.pose, self.half_extents)
    }

    /// Entering a portal's approach zone. Idempotent while already
    /// tracked. Returns `true` when the caller should register this
    /// traveler with the portal.
    pub fn on_approach_portal_zone(
        &mut self,
        portal_plane: &Plane,
        traveler_layer: LayerId,
        clone_layer: LayerId,
    ) -> bool {
        if self.tracked {
            return false;
        }
        self.tracked = true;
        self.layer = traveler_layer;
        self.clone.layer = clone_layer;
        self.side_sign = portal_plane.side_of(self.pose.position);
        true
    }

    /// Leaving an approach zone. No-op while crossing; otherwise ends
    /// tracking, drops both bodies back to the *none* layer and returns
    /// `true` so the caller can unregister.
    pub fn on_leave_portal_zone(&mut self, layers: &LayerSet) -> bool {
        if !self.tracked || self.in_portal {
            return false;
        }
        self.tracked = false;
        self.clone.active = false;
        self.layer = layers.none;
        self.clone.layer = layers.none;
        true
    }

    /// The collision shape now overlaps the crossing volume: switch
    /// both bodies to the exclusive layers for their current sides and
    /// show the clone.
    pub fn on_enter_portal(&mut self, layers: &LayerSet) {
        if !self.tracked || self.in_portal {
            return;
        }
        self.in_portal = true;
        self.clone.active = true;
        if self.layer == layers.side_a {
            self.layer = layers.side_a_exclusive;
            self.clone.layer = layers.side_b_exclusive;
        } else {
            self.layer = layers.side_b_exclusive;
            self.clone.layer = layers.side_a_exclusive;
        }
    }

    /// The collision shape cleared the crossing volume: restore the
    /// regular side layers, hide the clone, stop slicing.
    pub fn on_exit_portal(&mut self, layers: &LayerSet) {
        if !self.in_portal {
            return;
        }
        self.in_portal = false;
        self.clone.active = false;
        if self.layer == layers.side_a_exclusive {
            self.layer = layers.side_a;
            self.clone.layer = layers.side_b;
        } else {
            self.layer = layers.side_b;
            self.clone.layer = layers.side_a;
        }
        slice::disable_slice(&mut self.materials);
        slice::disable_slice(&mut self.clone.materials);
    }

    /// True once the traveler's pivot has moved to the opposite side of
    /// the portal plane from where tracking started. Updates the cached
    /// side each call.
    pub fn has_crossed_portal(&mut self, portal_plane: &Plane) -> bool {
        let side = portal_plane.side_of(self.pose.position);
        let crossed = self.in_portal && side != self.side_sign && self.side_sign != 0.0;
        self.side_sign = side;
        crossed
    }

    /// Swap pose with the clone: the real object jumps to the far
    /// portal, the clone takes its former place. The traveler and clone
    /// exclusive layers swap along with the sides.
    pub fn teleport(&mut self, new_pose: Pose, new_velocity: Vec3, layers: &LayerSet) {
        self.clone.pose = self.pose;
        self.pose = new_pose;
        self.velocity = new_velocity;
        if self.layer == layers.side_a_exclusive {
            self.layer = layers.side_b_exclusive;
            self.clone.layer = layers.side_a_exclusive;
        } else {
            self.layer = layers.side_a_exclusive;
            self.clone.layer = layers.side_b_exclusive;
        }
        // The mapped pose keeps its local-space side, so the cached
        // side sign stays valid relative to the destination portal.
    }

    pub fn update_clone(&mut self, pose: Pose) {
        self.clone.pose = pose;
    }

    /// Write slice planes into the traveler's and clone's sliceable
    /// materials.
    pub fn update_slices(&mut self, traveler: SliceParameters, clone: SliceParameters) {
        slice::write_slice(&mut self.materials, traveler);
        slice::write_slice(&mut self.clone.materials, clone);
    }

    pub fn override_slice_offset(&mut self, offset: f32) {
        slice::override_slice_offset(&mut self.materials, offset);
    }

    pub fn override_clone_slice_offset(&mut self, offset: f32) {
        slice::override_slice_offset(&mut self.clone.materials, offset);
    }
}

/// All travelers in the scene, addressable by id and by collision
/// shape. Keeps a shape-bounds cache the trigger sweep reads; teleports
/// refresh their entry immediately so queries later in the same step
/// already see the new pose.
#[derive(Default)]
pub struct TravelerSet {
    travelers: FxHashMap<TravelerId, Traveler>,
    by_shape: FxHashMap<ShapeId, TravelerId>,
    shape_bounds: FxHashMap<ShapeId, Aabb>,
    next_id: u32,
}

impl TravelerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&mut self, traveler: Traveler) -> TravelerId {
        let id = TravelerId(self.next_id);
        self.next_id += 1;
        self.by_shape.insert(traveler.shape, id);
        self.shape_bounds.insert(traveler.shape, traveler.collision_bounds());
        self.travelers.insert(id, traveler);
        id
    }

    pub fn get(&self, id: TravelerId) -> Option<&Traveler> {
        self.travelers.get(&id)
    }

    pub fn get_mut(&mut self, id: TravelerId) -> Option<&mut Traveler> {
        self.travelers.get_mut(&id)
    }

    pub fn resolve_shape(&self, shape: ShapeId) -> Option<TravelerId> {
        self.by_shape.get(&shape).copied()
    }

    /// Refresh every cached shape bound from its traveler's pose. Run
    /// once per step after motion integration.
    pub fn sync_all_shapes(&mut self) {
        for traveler in self.travelers.values() {
            self.shape_bounds.insert(traveler.shape, traveler.collision_bounds());
        }
    }

    /// Refresh one traveler's cached shape bound, after a teleport.
    pub fn sync_shape(&mut self, id: TravelerId) {
        if let Some(traveler) = self.travelers.get(&id) {
            self.shape_bounds.insert(traveler.shape, traveler.collision_bounds());
        }
    }

    pub fn shape_bounds(&self) -> impl Iterator<Item = (ShapeId, Aabb)> + '_ {
        self.shape_bounds.iter().map(|(s, b)| (*s, *b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;
    use riftgate_shared::layers::LayerRegistry;

    fn test_layers() -> LayerSet {
        let mut registry = LayerRegistry::new();
        riftgate_shared::layers::register_portal_layers(&mut registry);
        LayerSet::resolve(&registry)
    }

    fn test_traveler() -> Traveler {
        let layers = test_layers();
        Traveler::new(
            Pose::new(Vec3::new(0.0, 0.0, 2.0), Quat::IDENTITY),
            Vec3::splat(0.5),
            ShapeId(7),
            layers.side_a,
            vec![Material::sliceable([1.0, 0.0, 0.0, 1.0])],
        )
    }

    #[test]
    fn approach_is_idempotent_while_tracked() {
        let layers = test_layers();
        let mut t = test_traveler();
        let plane = Plane::new(Vec3::ZERO, Vec3::Z);
        assert!(t.on_approach_portal_zone(&plane, layers.side_a, layers.side_b));
        assert!(!t.on_approach_portal_zone(&plane, layers.side_a, layers.side_b));
        assert_eq!(t.side_sign(), 1.0);
    }

    #[test]
    fn leave_is_ignored_while_crossing() {
        let layers = test_layers();
        let mut t = test_traveler();
        let plane = Plane::new(Vec3::ZERO, Vec3::Z);
        t.on_approach_portal_zone(&plane, layers.side_a, layers.side_b);
        t.on_enter_portal(&layers);
        assert!(!t.on_leave_portal_zone(&layers));
        assert!(t.is_tracked());
        t.on_exit_portal(&layers);
        assert!(t.on_leave_portal_zone(&layers));
        assert!(!t.is_tracked());
    }

    #[test]
    fn leaving_the_zone_drops_both_bodies_to_the_none_layer() {
        let layers = test_layers();
        let mut t = test_traveler();
        let plane = Plane::new(Vec3::ZERO, Vec3::Z);
        t.on_approach_portal_zone(&plane, layers.side_a, layers.side_b);
        assert_eq!(t.layer(), layers.side_a);
        assert!(t.on_leave_portal_zone(&layers));
        assert_eq!(t.layer(), layers.none);
        assert_eq!(t.clone_state().layer, layers.none);
    }

    #[test]
    fn crossing_swaps_to_exclusive_layers_and_shows_clone() {
        let layers = test_layers();
        let mut t = test_traveler();
        let plane = Plane::new(Vec3::ZERO, Vec3::Z);
        t.on_approach_portal_zone(&plane, layers.side_a, layers.side_b);
        assert!(!t.clone_state().active);
        t.on_enter_portal(&layers);
        assert!(t.clone_state().active);
        assert_eq!(t.layer(), layers.side_a_exclusive);
        assert_eq!(t.clone_state().layer, layers.side_b_exclusive);
    }

    #[test]
    fn exit_restores_side_layers_and_disables_slicing() {
        let layers = test_layers();
        let mut t = test_traveler();
        let plane = Plane::new(Vec3::ZERO, Vec3::Z);
        t.on_approach_portal_zone(&plane, layers.side_a, layers.side_b);
        t.on_enter_portal(&layers);
        t.update_slices(
            SliceParameters { center: Vec3::ZERO, normal: Vec3::Z, offset: 0.0 },
            SliceParameters { center: Vec3::ZERO, normal: Vec3::NEG_Z, offset: 0.0 },
        );
        t.on_exit_portal(&layers);
        assert_eq!(t.layer(), layers.side_a);
        assert!(!t.clone_state().active);
        assert!(t.materials()[0].slice.is_disabled());
        assert!(t.clone_state().materials[0].slice.is_disabled());
    }

    #[test]
    fn has_crossed_fires_once_on_sign_change() {
        let layers = test_layers();
        let mut t = test_traveler();
        let plane = Plane::new(Vec3::ZERO, Vec3::Z);
        t.on_approach_portal_zone(&plane, layers.side_a, layers.side_b);
        t.on_enter_portal(&layers);

        t.pose.position.z = 0.5;
        assert!(!t.has_crossed_portal(&plane));
        t.pose.position.z = -0.5;
        assert!(t.has_crossed_portal(&plane));
        // already on the new side, no second crossing
        assert!(!t.has_crossed_portal(&plane));
    }

    #[test]
    fn teleport_swaps_poses_and_exclusive_layers() {
        let layers = test_layers();
        let mut t = test_traveler();
        let plane = Plane::new(Vec3::ZERO, Vec3::Z);
        t.on_approach_portal_zone(&plane, layers.side_a, layers.side_b);
        t.on_enter_portal(&layers);

        let old_pose = t.pose;
        let target = Pose::new(Vec3::new(10.0, 0.0, -3.0), Quat::from_rotation_y(1.0));
        t.teleport(target, Vec3::new(0.0, 0.0, -1.0), &layers);

        assert_eq!(t.pose.position, target.position);
        assert_eq!(t.clone_state().pose.position, old_pose.position);
        assert_eq!(t.layer(), layers.side_b_exclusive);
        assert_eq!(t.clone_state().layer, layers.side_a_exclusive);
        assert!(t.is_in_portal());
    }

    #[test]
    fn shape_cache_resyncs_after_teleport() {
        let layers = test_layers();
        let mut set = TravelerSet::new();
        let mut traveler = test_traveler();
        let plane = Plane::new(Vec3::ZERO, Vec3::Z);
        traveler.on_approach_portal_zone(&plane, layers.side_a, layers.side_b);
        traveler.on_enter_portal(&layers);
        let id = set.spawn(traveler);

        let target = Pose::new(Vec3::new(10.0, 0.0, -3.0), Quat::IDENTITY);
        set.get_mut(id).unwrap().teleport(target, Vec3::ZERO, &layers);
        set.sync_shape(id);

        let (_, bounds) = set.shape_bounds().next().unwrap();
        assert!(bounds.contains_point(target.position));
    }
}

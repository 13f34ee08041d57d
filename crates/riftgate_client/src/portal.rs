//! The linked portal pair: render-camera placement, visibility gating,
//! oblique near-clip planes, screen thickness, traveler slicing and the
//! crossing handoff.

use glam::{Mat4, Vec2, Vec3, Vec4};
use riftgate_shared::layers::{LayerId, LayerSet};
use riftgate_shared::plane::{Aabb, FrustumPlanes, Plane, Pose, aabb_in_frustum, relative_pose};
use riftgate_shared::slice::SliceParameters;
use riftgate_shared::trigger::{PortalZone, TriggerEvent, TriggerKind};
use rustc_hash::FxHashSet;
use tracing::debug;

use crate::traveler::{TravelerId, TravelerSet};

/// Bias pushing the oblique near plane slightly past the portal surface.
pub const NEAR_CLIP_OFFSET: f32 = 0.05;
/// Below this camera-space plane distance the oblique projection turns
/// numerically unstable; fall back to the default projection instead.
pub const NEAR_CLIP_LIMIT: f32 = 0.05;
/// Extra slice depth so the cut sits just behind the visible surface.
pub const SLICE_OFFSET_BIAS: f32 = 0.001;

/// Slice offset large enough to keep a traveler entirely on one side of
/// any render camera's clip plane.
const SELF_CLIP_PUSH: f32 = 1000.0;

const CROSSING_HALF_DEPTH: f32 = 0.4;
const APPROACH_HALF_DEPTH: f32 = 1.2;
const APPROACH_MARGIN: f32 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PortalEnd {
    A,
    B,
}

impl PortalEnd {
    pub const BOTH: [PortalEnd; 2] = [PortalEnd::A, PortalEnd::B];

    pub fn index(self) -> usize {
        match self {
            PortalEnd::A => 0,
            PortalEnd::B => 1,
        }
    }

    pub fn other(self) -> PortalEnd {
        match self {
            PortalEnd::A => PortalEnd::B,
            PortalEnd::B => PortalEnd::A,
        }
    }
}

/// Trigger volume key: which portal end owns the volume, and which zone
/// it is. Volumes carry their owner, there is no scene-graph lookup.
pub type PortalVolume = (PortalEnd, PortalZone);

/// View-surface quad state. `depth` and `offset` are retuned every frame
/// so the player camera's near plane can never poke through the quad.
#[derive(Debug, Clone, Copy)]
pub struct ScreenSurface {
    pub half_extents: Vec2,
    pub depth: f32,
    pub offset: f32,
}

/// Per-portal scene configuration. The approach-zone layer pairs are
/// `(traveler_layer, clone_layer)`, chosen by whichever world side the
/// zone sits in.
#[derive(Debug, Clone, Copy)]
pub struct PortalConfig {
    pub pose: Pose,
    pub screen_half_extents: Vec2,
    pub approach_front_layers: (LayerId, LayerId),
    pub approach_back_layers: (LayerId, LayerId),
}

#[derive(Debug)]
pub struct Portal {
    pose: Pose,
    screen: ScreenSurface,
    approach_layers: [(LayerId, LayerId); 2],
    render_camera: Pose,
    tracked: FxHashSet<TravelerId>,
}

impl Portal {
    fn new(config: PortalConfig) -> Self {
        Self {
            pose: config.pose,
            screen: ScreenSurface {
                half_extents: config.screen_half_extents,
                depth: 0.1,
                offset: 0.0,
            },
            approach_layers: [config.approach_front_layers, config.approach_back_layers],
            render_camera: config.pose,
            tracked: FxHashSet::default(),
        }
    }

    pub fn pose(&self) -> &Pose {
        &self.pose
    }

    pub fn plane(&self) -> Plane {
        Plane::new(self.pose.position, self.pose.forward())
    }

    pub fn side_of_plane(&self, position: Vec3) -> f32 {
        self.plane().side_of(position)
    }

    pub fn screen(&self) -> &ScreenSurface {
        &self.screen
    }

    pub fn render_camera(&self) -> &Pose {
        &self.render_camera
    }

    pub fn tracked(&self) -> impl Iterator<Item = TravelerId> + '_ {
        self.tracked.iter().copied()
    }

    /// World bounds of the view-surface box, including the current
    /// anti-clip depth and offset.
    pub fn screen_bounds(&self) -> Aabb {
        let center = Pose::new(
            self.pose.position + self.pose.forward() * self.screen.offset,
            self.pose.rotation,
        );
        let half = Vec3::new(
            self.screen.half_extents.x,
            self.screen.half_extents.y,
            self.screen.depth * 0.5,
        );
        Aabb::from_oriented_box(&center, half)
    }

    fn update_screen_thickness(&mut self, viewer: Vec3, corner_dist: f32) {
        self.screen.depth = corner_dist;
        let toward = self.pose.position - viewer;
        let sign = if self.pose.forward().dot(toward) > 0.0 { 1.0 } else { -1.0 };
        self.screen.offset = corner_dist * sign * 0.5;
    }

    fn zone_bounds(&self, zone: PortalZone) -> Aabb {
        let hx = self.screen.half_extents.x + APPROACH_MARGIN;
        let hy = self.screen.half_extents.y + APPROACH_MARGIN;
        let forward = self.pose.forward();
        let (center, half) = match zone {
            PortalZone::Crossing => (
                self.pose.position,
                Vec3::new(hx, hy, CROSSING_HALF_DEPTH),
            ),
            PortalZone::ApproachFront => (
                self.pose.position + forward * APPROACH_HALF_DEPTH,
                Vec3::new(hx, hy, APPROACH_HALF_DEPTH),
            ),
            PortalZone::ApproachBack => (
                self.pose.position - forward * APPROACH_HALF_DEPTH,
                Vec3::new(hx, hy, APPROACH_HALF_DEPTH),
            ),
        };
        Aabb::from_oriented_box(&Pose::new(center, self.pose.rotation), half)
    }
}

/// Both ends of a linked portal. Linkage is symmetric by construction and
/// all cross-end access goes through this type, so neither end can be
/// left dangling.
pub struct PortalPair {
    portals: [Portal; 2],
    layers: LayerSet,
}

impl PortalPair {
    pub fn new(a: PortalConfig, b: PortalConfig, layers: LayerSet) -> Self {
        Self {
            portals: [Portal::new(a), Portal::new(b)],
            layers,
        }
    }

    pub fn portal(&self, end: PortalEnd) -> &Portal {
        &self.portals[end.index()]
    }

    /// All six trigger volumes, tagged with their owning end and zone.
    pub fn trigger_volumes(&self) -> Vec<(PortalVolume, Aabb)> {
        let mut volumes = Vec::with_capacity(6);
        for end in PortalEnd::BOTH {
            let portal = self.portal(end);
            for zone in [PortalZone::ApproachFront, PortalZone::ApproachBack, PortalZone::Crossing] {
                volumes.push(((end, zone), portal.zone_bounds(zone)));
            }
        }
        volumes
    }

    /// Whether rendering end's view is worthwhile: end's image appears on
    /// the *linked* surface, so the gate is the linked screen's bounds
    /// against the player frustum.
    pub fn is_visible_from(&self, end: PortalEnd, frustum: &FrustumPlanes) -> bool {
        let linked = self.portal(end.other());
        aabb_in_frustum(frustum, &linked.screen_bounds())
    }

    /// Ends whose views need rendering this frame. Invisible ends are
    /// skipped entirely, camera placement included.
    pub fn visible_ends(&self, frustum: &FrustumPlanes) -> Vec<PortalEnd> {
        PortalEnd::BOTH
            .into_iter()
            .filter(|end| self.is_visible_from(*end, frustum))
            .collect()
    }

    /// Moves end's render camera to the player's pose mirrored through
    /// the linked portal, so the rendered image lines up on the linked
    /// surface.
    pub fn place_render_camera(&mut self, end: PortalEnd, player: &Pose) {
        let linked_pose = self.portals[end.other().index()].pose;
        let portal = &mut self.portals[end.index()];
        portal.render_camera = relative_pose(&linked_pose, &portal.pose, player);
    }

    /// Camera-space clip plane for end's render camera, aligned with
    /// end's own surface. `view` is the render camera's view matrix.
    /// Returns `None` when the plane distance is too small for a stable
    /// oblique projection; the caller keeps the default projection.
    pub fn compute_oblique_clip_plane(&self, end: PortalEnd, view: Mat4) -> Option<Vec4> {
        let portal = self.portal(end);
        // normal points away from the render camera, which keeps the
        // camera on the plane's negative half-space as the oblique
        // projection rewrite requires
        let sign = -portal.side_of_plane(portal.render_camera.position);

        let cam_space_position = view.transform_point3(portal.pose.position);
        let cam_space_normal = view.transform_vector3(portal.pose.forward()) * sign;

        let cam_space_distance = -cam_space_position.dot(cam_space_normal) + NEAR_CLIP_OFFSET;
        if cam_space_distance.abs() > NEAR_CLIP_LIMIT {
            Some(cam_space_normal.extend(cam_space_distance))
        } else {
            None
        }
    }

    /// Resizes end's view surface so the player camera's near plane can
    /// never intersect it, and offsets it toward the viewer's far side.
    /// `corner_dist` is the player camera's near-plane corner distance.
    pub fn update_screen_thickness(&mut self, end: PortalEnd, viewer: Vec3, corner_dist: f32) {
        self.portals[end.index()].update_screen_thickness(viewer, corner_dist);
    }

    /// Pushes every tracked traveler's slice offset far enough that
    /// end's render camera never sees a mid-slice seam, for both ends'
    /// tracked sets.
    pub fn avoid_self_clipping(&mut self, end: PortalEnd, corner_dist: f32, travelers: &mut TravelerSet) {
        let cam_pos = self.portals[end.index()].render_camera.position;
        self.portals[end.other().index()].update_screen_thickness(cam_pos, corner_dist);
        let thickness = self.portals[end.other().index()].screen.depth;

        let portal = &self.portals[end.index()];
        let linked = &self.portals[end.other().index()];
        let cam_side = portal.side_of_plane(cam_pos);
        let linked_cam_side = linked.side_of_plane(cam_pos);

        for &id in &portal.tracked {
            if let Some(traveler) = travelers.get_mut(id) {
                let side = portal.side_of_plane(traveler.pose.position);
                traveler.override_slice_offset(if side == cam_side { -SELF_CLIP_PUSH } else { SELF_CLIP_PUSH });
                let clone_side = -side;
                traveler.override_clone_slice_offset(if clone_side == linked_cam_side {
                    thickness
                } else {
                    -thickness
                });
            }
        }
        for &id in &linked.tracked {
            if let Some(traveler) = travelers.get_mut(id) {
                let side = linked.side_of_plane(traveler.pose.position);
                traveler.override_clone_slice_offset(if side != cam_side { -SELF_CLIP_PUSH } else { SELF_CLIP_PUSH });
                traveler.override_slice_offset(if side == linked_cam_side { thickness } else { -thickness });
            }
        }
    }

    /// Recomputes slice planes for end's tracked in-portal travelers.
    /// The offset tracks the player camera's side so the visible cut
    /// always matches what the viewer should see through the surface.
    pub fn update_traveler_slices(&self, end: PortalEnd, player_position: Vec3, travelers: &mut TravelerSet) {
        let portal = self.portal(end);
        let linked = self.portal(end.other());
        let player_side = portal.side_of_plane(player_position);
        let linked_player_side = linked.side_of_plane(player_position);
        let hidden_offset = -(portal.screen.depth + SLICE_OFFSET_BIAS);

        for id in portal.tracked() {
            let Some(traveler) = travelers.get_mut(id) else { continue };
            if !traveler.is_in_portal() {
                continue;
            }
            let side = portal.side_of_plane(traveler.pose.position);

            let traveler_params = SliceParameters {
                center: portal.pose.position,
                normal: portal.pose.forward() * -side,
                offset: if player_side != side { hidden_offset } else { 0.0 },
            };
            let clone_params = SliceParameters {
                center: linked.pose.position,
                normal: linked.pose.forward() * side,
                offset: if linked_player_side == side { hidden_offset } else { 0.0 },
            };
            traveler.update_slices(traveler_params, clone_params);
        }
    }

    /// Crossing detection for end's tracked travelers, once per
    /// simulation step. A traveler whose pivot changed sides while
    /// in-portal is teleported to the linked end and its tracking is
    /// handed over; the rest get their clone pose refreshed.
    pub fn update_travelers(&mut self, end: PortalEnd, travelers: &mut TravelerSet) {
        let ids: Vec<TravelerId> = self.portals[end.index()].tracked.iter().copied().collect();
        let portal_pose = self.portals[end.index()].pose;
        let linked_pose = self.portals[end.other().index()].pose;
        let plane = self.portals[end.index()].plane();
        let rotation_delta = linked_pose.rotation * portal_pose.rotation.inverse();

        for id in ids {
            let Some(traveler) = travelers.get_mut(id) else { continue };
            let mapped = relative_pose(&portal_pose, &linked_pose, &traveler.pose);
            if traveler.has_crossed_portal(&plane) {
                let velocity = rotation_delta * traveler.velocity;
                traveler.teleport(mapped, velocity, &self.layers);
                travelers.sync_shape(id);
                self.portals[end.index()].tracked.remove(&id);
                self.portals[end.other().index()].tracked.insert(id);
                debug!(?end, traveler = id.0, "traveler crossed portal");
            } else if traveler.is_in_portal() {
                traveler.update_clone(mapped);
            }
        }
    }

    /// Applies one step's trigger events. Events are re-ordered so exits
    /// land before enters and crossing transitions happen after zone
    /// tracking is settled; events whose shape is not a registered
    /// traveler, or whose portal does not track the traveler, are
    /// dropped.
    pub fn handle_trigger_events(
        &mut self,
        events: &[TriggerEvent<PortalVolume>],
        travelers: &mut TravelerSet,
    ) {
        let mut ordered: Vec<&TriggerEvent<PortalVolume>> = events.iter().collect();
        ordered.sort_by_key(|e| match (e.kind, e.volume.1) {
            (TriggerKind::Exit, PortalZone::Crossing) => 0,
            (TriggerKind::Exit, _) => 1,
            (TriggerKind::Enter, PortalZone::Crossing) => 3,
            (TriggerKind::Enter, _) => 2,
        });

        for event in ordered {
            let (end, zone) = event.volume;
            let Some(id) = travelers.resolve_shape(event.shape) else {
                continue;
            };
            match (event.kind, zone) {
                (TriggerKind::Enter, PortalZone::ApproachFront | PortalZone::ApproachBack) => {
                    let portal = &mut self.portals[end.index()];
                    let plane = Plane::new(portal.pose.position, portal.pose.forward());
                    let (traveler_layer, clone_layer) = match zone {
                        PortalZone::ApproachFront => portal.approach_layers[0],
                        _ => portal.approach_layers[1],
                    };
                    if let Some(traveler) = travelers.get_mut(id) {
                        if traveler.on_approach_portal_zone(&plane, traveler_layer, clone_layer) {
                            portal.tracked.insert(id);
                            debug!(?end, ?zone, traveler = id.0, "traveler approaching portal");
                        }
                    }
                }
                (TriggerKind::Exit, PortalZone::ApproachFront | PortalZone::ApproachBack) => {
                    if !self.portals[end.index()].tracked.contains(&id) {
                        continue;
                    }
                    if let Some(traveler) = travelers.get_mut(id) {
                        if traveler.on_leave_portal_zone(&self.layers) {
                            self.portals[end.index()].tracked.remove(&id);
                            debug!(?end, ?zone, traveler = id.0, "traveler left portal zone");
                        }
                    }
                }
                (TriggerKind::Enter, PortalZone::Crossing) => {
                    if !self.portals[end.index()].tracked.contains(&id) {
                        continue;
                    }
                    if let Some(traveler) = travelers.get_mut(id) {
                        traveler.on_enter_portal(&self.layers);
                    }
                }
                (TriggerKind::Exit, PortalZone::Crossing) => {
                    if !self.portals[end.index()].tracked.contains(&id) {
                        continue;
                    }
                    if let Some(traveler) = travelers.get_mut(id) {
                        traveler.on_exit_portal(&self.layers);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;
    use riftgate_shared::layers::{register_portal_layers, LayerRegistry};
    use riftgate_shared::plane::extract_frustum_planes;
    use riftgate_shared::slice::Material;
    use riftgate_shared::trigger::{OverlapTracker, ShapeId};
    use crate::renderer::portal_renderer::apply_oblique_clip;
    use crate::traveler::Traveler;

    fn test_layers() -> LayerSet {
        let mut registry = LayerRegistry::new();
        register_portal_layers(&mut registry);
        LayerSet::resolve(&registry)
    }

    fn test_pair(layers: &LayerSet) -> PortalPair {
        // A at the origin facing +Z, B twenty units away facing +Z too,
        // so local coordinates map across unchanged.
        let a = PortalConfig {
            pose: Pose::new(Vec3::ZERO, Quat::IDENTITY),
            screen_half_extents: Vec2::new(1.0, 1.5),
            approach_front_layers: (layers.side_a, layers.side_b),
            approach_back_layers: (layers.side_b, layers.side_a),
        };
        let b = PortalConfig {
            pose: Pose::new(Vec3::new(0.0, 0.0, 20.0), Quat::IDENTITY),
            screen_half_extents: Vec2::new(1.0, 1.5),
            approach_front_layers: (layers.side_b, layers.side_a),
            approach_back_layers: (layers.side_a, layers.side_b),
        };
        PortalPair::new(a, b, *layers)
    }

    fn spawn_cube(travelers: &mut TravelerSet, layers: &LayerSet, position: Vec3) -> TravelerId {
        travelers.spawn(Traveler::new(
            Pose::new(position, Quat::IDENTITY),
            Vec3::splat(0.3),
            ShapeId(1),
            layers.side_a,
            vec![Material::sliceable([0.8, 0.2, 0.2, 1.0])],
        ))
    }

    fn step(
        pair: &mut PortalPair,
        tracker: &mut OverlapTracker<PortalVolume>,
        travelers: &mut TravelerSet,
    ) {
        travelers.sync_all_shapes();
        let volumes = pair.trigger_volumes();
        let shapes: Vec<_> = travelers.shape_bounds().collect();
        let mut events = Vec::new();
        tracker.step(&volumes, &shapes, &mut events);
        pair.handle_trigger_events(&events, travelers);
        pair.update_travelers(PortalEnd::A, travelers);
        pair.update_travelers(PortalEnd::B, travelers);
    }

    #[test]
    fn render_camera_mirrors_player_through_linked_portal() {
        let layers = test_layers();
        let mut pair = test_pair(&layers);
        // Player three units in front of B; A's camera must sit three
        // units in front of A, with the same orientation offset.
        let player = Pose::new(Vec3::new(0.5, 1.0, 23.0), Quat::from_rotation_y(0.3));
        pair.place_render_camera(PortalEnd::A, &player);

        let camera = pair.portal(PortalEnd::A).render_camera();
        assert!((camera.position - Vec3::new(0.5, 1.0, 3.0)).length() < 1e-4);
        assert!((camera.forward() - player.forward()).length() < 1e-4);
    }

    #[test]
    fn invisible_portal_is_skipped_without_camera_placement() {
        let layers = test_layers();
        let pair = test_pair(&layers);
        // Camera at the origin looking straight down -Y: neither screen
        // is inside the frustum.
        let view = Mat4::look_to_rh(Vec3::new(0.0, 50.0, 10.0), Vec3::NEG_Y, Vec3::Z);
        let proj = Mat4::perspective_rh(1.0, 1.0, 0.1, 40.0);
        let frustum = extract_frustum_planes(proj * view);

        assert!(pair.visible_ends(&frustum).is_empty());
        // untouched render cameras still sit at their portal poses
        assert_eq!(pair.portal(PortalEnd::A).render_camera().position, Vec3::ZERO);
    }

    #[test]
    fn portal_facing_camera_is_visible() {
        let layers = test_layers();
        let pair = test_pair(&layers);
        let view = Mat4::look_to_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z, Vec3::Y);
        let proj = Mat4::perspective_rh(1.2, 1.0, 0.1, 100.0);
        let frustum = extract_frustum_planes(proj * view);

        // B's screen (at z=20) is behind the camera, A's (origin) ahead.
        // End B renders the image shown on A's screen.
        let visible = pair.visible_ends(&frustum);
        assert_eq!(visible, vec![PortalEnd::B]);
    }

    #[test]
    fn oblique_clip_falls_back_near_the_plane() {
        let layers = test_layers();
        let mut pair = test_pair(&layers);
        // Render camera exactly on A's plane: camera-space distance is
        // the bias alone, inside the stability limit.
        pair.place_render_camera(PortalEnd::A, &Pose::new(Vec3::new(0.0, 0.0, 20.0), Quat::IDENTITY));
        let camera = *pair.portal(PortalEnd::A).render_camera();
        let view = camera.to_matrix().inverse();
        assert!(pair.compute_oblique_clip_plane(PortalEnd::A, view).is_none());

        // Two units away the plane is well conditioned.
        pair.place_render_camera(PortalEnd::A, &Pose::new(Vec3::new(0.0, 0.0, 22.0), Quat::IDENTITY));
        let camera = *pair.portal(PortalEnd::A).render_camera();
        let view = camera.to_matrix().inverse();
        let plane = pair.compute_oblique_clip_plane(PortalEnd::A, view);
        assert!(plane.is_some());
    }

    #[test]
    fn oblique_plane_keeps_the_render_camera_on_the_negative_side() {
        let layers = test_layers();
        let mut pair = test_pair(&layers);
        // Player five units in front of B puts A's render camera five
        // units in front of A.
        pair.place_render_camera(PortalEnd::A, &Pose::new(Vec3::new(0.0, 0.0, 25.0), Quat::IDENTITY));
        let camera = *pair.portal(PortalEnd::A).render_camera();
        let view = camera.to_matrix().inverse();

        let plane = pair.compute_oblique_clip_plane(PortalEnd::A, view).unwrap();
        // camera-space distance is negative for a camera off the plane
        assert!(plane.w < 0.0, "plane distance {} not negative", plane.w);
        // the normal opposes the portal-to-camera direction
        let portal = pair.portal(PortalEnd::A);
        let to_camera = camera.position - portal.pose().position;
        let world_normal = camera.rotation * Vec3::new(plane.x, plane.y, plane.z);
        assert!(world_normal.dot(to_camera) < 0.0);
    }

    #[test]
    fn oblique_plane_distance_is_negative_for_any_camera_placement() {
        let layers = test_layers();
        let mut pair = test_pair(&layers);

        // Player poses putting A's render camera on both sides of A's
        // plane, at several offsets and orientations.
        for x in [-6.0_f32, -2.0, 0.0, 3.0] {
            for player_z in [13.0_f32, 17.0, 23.0, 26.0] {
                for yaw in [-0.8_f32, 0.0, 0.7] {
                    let player = Pose::new(Vec3::new(x, 0.3, player_z), Quat::from_rotation_y(yaw));
                    pair.place_render_camera(PortalEnd::A, &player);
                    let camera = *pair.portal(PortalEnd::A).render_camera();
                    let view = camera.to_matrix().inverse();

                    let plane = pair
                        .compute_oblique_clip_plane(PortalEnd::A, view)
                        .unwrap();
                    assert!(
                        plane.w < 0.0,
                        "camera at {:?}: plane distance {} not negative",
                        camera.position,
                        plane.w
                    );
                }
            }
        }
    }

    #[test]
    fn oblique_projection_clips_the_camera_side_of_the_portal_plane() {
        let layers = test_layers();
        let mut pair = test_pair(&layers);
        pair.place_render_camera(PortalEnd::A, &Pose::new(Vec3::new(0.0, 0.0, 25.0), Quat::IDENTITY));
        let camera = *pair.portal(PortalEnd::A).render_camera();
        let view = camera.to_matrix().inverse();
        let plane = pair.compute_oblique_clip_plane(PortalEnd::A, view).unwrap();

        let proj = Mat4::perspective_rh(1.2, 16.0 / 9.0, 0.1, 100.0);
        let view_proj = apply_oblique_clip(proj, plane) * view;

        // The rewrite maps the portal plane to the near depth bound: a
        // point past the plane (what the view should show) projects
        // inside it, a point between the camera and the plane beyond it.
        let through = view_proj.project_point3(Vec3::new(0.0, 0.0, -1.0));
        let occluder = view_proj.project_point3(Vec3::new(0.0, 0.0, 2.0));
        assert!(through.z > -1.0 && through.z < 1.0, "through-portal point clipped: {through}");
        assert!(occluder.z < -1.0, "occluder survived the clip: {occluder}");
    }

    #[test]
    fn screen_thickness_offsets_away_from_the_viewer() {
        let layers = test_layers();
        let mut pair = test_pair(&layers);
        let corner = 0.2;

        // Viewer in front of A (+Z side): surface pushed to -Z.
        pair.update_screen_thickness(PortalEnd::A, Vec3::new(0.0, 0.0, 3.0), corner);
        let screen = *pair.portal(PortalEnd::A).screen();
        assert_eq!(screen.depth, corner);
        assert_eq!(screen.offset, -corner * 0.5);

        // Viewer behind: pushed the other way.
        pair.update_screen_thickness(PortalEnd::A, Vec3::new(0.0, 0.0, -3.0), corner);
        assert_eq!(pair.portal(PortalEnd::A).screen().offset, corner * 0.5);
    }

    #[test]
    fn traveler_slice_offset_selected_by_viewer_side() {
        let layers = test_layers();
        let mut pair = test_pair(&layers);
        let mut travelers = TravelerSet::new();
        let mut tracker = OverlapTracker::new();
        let id = spawn_cube(&mut travelers, &layers, Vec3::new(0.0, 0.0, 0.2));
        step(&mut pair, &mut tracker, &mut travelers);
        assert!(travelers.get(id).unwrap().is_in_portal());

        // Viewer on the traveler's own side: real object unsliced.
        pair.update_traveler_slices(PortalEnd::A, Vec3::new(0.0, 0.0, 5.0), &mut travelers);
        let t = travelers.get(id).unwrap();
        assert_eq!(t.materials()[0].slice.offset, 0.0);

        // Viewer on the far side: the crossed portion is hidden.
        pair.update_traveler_slices(PortalEnd::A, Vec3::new(0.0, 0.0, -5.0), &mut travelers);
        let t = travelers.get(id).unwrap();
        let depth = pair.portal(PortalEnd::A).screen().depth;
        assert_eq!(t.materials()[0].slice.offset, -(depth + SLICE_OFFSET_BIAS));
    }

    #[test]
    fn unregistered_shapes_are_ignored() {
        let layers = test_layers();
        let mut pair = test_pair(&layers);
        let mut travelers = TravelerSet::new();
        let events = [TriggerEvent {
            kind: TriggerKind::Enter,
            volume: (PortalEnd::A, PortalZone::ApproachFront),
            shape: ShapeId(99),
        }];
        pair.handle_trigger_events(&events, &mut travelers);
        assert_eq!(pair.portal(PortalEnd::A).tracked().count(), 0);
    }

    #[test]
    fn full_crossing_scenario_hands_tracking_to_the_linked_end() {
        let layers = test_layers();
        let mut pair = test_pair(&layers);
        let mut travelers = TravelerSet::new();
        let mut tracker = OverlapTracker::new();

        // Start well outside every zone, in front of A.
        let id = spawn_cube(&mut travelers, &layers, Vec3::new(0.0, 0.0, 5.0));
        step(&mut pair, &mut tracker, &mut travelers);
        assert!(!travelers.get(id).unwrap().is_tracked());

        // Into A's front approach zone.
        travelers.get_mut(id).unwrap().pose.position.z = 1.5;
        step(&mut pair, &mut tracker, &mut travelers);
        {
            let t = travelers.get(id).unwrap();
            assert!(t.is_tracked());
            assert!(!t.is_in_portal());
            assert_eq!(t.layer(), layers.side_a);
            assert_eq!(t.side_sign(), 1.0);
        }

        // Into the crossing volume, still on the front side.
        travelers.get_mut(id).unwrap().pose.position.z = 0.5;
        step(&mut pair, &mut tracker, &mut travelers);
        {
            let t = travelers.get(id).unwrap();
            assert!(t.is_in_portal());
            assert!(t.clone_state().active);
            assert_eq!(t.layer(), layers.side_a_exclusive);
            assert_eq!(t.clone_state().layer, layers.side_b_exclusive);
        }

        // Pivot crosses the plane: teleported next to B, tracking moves.
        travelers.get_mut(id).unwrap().pose.position.z = -0.2;
        travelers.get_mut(id).unwrap().velocity = Vec3::new(0.0, 0.0, -2.0);
        step(&mut pair, &mut tracker, &mut travelers);
        {
            let t = travelers.get(id).unwrap();
            assert!((t.pose.position.z - 19.8).abs() < 1e-4);
            assert_eq!(t.layer(), layers.side_b_exclusive);
            assert!(t.is_in_portal());
            assert_eq!(pair.portal(PortalEnd::A).tracked().count(), 0);
            assert_eq!(pair.portal(PortalEnd::B).tracked().count(), 1);
        }

        // One settling step at the arrival pose: the overlap tracker now
        // sees the shape inside B's crossing volume.
        step(&mut pair, &mut tracker, &mut travelers);
        assert!(travelers.get(id).unwrap().is_in_portal());

        // Clears B's crossing volume on the back side.
        travelers.get_mut(id).unwrap().pose.position.z = 19.0;
        step(&mut pair, &mut tracker, &mut travelers);
        {
            let t = travelers.get(id).unwrap();
            assert!(!t.is_in_portal());
            assert!(!t.clone_state().active);
            assert_eq!(t.layer(), layers.side_b);
            assert!(t.materials()[0].slice.is_disabled());
        }

        // And finally leaves B's approach zone entirely.
        travelers.get_mut(id).unwrap().pose.position.z = 15.0;
        step(&mut pair, &mut tracker, &mut travelers);
        assert!(!travelers.get(id).unwrap().is_tracked());
        assert_eq!(travelers.get(id).unwrap().layer(), layers.none);
        assert_eq!(pair.portal(PortalEnd::B).tracked().count(), 0);
    }
}

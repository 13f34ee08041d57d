//! Demo scene: two rooms sharing a wall plane, a linked portal pair
//! between them, a cube sliding back and forth through one portal, and
//! the player spawned as an ordinary traveler.

use glam::{Quat, Vec2, Vec3};
use riftgate_shared::layers::LayerSet;
use riftgate_shared::plane::Pose;
use riftgate_shared::slice::Material;
use riftgate_shared::trigger::ShapeId;

use crate::portal::PortalConfig;
use crate::traveler::{Traveler, TravelerId, TravelerSet};

const WALL_PLANE_Z: f32 = 4.0;
const ROOM_B_X: f32 = 30.0;
const PORTAL_HALF_EXTENTS: Vec2 = Vec2::new(1.2, 1.6);

const CUBE_SHAPE: ShapeId = ShapeId(1);
const PLAYER_SHAPE: ShapeId = ShapeId(2);

pub const PLAYER_HALF_EXTENTS: Vec3 = Vec3::new(0.3, 0.9, 0.3);
pub const PLAYER_EYE_HEIGHT: f32 = 0.7;

const CUBE_MAX_SPEED: f32 = 2.0;
const CUBE_CYCLE_SPEED: f32 = 0.45;

/// A static box in the world. Everything in the demo environment is a
/// box, which keeps the mesh path to a single builder.
#[derive(Debug, Clone)]
pub struct SceneObject {
    pub pose: Pose,
    pub half_extents: Vec3,
    pub material: Material,
}

pub struct DemoScene {
    pub objects: Vec<SceneObject>,
    pub portal_a: PortalConfig,
    pub portal_b: PortalConfig,
    pub cube: TravelerId,
    pub player: TravelerId,
    cube_clock: f32,
}

impl DemoScene {
    pub fn build(layers: &LayerSet, travelers: &mut TravelerSet) -> Self {
        let mut objects = Vec::new();
        build_room(&mut objects, Vec3::ZERO, [0.35, 0.38, 0.45, 1.0]);
        build_room(&mut objects, Vec3::new(ROOM_B_X, 0.0, 0.0), [0.45, 0.36, 0.32, 1.0]);

        // Portal A faces into room A (-Z), portal B faces out of room B
        // (+Z); the 180-degree relative rotation makes a traveler emerge
        // moving into the far room.
        let portal_a = PortalConfig {
            pose: Pose::new(
                Vec3::new(0.0, PORTAL_HALF_EXTENTS.y, WALL_PLANE_Z),
                Quat::from_rotation_y(std::f32::consts::PI),
            ),
            screen_half_extents: PORTAL_HALF_EXTENTS,
            approach_front_layers: (layers.side_a, layers.side_b),
            approach_back_layers: (layers.side_b, layers.side_a),
        };
        let portal_b = PortalConfig {
            pose: Pose::new(
                Vec3::new(ROOM_B_X, PORTAL_HALF_EXTENTS.y, WALL_PLANE_Z),
                Quat::IDENTITY,
            ),
            screen_half_extents: PORTAL_HALF_EXTENTS,
            approach_front_layers: (layers.side_a, layers.side_b),
            approach_back_layers: (layers.side_b, layers.side_a),
        };

        let cube = travelers.spawn(Traveler::new(
            Pose::new(Vec3::new(0.6, 0.4, 1.5), Quat::IDENTITY),
            Vec3::splat(0.4),
            CUBE_SHAPE,
            layers.side_a,
            vec![Material::sliceable([0.85, 0.3, 0.2, 1.0])],
        ));
        let player = travelers.spawn(Traveler::new(
            Pose::new(Vec3::new(-1.0, PLAYER_HALF_EXTENTS.y, 0.0), Quat::IDENTITY),
            PLAYER_HALF_EXTENTS,
            PLAYER_SHAPE,
            layers.side_a,
            vec![Material::sliceable([0.3, 0.7, 0.35, 1.0])],
        ));

        Self {
            objects,
            portal_a,
            portal_b,
            cube,
            player,
            cube_clock: 0.0,
        }
    }

    /// Slides the cube along its own forward axis with a sinusoidal
    /// speed, so it shuttles through the portal pair indefinitely. The
    /// pose is kept velocity-integrated: a teleport remaps both pose and
    /// velocity and the drive carries on from there.
    pub fn drive_cube(&mut self, travelers: &mut TravelerSet, dt: f32) {
        self.cube_clock += dt;
        if let Some(cube) = travelers.get_mut(self.cube) {
            let speed = CUBE_MAX_SPEED * (self.cube_clock * CUBE_CYCLE_SPEED).sin();
            cube.velocity = cube.pose.forward() * speed;
            cube.pose.position += cube.velocity * dt;
        }
    }
}

fn build_room(objects: &mut Vec<SceneObject>, center: Vec3, wall_color: [f32; 4]) {
    const ROOM_HALF: Vec3 = Vec3::new(6.0, 2.5, 4.0);
    const WALL: f32 = 0.2;

    // floor
    objects.push(SceneObject {
        pose: Pose::new(center + Vec3::new(0.0, -WALL, 0.0), Quat::IDENTITY),
        half_extents: Vec3::new(ROOM_HALF.x, WALL, ROOM_HALF.z),
        material: Material::plain("riftgate/flat", [0.25, 0.25, 0.27, 1.0]),
    });
    // back wall, away from the portal plane
    objects.push(SceneObject {
        pose: Pose::new(center + Vec3::new(0.0, ROOM_HALF.y, -ROOM_HALF.z), Quat::IDENTITY),
        half_extents: Vec3::new(ROOM_HALF.x, ROOM_HALF.y, WALL),
        material: Material::plain("riftgate/flat", wall_color),
    });
    // side walls
    for sign in [-1.0, 1.0] {
        objects.push(SceneObject {
            pose: Pose::new(center + Vec3::new(sign * ROOM_HALF.x, ROOM_HALF.y, 0.0), Quat::IDENTITY),
            half_extents: Vec3::new(WALL, ROOM_HALF.y, ROOM_HALF.z),
            material: Material::plain("riftgate/flat", wall_color),
        });
    }
    // a marker pillar so the two rooms read differently through a portal
    objects.push(SceneObject {
        pose: Pose::new(center + Vec3::new(3.0, 1.0, -2.0), Quat::IDENTITY),
        half_extents: Vec3::new(0.3, 1.0, 0.3),
        material: Material::plain("riftgate/flat", [wall_color[0] * 0.6, wall_color[1] * 0.6, wall_color[2] * 0.6, 1.0]),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use riftgate_shared::layers::{register_portal_layers, LayerRegistry};

    #[test]
    fn portals_face_each_other_through_the_pair() {
        let mut registry = LayerRegistry::new();
        register_portal_layers(&mut registry);
        let layers = LayerSet::resolve(&registry);

        let mut travelers = TravelerSet::new();
        let scene = DemoScene::build(&layers, &mut travelers);

        let a_forward = scene.portal_a.pose.forward();
        let b_forward = scene.portal_b.pose.forward();
        assert!((a_forward + b_forward).length() < 1e-5);
    }

    #[test]
    fn cube_oscillates_around_its_spawn() {
        let mut registry = LayerRegistry::new();
        register_portal_layers(&mut registry);
        let layers = LayerSet::resolve(&registry);

        let mut travelers = TravelerSet::new();
        let mut scene = DemoScene::build(&layers, &mut travelers);
        let start = travelers.get(scene.cube).unwrap().pose.position;

        for _ in 0..30 {
            scene.drive_cube(&mut travelers, 1.0 / 60.0);
        }
        let moved = travelers.get(scene.cube).unwrap().pose.position;
        assert!((moved - start).length() > 0.01);
        // motion stays on the cube's forward axis
        assert_eq!(moved.y, start.y);
        assert_eq!(moved.x, start.x);
    }
}

use glam::{Mat4, Vec3};
use riftgate_shared::plane::Pose;
use winit::keyboard::KeyCode;

use crate::input::InputState;

#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 1.7, 0.0),
            yaw: 0.0,
            pitch: 0.0,
            fov: 70.0_f32.to_radians(),
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 500.0,
        }
    }
}

impl Camera {
    pub fn update_look(&mut self, input: &InputState, look_sensitivity: f32) {
        const MAX_PITCH: f32 = 89.0_f32.to_radians();

        self.yaw += input.mouse_delta.x * look_sensitivity;
        self.pitch -= input.mouse_delta.y * look_sensitivity;
        self.pitch = self.pitch.clamp(-MAX_PITCH, MAX_PITCH);
    }

    pub fn horizontal_movement_dir(&self, input: &InputState) -> Vec3 {
        let forward = Vec3::new(self.yaw.cos(), 0.0, self.yaw.sin()).normalize_or_zero();
        let right = Vec3::new(-forward.z, 0.0, forward.x);

        let mut dir = Vec3::ZERO;
        if input.is_pressed(KeyCode::KeyW) {
            dir += forward;
        }
        if input.is_pressed(KeyCode::KeyS) {
            dir -= forward;
        }
        if input.is_pressed(KeyCode::KeyD) {
            dir += right;
        }
        if input.is_pressed(KeyCode::KeyA) {
            dir -= right;
        }

        if dir.length_squared() > 0.0 {
            dir.normalize()
        } else {
            Vec3::ZERO
        }
    }

    pub fn forward_direction(&self) -> Vec3 {
        Vec3::new(
            self.yaw.cos() * self.pitch.cos(),
            self.pitch.sin(),
            self.yaw.sin() * self.pitch.cos(),
        )
        .normalize_or_zero()
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward_direction(), Vec3::Y)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(
            self.fov,
            self.aspect.max(0.0001),
            self.near.max(0.0001),
            self.far.max(self.near + 0.0001),
        )
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Camera-to-world pose, for feeding the camera into portal math as
    /// a plain posed object.
    pub fn pose(&self) -> Pose {
        Pose::from_matrix(self.view_matrix().inverse())
    }

    /// Points the camera along `forward`, keeping roll at zero. Used
    /// after a portal teleport maps the view through the pair.
    pub fn look_along(&mut self, forward: Vec3) {
        let f = forward.normalize_or_zero();
        if f == Vec3::ZERO {
            return;
        }
        self.yaw = f.z.atan2(f.x);
        self.pitch = f.y.clamp(-1.0, 1.0).asin();
    }

    /// Distance from the eye to a corner of the near-clip rectangle. The
    /// portal view surface is kept at least this thick so the near plane
    /// can never cut through it.
    pub fn near_plane_corner_distance(&self) -> f32 {
        let half_height = self.near * (self.fov * 0.5).tan();
        let half_width = half_height * self.aspect;
        Vec3::new(half_width, half_height, self.near).length()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pose_round_trips_through_the_view_matrix() {
        let mut camera = Camera::default();
        camera.position = Vec3::new(3.0, 1.0, -2.0);
        camera.yaw = 1.2;
        camera.pitch = -0.3;

        let pose = camera.pose();
        assert!((pose.position - camera.position).length() < 1e-4);
        // the pose's -Z axis is the camera's look direction
        let look = pose.rotation * Vec3::NEG_Z;
        assert!((look - camera.forward_direction()).length() < 1e-4);
    }

    #[test]
    fn look_along_recovers_yaw_and_pitch() {
        let mut camera = Camera::default();
        camera.yaw = 0.7;
        camera.pitch = 0.2;
        let forward = camera.forward_direction();

        let mut other = Camera::default();
        other.look_along(forward);
        assert!((other.forward_direction() - forward).length() < 1e-4);
    }

    #[test]
    fn near_corner_is_farther_than_the_near_plane() {
        let camera = Camera::default();
        let corner = camera.near_plane_corner_distance();
        assert!(corner > camera.near);
        assert!(corner < camera.near * 3.0);
    }
}

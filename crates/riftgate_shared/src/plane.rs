use glam::{Mat4, Quat, Vec3, Vec4};

pub type FrustumPlanes = [[f32; 4]; 6];

/// Position + rotation of an object, without scale. Portals, cameras and
/// travelers all move through the portal math as poses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

impl Pose {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.position)
    }

    pub fn from_matrix(matrix: Mat4) -> Self {
        let (_, rotation, position) = matrix.to_scale_rotation_translation();
        Self { position, rotation }
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::Z
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }
}

/// Maps `pose` out of `from`'s local frame and into `to`'s, i.e.
/// `to.to_world * from.world_to_local * pose.to_world`. Used both to place a
/// portal's render camera and to compute the handoff pose of a crossing
/// traveler.
pub fn relative_pose(from: &Pose, to: &Pose, pose: &Pose) -> Pose {
    let matrix = to.to_matrix() * from.to_matrix().inverse() * pose.to_matrix();
    Pose::from_matrix(matrix)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub point: Vec3,
    pub normal: Vec3,
}

impl Plane {
    pub fn new(point: Vec3, normal: Vec3) -> Self {
        Self { point, normal }
    }

    pub fn signed_distance(&self, position: Vec3) -> f32 {
        (position - self.point).dot(self.normal)
    }

    /// Returns +1.0 or -1.0 for the side of the plane `position` lies on.
    /// A point exactly on the plane counts as the positive side; this
    /// tie-break decides which exclusive layer a traveler sitting precisely
    /// on the boundary receives, so it must stay fixed.
    pub fn side_of(&self, position: Vec3) -> f32 {
        if self.signed_distance(position) >= 0.0 {
            1.0
        } else {
            -1.0
        }
    }

    /// World-space plane as (normal, d) with `dot(n, p) + d = 0`.
    pub fn as_vec4(&self) -> Vec4 {
        self.normal.extend(-self.normal.dot(self.point))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_center_half_extents(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
            && self.min.z < other.max.z
            && self.max.z > other.min.z
    }

    /// Bounds of an oriented box described by a pose and half extents.
    pub fn from_oriented_box(pose: &Pose, half_extents: Vec3) -> Self {
        let abs_extent = (pose.right() * half_extents.x).abs()
            + (pose.up() * half_extents.y).abs()
            + (pose.forward() * half_extents.z).abs();
        Self::from_center_half_extents(pose.position, abs_extent)
    }
}

pub fn extract_frustum_planes(vp: Mat4) -> FrustumPlanes {
    let m = vp.to_cols_array_2d();
    let row0 = [m[0][0], m[1][0], m[2][0], m[3][0]];
    let row1 = [m[0][1], m[1][1], m[2][1], m[3][1]];
    let row2 = [m[0][2], m[1][2], m[2][2], m[3][2]];
    let row3 = [m[0][3], m[1][3], m[2][3], m[3][3]];

    let planes = [
        [row3[0] + row0[0], row3[1] + row0[1], row3[2] + row0[2], row3[3] + row0[3]],
        [row3[0] - row0[0], row3[1] - row0[1], row3[2] - row0[2], row3[3] - row0[3]],
        [row3[0] + row1[0], row3[1] + row1[1], row3[2] + row1[2], row3[3] + row1[3]],
        [row3[0] - row1[0], row3[1] - row1[1], row3[2] - row1[2], row3[3] - row1[3]],
        [row3[0] + row2[0], row3[1] + row2[1], row3[2] + row2[2], row3[3] + row2[3]],
        [row3[0] - row2[0], row3[1] - row2[1], row3[2] - row2[2], row3[3] - row2[3]],
    ];

    let mut result = [[0.0f32; 4]; 6];
    for (i, p) in planes.iter().enumerate() {
        let len = (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt();
        if len > 0.0001 {
            result[i] = [p[0] / len, p[1] / len, p[2] / len, p[3] / len];
        }
    }
    result
}

pub fn aabb_in_frustum(planes: &FrustumPlanes, aabb: &Aabb) -> bool {
    let center = aabb.center();
    let half = aabb.half_extents();
    for plane in planes {
        let distance =
            plane[0] * center.x + plane[1] * center.y + plane[2] * center.z + plane[3];
        let radius =
            plane[0].abs() * half.x + plane[1].abs() * half.y + plane[2].abs() * half.z;
        if distance < -radius {
            return false;
        }
    }
    true
}

pub fn safe_normalize(v: Vec3, fallback: Vec3) -> Vec3 {
    let n = v.normalize_or_zero();
    if n.length_squared() > 0.0 {
        n
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use glam::{Mat4, Quat, Vec3};

    use super::{aabb_in_frustum, extract_frustum_planes, relative_pose, Aabb, Plane, Pose};

    #[test]
    fn side_of_plane_is_invariant_under_in_plane_translation() {
        let plane = Plane::new(Vec3::new(1.0, 2.0, 3.0), Vec3::Z);
        let point = Vec3::new(5.0, -4.0, 3.5);

        let base = plane.side_of(point);
        assert_eq!(base, plane.side_of(point + Vec3::X * 100.0));
        assert_eq!(base, plane.side_of(point + Vec3::Y * -250.0));
    }

    #[test]
    fn side_of_plane_flips_exactly_when_crossing() {
        let plane = Plane::new(Vec3::ZERO, Vec3::Z);
        assert_eq!(plane.side_of(Vec3::new(0.0, 0.0, 0.001)), 1.0);
        assert_eq!(plane.side_of(Vec3::new(0.0, 0.0, -0.001)), -1.0);
    }

    #[test]
    fn point_exactly_on_plane_counts_as_positive_side() {
        let plane = Plane::new(Vec3::ZERO, Vec3::Z);
        assert_eq!(plane.side_of(Vec3::new(7.0, -2.0, 0.0)), 1.0);
        assert_eq!(plane.side_of(Vec3::new(0.0, 0.0, -0.0)), 1.0);
    }

    #[test]
    fn relative_pose_mirrors_between_frames() {
        let from = Pose::new(Vec3::new(10.0, 0.0, 0.0), Quat::IDENTITY);
        let to = Pose::new(
            Vec3::new(-10.0, 0.0, 0.0),
            Quat::from_rotation_y(std::f32::consts::PI),
        );

        // One unit in front of `from` maps to one unit behind `to`'s facing.
        let pose = Pose::new(Vec3::new(10.0, 0.0, 1.0), Quat::IDENTITY);
        let mapped = relative_pose(&from, &to, &pose);
        assert!((mapped.position - Vec3::new(-10.0, 0.0, -1.0)).length() < 1e-5);
    }

    #[test]
    fn relative_pose_round_trips() {
        let from = Pose::new(Vec3::new(3.0, 1.0, -2.0), Quat::from_rotation_y(0.7));
        let to = Pose::new(Vec3::new(-5.0, 2.0, 9.0), Quat::from_rotation_x(-0.4));
        let pose = Pose::new(Vec3::new(4.0, 1.5, -1.0), Quat::from_rotation_z(0.2));

        let there = relative_pose(&from, &to, &pose);
        let back = relative_pose(&to, &from, &there);
        assert!((back.position - pose.position).length() < 1e-4);
        assert!(back.rotation.dot(pose.rotation).abs() > 0.9999);
    }

    #[test]
    fn aabb_intersection() {
        let a = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let b = Aabb::new(Vec3::splat(0.5), Vec3::splat(1.5));
        let c = Aabb::new(Vec3::ONE, Vec3::splat(2.0));

        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn frustum_accepts_box_ahead_and_rejects_box_behind() {
        let view = Mat4::look_to_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        let proj = Mat4::perspective_rh(1.2, 16.0 / 9.0, 0.1, 100.0);
        let planes = extract_frustum_planes(proj * view);

        let ahead = Aabb::from_center_half_extents(Vec3::new(0.0, 0.0, -10.0), Vec3::ONE);
        let behind = Aabb::from_center_half_extents(Vec3::new(0.0, 0.0, 10.0), Vec3::ONE);
        assert!(aabb_in_frustum(&planes, &ahead));
        assert!(!aabb_in_frustum(&planes, &behind));
    }
}

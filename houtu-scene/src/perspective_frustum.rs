use bevy::math::DVec3;

use crate::CullingVolume;

/// Symmetric perspective frustum, optionally shifted by `x_offset`/`y_offset`
/// on the near plane.
#[derive(Debug, Clone, PartialEq)]
pub struct PerspectiveFrustum {
    pub fov: f64,
    pub aspect_ratio: f64,
    pub near: f64,
    pub far: f64,
    pub x_offset: f64,
    pub y_offset: f64,
}
impl Default for PerspectiveFrustum {
    fn default() -> Self {
        Self {
            fov: 60.0_f64.to_radians(),
            aspect_ratio: 1.0,
            near: 1.0,
            far: 500000000.0,
            x_offset: 0.0,
            y_offset: 0.0,
        }
    }
}
impl PerspectiveFrustum {
    pub fn fovy(&self) -> f64 {
        if self.aspect_ratio <= 1.0 {
            self.fov
        } else {
            ((self.fov * 0.5).tan() / self.aspect_ratio).atan() * 2.0
        }
    }
    pub fn compute_culling_volume(
        &self,
        position: &DVec3,
        direction: &DVec3,
        up: &DVec3,
    ) -> CullingVolume {
        let position = *position;
        let direction = *direction;
        let up = *up;

        let t = self.near * (0.5 * self.fovy()).tan() + self.y_offset;
        let b = -self.near * (0.5 * self.fovy()).tan() + self.y_offset;
        let r = self.aspect_ratio * self.near * (0.5 * self.fovy()).tan() + self.x_offset;
        let l = -self.aspect_ratio * self.near * (0.5 * self.fovy()).tan() + self.x_offset;
        let n = self.near;
        let f = self.far;

        let right = direction.cross(up);
        let near_center = position + direction * n;
        let far_center = position + direction * f;

        let plane_through = |normal: DVec3| normal.extend(-normal.dot(position));

        let left = (near_center + right * l - position)
            .normalize()
            .cross(up)
            .normalize();
        let right_normal = up.cross(near_center + right * r - position).normalize();
        let bottom = right.cross(near_center + up * b - position).normalize();
        let top = (near_center + up * t - position).cross(right).normalize();

        CullingVolume {
            planes: [
                plane_through(left),
                plane_through(right_normal),
                plane_through(bottom),
                plane_through(top),
                direction.extend(-direction.dot(near_center)),
                (-direction).extend(direction.dot(far_center)),
            ],
        }
    }
}

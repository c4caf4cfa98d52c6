use bevy::math::{DMat4, DVec4};

use crate::{BoundingVolume, Intersect, Plane};

/// Six inward-facing planes (left, right, bottom, top, near, far).
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CullingVolume {
    pub planes: [DVec4; 6],
}
impl CullingVolume {
    /// Extracts the planes of an OpenGL style view-projection matrix
    /// (clip depth in `[-1, 1]`).
    pub fn from_view_projection(matrix: &DMat4) -> Self {
        let r0 = matrix.row(0);
        let r1 = matrix.row(1);
        let r2 = matrix.row(2);
        let r3 = matrix.row(3);
        let planes = [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r3 + r2, r3 - r2].map(normalize_plane);
        Self { planes }
    }
    pub fn compute_visibility(&self, bounding_volume: &dyn BoundingVolume) -> Intersect {
        let mut intersecting = false;
        for plane in self.planes.iter() {
            match bounding_volume.intersect_plane(&Plane::from_vec4(plane)) {
                Intersect::Outside => return Intersect::Outside,
                Intersect::Intersecting => intersecting = true,
                Intersect::Inside => {}
            }
        }
        if intersecting {
            Intersect::Intersecting
        } else {
            Intersect::Inside
        }
    }
}

fn normalize_plane(plane: DVec4) -> DVec4 {
    let length = plane.truncate().length();
    if length > 0.0 {
        plane / length
    } else {
        plane
    }
}

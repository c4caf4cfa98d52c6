use bevy::math::{DMat4, DVec3};

use crate::{abs_rotation_scale, BoundingVolume, Intersect, Plane};

/// Box described by its center and the positive half-extents along x, y, z.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AxisAlignedBoundingBox {
    pub center: DVec3,
    pub half_extents: DVec3,
}
impl AxisAlignedBoundingBox {
    pub fn new(center: DVec3, half_extents: DVec3) -> Self {
        Self {
            center,
            half_extents: half_extents.abs(),
        }
    }
    /// Reads a 3D Tiles `boundingVolume.box`
    /// `[cx,cy,cz, xx,xy,xz, yx,yy,yz, zx,zy,zz]`. Only the diagonal of the
    /// half-axes matrix (indices 3, 7, 11) is used, so rotated boxes are
    /// treated as axis aligned.
    pub fn from_box_array(values: &[f64]) -> Option<Self> {
        if values.len() < 12 {
            return None;
        }
        let center = DVec3::new(*values.first()?, *values.get(1)?, *values.get(2)?);
        let half_extents = DVec3::new(*values.get(3)?, *values.get(7)?, *values.get(11)?);
        Some(Self::new(center, half_extents))
    }
    /// Reads a 3D Tiles `boundingVolume.sphere` `[cx,cy,cz,radius]` as the
    /// box enclosing it.
    pub fn from_sphere_array(values: &[f64]) -> Option<Self> {
        match values {
            [x, y, z, radius] => Some(Self::new(
                DVec3::new(*x, *y, *z),
                DVec3::splat(*radius),
            )),
            _ => None,
        }
    }
    pub fn minimum(&self) -> DVec3 {
        self.center - self.half_extents
    }
    pub fn maximum(&self) -> DVec3 {
        self.center + self.half_extents
    }
    /// The smallest axis aligned box containing this box after `matrix`.
    pub fn transform(&self, matrix: &DMat4) -> Self {
        Self {
            center: matrix.transform_point3(self.center),
            half_extents: abs_rotation_scale(matrix) * self.half_extents,
        }
    }
    /// Zero when `point` is inside the box.
    pub fn distance_squared_to(&self, point: &DVec3) -> f64 {
        let outside = ((*point - self.center).abs() - self.half_extents).max(DVec3::ZERO);
        outside.length_squared()
    }
    pub fn distance_to(&self, point: &DVec3) -> f64 {
        self.distance_squared_to(point).sqrt()
    }
    pub fn intersect_plane(&self, plane: &Plane) -> Intersect {
        let h = self.half_extents;
        let normal = plane.normal;
        let e = h.x * normal.x.abs() + h.y * normal.y.abs() + h.z * normal.z.abs();
        let s = self.center.dot(normal) + plane.distance;

        if s - e > 0. {
            return Intersect::Inside;
        }
        if s + e < 0. {
            // normals point inward
            return Intersect::Outside;
        }
        Intersect::Intersecting
    }
}
impl BoundingVolume for AxisAlignedBoundingBox {
    fn intersect_plane(&self, plane: &Plane) -> Intersect {
        AxisAlignedBoundingBox::intersect_plane(self, plane)
    }
}

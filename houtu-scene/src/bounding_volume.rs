use crate::Plane;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intersect {
    /// Entirely on the negative side of a plane, or outside a volume.
    Outside,
    Intersecting,
    Inside,
}

pub trait BoundingVolume {
    fn intersect_plane(&self, plane: &Plane) -> Intersect;
}

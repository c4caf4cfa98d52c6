use bevy::math::{DVec3, DVec4};

/// A plane in Hessian normal form: `normal . p + distance = 0`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Plane {
    pub normal: DVec3,
    pub distance: f64,
}
impl Plane {
    pub fn new(normal: DVec3, distance: f64) -> Self {
        Self { normal, distance }
    }
    pub fn from_vec4(coefficients: &DVec4) -> Self {
        Self {
            normal: coefficients.truncate(),
            distance: coefficients.w,
        }
    }
    pub fn get_point_distance(&self, point: DVec3) -> f64 {
        self.normal.dot(point) + self.distance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_distance_is_signed() {
        let plane = Plane::new(DVec3::Z, -5.0);
        assert_eq!(plane.get_point_distance(DVec3::new(0.0, 0.0, 7.0)), 2.0);
        assert_eq!(plane.get_point_distance(DVec3::ZERO), -5.0);
    }

    #[test]
    fn from_vec4_splits_coefficients() {
        let plane = Plane::from_vec4(&DVec4::new(0.0, 1.0, 0.0, -2.0));
        assert_eq!(plane.normal, DVec3::Y);
        assert_eq!(plane.get_point_distance(DVec3::new(3.0, 9.0, 4.0)), 7.0);
    }
}

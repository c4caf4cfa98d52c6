use bevy::math::DVec3;

/// A half line, used for picking. `direction` is kept unit length.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Ray {
    pub origin: DVec3,
    pub direction: DVec3,
}
impl Ray {
    pub fn new(origin: DVec3, direction: DVec3) -> Self {
        Self {
            origin,
            direction: direction.normalize_or_zero(),
        }
    }
    pub fn get_point(&self, t: f64) -> DVec3 {
        self.origin + self.direction * t
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_is_normalized() {
        let ray = Ray::new(DVec3::ZERO, DVec3::new(0.0, 0.0, -10.0));
        assert_eq!(ray.direction, DVec3::NEG_Z);
        assert_eq!(ray.get_point(3.0), DVec3::new(0.0, 0.0, -3.0));
    }
}

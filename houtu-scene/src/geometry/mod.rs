mod axis_aligned_bounding_box;
mod plane;
mod ray;

pub use axis_aligned_bounding_box::*;
pub use intersection_tests::*;
pub use plane::*;
pub use ray::*;

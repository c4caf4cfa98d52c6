use bevy::math::{DMat3, DMat4};

pub const EPSILON15: f64 = 0.000000000000001;

/// Builds a matrix from the 16 column-major numbers used by tileset
/// manifests. Returns `None` when the slice has any other length.
pub fn matrix_from_column_major(values: &[f64]) -> Option<DMat4> {
    let array: &[f64; 16] = values.try_into().ok()?;
    Some(DMat4::from_cols_array(array))
}

/// Upper 3x3 of `matrix` with every element replaced by its absolute value.
/// Multiplying half-extents by it gives the extents of the transformed box.
pub fn abs_rotation_scale(matrix: &DMat4) -> DMat3 {
    let m = DMat3::from_mat4(*matrix);
    DMat3::from_cols(m.x_axis.abs(), m.y_axis.abs(), m.z_axis.abs())
}

//! Attribute conventions shared by windowed operators (convolution and
//! pooling) so the partitioner and accelerator lowerings read them the same
//! way.

/// Expands a 1-, 2- or 4-value padding attribute to `[top, left, bottom, right]`.
pub fn expand_padding_2d(values: &[i64]) -> Option<[i64; 4]> {
    match values {
        [all] => Some([*all; 4]),
        [vertical, horizontal] => Some([*vertical, *horizontal, *vertical, *horizontal]),
        [top, left, bottom, right] => Some([*top, *left, *bottom, *right]),
        _ => None,
    }
}

/// Expands a 1- or 2-value attribute to `[height, width]`.
pub fn expand_pair(values: &[i64]) -> Option<[i64; 2]> {
    match values {
        [both] => Some([*both; 2]),
        [height, width] => Some([*height, *width]),
        _ => None,
    }
}

/// Output extent of a sliding window along one axis.
pub fn window_output_extent(
    input: usize,
    pad_before: usize,
    pad_after: usize,
    window: usize,
    stride: usize,
    dilation: usize,
) -> Option<usize> {
    let padded = input + pad_before + pad_after;
    let effective = dilation.checked_mul(window.checked_sub(1)?)? + 1;
    if padded < effective || stride == 0 {
        return None;
    }
    Some((padded - effective) / stride + 1)
}

//! Jet colour map for error overlays

/// Map `value` in `[min, max]` onto the jet palette (blue, cyan, yellow, red).
/// Values outside the range are clamped; an empty range maps to the low end.
pub fn jet(value: f64, min: f64, max: f64) -> [u8; 3] {
    let span = max - min;
    let t = if span > 0.0 && value.is_finite() {
        ((value - min) / span).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let channel = |center: f64| {
        let level = (1.5 - (4.0 * t - center).abs()).clamp(0.0, 1.0);
        (level * 255.0).round() as u8
    };
    [channel(3.0), channel(2.0), channel(1.0)]
}

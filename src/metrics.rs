//! Scoring metrics for I-V traces
//!
//! Pure, stateless functions. Nothing here touches an instrument or a clock,
//! which keeps every stage score reproducible from a stored trace.
//!
//! Degenerate inputs never error: the loop area and the retention exponent
//! return `0.0` when there is not enough data to compute them. Callers must
//! not read that sentinel as "measured and found to be zero".
//!
//! References:
//! - Chua (1971): memristor pinched hysteresis
//! - Shoelace formula (Gauss area) for closed polygonal loops

/// Default epsilon floor for current ratios (amps)
pub const DEFAULT_EPS: f64 = 1e-12;

/// Area enclosed by an I-V trace, taken in sweep order.
///
/// Shoelace area over the raw samples with a cyclic index:
/// `0.5 * |Σ vᵢ·i₍ᵢ₋₁₎ − iᵢ·v₍ᵢ₋₁₎|`.
///
/// The result depends on sample order; pass points exactly as they were
/// swept, never sorted by voltage. Returns `0.0` for fewer than 3 samples
/// and for a path that retraces itself.
///
/// # Examples
///
/// ```rust
/// use memristor_pipeline::metrics::hysteresis_loop_area;
///
/// let v = [0.0, 1.0, 1.0, 0.0, 0.0, -1.0, -1.0, 0.0];
/// let i = [0.0, 0.0, 1.0, 1.0, 0.0, 0.0, -1.0, -1.0];
/// assert!(hysteresis_loop_area(&v, &i) > 0.0);
/// ```
#[must_use]
pub fn hysteresis_loop_area(voltage: &[f64], current: &[f64]) -> f64 {
    let n = voltage.len().min(current.len());
    if n < 3 {
        return 0.0;
    }

    let twice_area: f64 = (0..n)
        .map(|k| {
            let prev = (k + n - 1) % n;
            voltage[k] * current[prev] - current[k] * voltage[prev]
        })
        .sum();

    0.5 * twice_area.abs()
}

/// On/off contrast `(|i_on| + eps) / (|i_off| + eps)`.
///
/// The epsilon floor keeps the ratio finite at exactly zero current;
/// `on_off_ratio(0.0, 0.0, eps)` is `1.0` for any positive `eps`.
#[must_use]
pub fn on_off_ratio(i_on: f64, i_off: f64, eps: f64) -> f64 {
    (i_on.abs() + eps) / (i_off.abs() + eps)
}

/// Normalized difference `(i_on − i_off) / (|i_off| + eps)`.
#[must_use]
pub fn photoresponse(i_on: f64, i_off: f64, eps: f64) -> f64 {
    (i_on - i_off) / (i_off.abs() + eps)
}

/// Power-law decay exponent of a retention curve.
///
/// Fits `I(t) ≈ C·t^(−α)` by ordinary least squares on `(ln t, ln I)`,
/// using only points with `t > 0` and `I > 0`. Returns the fitted `α`, or
/// `0.0` when fewer than two usable points remain or all usable times are
/// equal.
///
/// # Examples
///
/// ```rust
/// use memristor_pipeline::metrics::retention_alpha;
///
/// let alpha = retention_alpha(&[1.0, 10.0, 100.0], &[1.0, 0.1, 0.01]);
/// assert!((alpha - 1.0).abs() < 1e-9);
/// ```
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn retention_alpha(times: &[f64], currents: &[f64]) -> f64 {
    let points: Vec<(f64, f64)> = times
        .iter()
        .zip(currents)
        .filter(|(t, i)| **t > 0.0 && **i > 0.0)
        .map(|(t, i)| (t.ln(), i.ln()))
        .collect();

    if points.len() < 2 {
        return 0.0;
    }

    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;

    let (sxy, sxx) = points.iter().fold((0.0, 0.0), |(sxy, sxx), (x, y)| {
        let dx = x - mean_x;
        (sxy + dx * (y - mean_y), sxx + dx * dx)
    });

    // Equal times leave only rounding noise in sxx; closely spaced ones still fit
    let scale = points.iter().map(|(x, _)| x.abs()).fold(0.0, f64::max);
    let noise = n * f64::EPSILON * scale;
    if sxx <= n * noise * noise {
        return 0.0;
    }

    -(sxy / sxx)
}

/// Arithmetic mean; `0.0` for an empty slice.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Median (average of the two middle values for even lengths).
///
/// Returns `None` for an empty slice. NaN values sort last.
#[must_use]
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some(0.5 * (sorted[mid - 1] + sorted[mid]))
    } else {
        Some(sorted[mid])
    }
}

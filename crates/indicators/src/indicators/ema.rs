/// Exponential moving average over the whole of `values` (oldest first).
///
/// `EMA_t = k * price_t + (1 - k) * EMA_{t-1}` with `k = 2 / (period + 1)`,
/// seeded at the first price, so the output has one value per input.
/// Recomputed from scratch on every call; nothing is cached.
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    let Some(&first) = values.first() else {
        return Vec::new();
    };
    let k = 2.0 / (period.max(1) as f64 + 1.0);

    let mut out = Vec::with_capacity(values.len());
    let mut ema_val = first;
    out.push(ema_val);
    for &price in &values[1..] {
        ema_val = price * k + ema_val * (1.0 - k);
        out.push(ema_val);
    }
    out
}

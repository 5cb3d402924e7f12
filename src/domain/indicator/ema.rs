//! Exponential Moving Average, non-adjusted recursive form.
//!
//! k = 2/(n+1), EMA[0] = C[0], then EMA[i] = C[i]*k + EMA[i-1]*(1-k).
//! Every bar is valid; there is no SMA warmup seed.

/// EMA series over `values`. Empty when `period == 0` or `values` is empty.
pub fn calculate_ema(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.is_empty() {
        return Vec::new();
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut ema = values[0];
    out.push(ema);

    for &value in &values[1..] {
        ema = value * k + ema * (1.0 - k);
        out.push(ema);
    }

    out
}

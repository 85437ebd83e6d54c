//! Small descriptive statistics shared by factors, regime observations and
//! the risk model.

/// Arithmetic mean. Returns 0.0 for an empty slice.
pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Sample standard deviation (n − 1). Returns 0.0 with fewer than 2 values.
pub fn std_dev(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let m = mean(data);
    let var = data.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (data.len() - 1) as f64;
    var.sqrt()
}

/// Index of the largest value; ties resolve to the lowest index.
pub fn argmax(data: &[f64]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, v) in data.iter().enumerate() {
        match best {
            Some(b) if data[b] >= *v => {}
            _ => best = Some(i),
        }
    }
    best
}

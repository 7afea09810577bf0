#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowParams {
    pub width: f64,
    pub level: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoWindowMode {
    #[default]
    MinMax,
    Percentile,
}

impl AutoWindowMode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "minmax" | "min_max" => Some(Self::MinMax),
            "percentile" => Some(Self::Percentile),
            _ => None,
        }
    }

    pub fn estimate(self, rescaled: &[f64]) -> WindowParams {
        match self {
            Self::MinMax => estimate(rescaled),
            Self::Percentile => {
                estimate_percentile(rescaled, DEFAULT_LOW_PERCENTILE, DEFAULT_HIGH_PERCENTILE)
            }
        }
    }
}

pub const DEFAULT_LOW_PERCENTILE: f64 = 1.0;
pub const DEFAULT_HIGH_PERCENTILE: f64 = 99.0;

const EMPTY_WINDOW: WindowParams = WindowParams {
    width: 1.0,
    level: 0.0,
};

fn min_max(values: &[f64]) -> Option<(f64, f64)> {
    let mut iter = values.iter().copied().filter(|v| v.is_finite());
    let first = iter.next()?;
    Some(iter.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
}

fn window_between(low: f64, high: f64) -> WindowParams {
    let width = high - low;
    WindowParams {
        width: if width > 0.0 { width } else { 1.0 },
        level: (low + high) / 2.0,
    }
}

/// Window spanning the full sample range.
pub fn estimate(rescaled: &[f64]) -> WindowParams {
    match min_max(rescaled) {
        Some((low, high)) => window_between(low, high),
        None => EMPTY_WINDOW,
    }
}

/// Window between the nearest-rank `low` and `high` percentiles, clamped to 0..=100.
pub fn estimate_percentile(rescaled: &[f64], low: f64, high: f64) -> WindowParams {
    let mut sorted = rescaled
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .collect::<Vec<_>>();
    if sorted.is_empty() {
        return EMPTY_WINDOW;
    }
    sorted.sort_by(f64::total_cmp);

    let rank = |percentile: f64| {
        let p = percentile.clamp(0.0, 100.0);
        let n = sorted.len();
        let index = ((p / 100.0) * n as f64).ceil() as usize;
        sorted[index.clamp(1, n) - 1]
    };
    let (low, high) = if low <= high { (low, high) } else { (high, low) };
    window_between(rank(low), rank(high))
}

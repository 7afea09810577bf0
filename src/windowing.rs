use crate::auto_window::{AutoWindowMode, WindowParams};
use crate::dataset::Rescale;

pub const MAX_INTENSITY: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WindowSpec {
    Auto,
    Fixed { width: f64, level: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowPreset {
    pub name: &'static str,
    pub spec: WindowSpec,
}

const fn fixed(name: &'static str, width: f64, level: f64) -> WindowPreset {
    WindowPreset {
        name,
        spec: WindowSpec::Fixed { width, level },
    }
}

pub const WINDOW_PRESETS: &[WindowPreset] = &[
    WindowPreset {
        name: "Auto",
        spec: WindowSpec::Auto,
    },
    fixed("Soft Tissue", 350.0, 40.0),
    fixed("Lung", 1500.0, -600.0),
    fixed("Bone", 2000.0, 300.0),
    fixed("Brain", 80.0, 40.0),
    fixed("Liver", 150.0, 30.0),
    fixed("Mediastinum", 350.0, 50.0),
];

pub fn preset_index(name: &str) -> Option<usize> {
    let wanted = name.trim();
    WINDOW_PRESETS.iter().position(|preset| {
        preset.name.eq_ignore_ascii_case(wanted)
            || preset.name.replace(' ', "_").eq_ignore_ascii_case(wanted)
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisplayBuffer {
    pub rows: usize,
    pub columns: usize,
    pub pixels: Vec<u8>,
    pub window: WindowParams,
}

pub fn rescale_samples(samples: &[i32], rescale: Rescale) -> Vec<f64> {
    samples
        .iter()
        .map(|&raw| f64::from(raw) * rescale.slope + rescale.intercept)
        .collect()
}

pub fn compute_display(
    samples: &[i32],
    rows: usize,
    columns: usize,
    rescale: Rescale,
    spec: WindowSpec,
    auto: AutoWindowMode,
) -> DisplayBuffer {
    let rescaled = rescale_samples(samples, rescale);
    let window = match spec {
        WindowSpec::Auto => auto.estimate(&rescaled),
        WindowSpec::Fixed { width, level } => WindowParams { width, level },
    };
    let pixels = apply_window(&rescaled, window);

    DisplayBuffer {
        rows,
        columns,
        pixels,
        window,
    }
}

fn apply_window(rescaled: &[f64], window: WindowParams) -> Vec<u8> {
    if window.width <= 0.0 {
        return vec![MAX_INTENSITY; rescaled.len()];
    }

    let low = window.level - window.width / 2.0;
    let high = window.level + window.width / 2.0;
    let scale = f64::from(MAX_INTENSITY);
    rescaled
        .iter()
        .map(|&value| {
            let clipped = value.clamp(low, high);
            ((clipped - low) / (high - low) * scale).round() as u8
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDENTITY: Rescale = Rescale {
        slope: 1.0,
        intercept: 0.0,
    };

    fn preset(name: &str) -> WindowSpec {
        WINDOW_PRESETS[preset_index(name).expect("known preset")].spec
    }

    #[test]
    fn preset_catalog_is_ordered_with_auto_first() {
        let names = WINDOW_PRESETS.iter().map(|preset| preset.name).collect::<Vec<_>>();
        assert_eq!(
            names,
            vec!["Auto", "Soft Tissue", "Lung", "Bone", "Brain", "Liver", "Mediastinum"]
        );
        assert_eq!(preset_index("soft_tissue"), Some(1));
        assert_eq!(preset_index("nope"), None);
    }

    #[test]
    fn bone_window_maps_its_level_to_mid_gray() {
        let samples = vec![300; 12];
        let buffer =
            compute_display(&samples, 3, 4, IDENTITY, preset("Bone"), AutoWindowMode::MinMax);
        assert!(buffer.pixels.iter().all(|&value| value == 128));
        assert_eq!(buffer.pixels.len(), 12);
    }

    #[test]
    fn window_bounds_map_to_range_ends_and_clip_outside() {
        let spec = WindowSpec::Fixed {
            width: 100.0,
            level: 50.0,
        };
        let samples = [-500, 0, 50, 100, 900];
        let buffer = compute_display(&samples, 1, 5, IDENTITY, spec, AutoWindowMode::MinMax);
        assert_eq!(buffer.pixels, vec![0, 0, 128, 255, 255]);
    }

    #[test]
    fn rescale_runs_before_windowing() {
        let rescale = Rescale {
            slope: 2.0,
            intercept: -1024.0,
        };
        let spec = WindowSpec::Fixed {
            width: 2000.0,
            level: 300.0,
        };
        // 662 * 2 - 1024 = 300, the level.
        let buffer = compute_display(&[662], 1, 1, rescale, spec, AutoWindowMode::MinMax);
        assert_eq!(buffer.pixels, vec![128]);
    }

    #[test]
    fn non_positive_width_saturates() {
        let spec = WindowSpec::Fixed {
            width: 0.0,
            level: 10.0,
        };
        let buffer = compute_display(&[0, 10, 20], 1, 3, IDENTITY, spec, AutoWindowMode::MinMax);
        assert_eq!(buffer.pixels, vec![MAX_INTENSITY; 3]);
    }

    #[test]
    fn auto_window_stretches_full_range_and_reports_params() {
        let mode = AutoWindowMode::MinMax;
        let buffer = compute_display(&[10, 20, 30], 1, 3, IDENTITY, WindowSpec::Auto, mode);
        assert_eq!(buffer.pixels, vec![0, 128, 255]);
        assert_eq!(buffer.window, WindowParams { width: 20.0, level: 20.0 });
    }

    #[test]
    fn display_is_deterministic_and_input_is_untouched() {
        let samples = vec![-1000, -200, 0, 40, 75, 400, 3000];
        let copy = samples.clone();
        for &preset in WINDOW_PRESETS {
            let mode = AutoWindowMode::Percentile;
            let a = compute_display(&samples, 1, 7, IDENTITY, preset.spec, mode);
            let b = compute_display(&samples, 1, 7, IDENTITY, preset.spec, mode);
            assert_eq!(a, b, "{}", preset.name);
        }
        assert_eq!(samples, copy);
    }
}

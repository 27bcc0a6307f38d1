//! Closed set of visual effects driven by frame features.
//!
//! Every effect kind carries its own typed parameters and is painted through
//! [`PAINTERS`], indexed by [`EffectKind`].

use serde::{Deserialize, Serialize};

use crate::{mapping::FrameFeatures, render::Surface};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    Pulse = 0,
    Bars = 1,
    Flash = 2,
}

/// Centred square whose size follows loudness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulseParams {
    pub color: [u8; 3],
    /// Half-size at silence, as a fraction of the shorter surface edge.
    pub min_scale: f32,
    /// Half-size at full loudness.
    pub max_scale: f32,
}

/// One vertical bar per named band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarsParams {
    pub color: [u8; 3],
    pub bands: Vec<String>,
    /// Band energy drawn as an empty bar.
    pub floor: f32,
    /// Band energy drawn as a full-height bar.
    pub ceiling: f32,
}

/// Full-surface flash once loudness crosses a threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlashParams {
    pub color: [u8; 3],
    pub threshold: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Effect {
    Pulse(PulseParams),
    Bars(BarsParams),
    Flash(FlashParams),
}

impl Effect {
    pub fn kind(&self) -> EffectKind {
        match self {
            Effect::Pulse(_) => EffectKind::Pulse,
            Effect::Bars(_) => EffectKind::Bars,
            Effect::Flash(_) => EffectKind::Flash,
        }
    }
}

type Painter = fn(&Effect, &FrameFeatures, &mut Surface);

/// Painters in [`EffectKind`] discriminant order.
pub const PAINTERS: [Painter; 3] = [paint_pulse, paint_bars, paint_flash];

/// Paints `effect` onto `surface`.
pub fn paint(effect: &Effect, features: &FrameFeatures, surface: &mut Surface) {
    PAINTERS[effect.kind() as usize](effect, features, surface);
}

/// A named list of effects plus the colour they are painted over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneDescriptor {
    pub name: String,
    pub background: [u8; 3],
    pub effects: Vec<Effect>,
}

impl SceneDescriptor {
    pub fn demo() -> Self {
        Self {
            name: "Demo".to_string(),
            background: [8, 8, 16],
            effects: vec![
                Effect::Bars(BarsParams {
                    color: [40, 160, 220],
                    bands: ["sub", "bass", "low_mid", "mid", "high_mid", "presence", "brilliance"]
                        .map(String::from)
                        .to_vec(),
                    floor: -40.0,
                    ceiling: 60.0,
                }),
                Effect::Pulse(PulseParams {
                    color: [240, 90, 60],
                    min_scale: 0.05,
                    max_scale: 0.35,
                }),
                Effect::Flash(FlashParams {
                    color: [255, 255, 255],
                    threshold: 0.95,
                }),
            ],
        }
    }
}

impl Default for SceneDescriptor {
    fn default() -> Self {
        Self::demo()
    }
}

fn paint_pulse(effect: &Effect, features: &FrameFeatures, surface: &mut Surface) {
    let Effect::Pulse(params) = effect else {
        return;
    };

    let loudness = features.loudness.clamp(0.0, 1.0);
    let scale = params.min_scale + (params.max_scale - params.min_scale) * loudness;
    let edge = surface.width().min(surface.height()) as f32;
    let half = (edge * scale).round() as u32;
    let x = (surface.width() / 2).saturating_sub(half);
    let y = (surface.height() / 2).saturating_sub(half);
    surface.blend_rect(x, y, half * 2, half * 2, params.color, 1.0);
}

fn paint_bars(effect: &Effect, features: &FrameFeatures, surface: &mut Surface) {
    let Effect::Bars(params) = effect else {
        return;
    };
    if params.bands.is_empty() {
        return;
    }

    let span = params.ceiling - params.floor;
    let slot = surface.width() / params.bands.len() as u32;
    for (index, band) in params.bands.iter().enumerate() {
        let energy = features.band(band).unwrap_or(params.floor);
        let fill = if span > 0.0 {
            ((energy - params.floor) / span).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let bar_height = (surface.height() as f32 * fill).round() as u32;
        surface.blend_rect(
            index as u32 * slot,
            surface.height() - bar_height,
            slot.saturating_sub(1).max(1),
            bar_height,
            params.color,
            0.9,
        );
    }
}

fn paint_flash(effect: &Effect, features: &FrameFeatures, surface: &mut Surface) {
    let Effect::Flash(params) = effect else {
        return;
    };
    if features.loudness < params.threshold {
        return;
    }

    let (width, height) = (surface.width(), surface.height());
    surface.blend_rect(0, 0, width, height, params.color, 0.5);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(loudness: f32, bands: &[(&str, f32)]) -> FrameFeatures {
        FrameFeatures {
            loudness,
            bands: bands
                .iter()
                .map(|(name, energy)| (name.to_string(), *energy))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn painter_table_matches_kind_order() {
        let effects = SceneDescriptor::demo().effects;
        let kinds: Vec<_> = effects.iter().map(Effect::kind).collect();
        assert_eq!(kinds, vec![EffectKind::Bars, EffectKind::Pulse, EffectKind::Flash]);
        for kind in [EffectKind::Pulse, EffectKind::Bars, EffectKind::Flash] {
            assert!((kind as usize) < PAINTERS.len());
        }
    }

    #[test]
    fn pulse_grows_with_loudness() {
        let effect = Effect::Pulse(PulseParams {
            color: [255, 0, 0],
            min_scale: 0.0,
            max_scale: 0.5,
        });

        let mut quiet = Surface::new(20, 20);
        paint(&effect, &features(0.0, &[]), &mut quiet);
        assert_eq!(quiet.pixel(10, 10), Some([0, 0, 0, 255]));

        let mut loud = Surface::new(20, 20);
        paint(&effect, &features(1.0, &[]), &mut loud);
        assert_eq!(loud.pixel(0, 0), Some([255, 0, 0, 255]));
        assert_eq!(loud.pixel(19, 19), Some([255, 0, 0, 255]));
    }

    #[test]
    fn bars_follow_band_energy() {
        let effect = Effect::Bars(BarsParams {
            color: [0, 255, 0],
            bands: vec!["low".into(), "high".into()],
            floor: 0.0,
            ceiling: 1.0,
        });
        let mut surface = Surface::new(10, 10);
        paint(&effect, &features(0.0, &[("low", 1.0), ("high", 0.0)]), &mut surface);

        assert_ne!(surface.pixel(0, 0), Some([0, 0, 0, 255]));
        assert_eq!(surface.pixel(6, 9), Some([0, 0, 0, 255]));
    }

    #[test]
    fn flash_waits_for_the_threshold() {
        let effect = Effect::Flash(FlashParams {
            color: [255, 255, 255],
            threshold: 0.8,
        });
        let mut surface = Surface::new(2, 2);
        paint(&effect, &features(0.5, &[]), &mut surface);
        assert_eq!(surface.pixel(0, 0), Some([0, 0, 0, 255]));

        paint(&effect, &features(0.9, &[]), &mut surface);
        assert_eq!(surface.pixel(0, 0), Some([128, 128, 128, 255]));
    }

    #[test]
    fn effects_deserialize_from_tagged_json() {
        let effect: Effect =
            serde_json::from_str(r#"{ "kind": "flash", "color": [1, 2, 3], "threshold": 0.5 }"#)
                .unwrap();
        assert_eq!(effect.kind(), EffectKind::Flash);
    }
}

//! Easing curves for the two-pass frame application.
//!
//! Only the curve shapes live here; smoothness of any animation driven by
//! them is not something the manager promises.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Easing {
    EaseInSine,
    EaseOutSine,
    #[default]
    EaseInOutSine,
    EaseInQuad,
    EaseOutQuad,
    EaseInOutQuad,
    EaseInCubic,
    EaseOutCubic,
    EaseInOutCubic,
    EaseInQuart,
    EaseOutQuart,
    EaseInOutQuart,
    EaseInQuint,
    EaseOutQuint,
    EaseInOutQuint,
    EaseInExpo,
    EaseOutExpo,
    EaseInOutExpo,
    EaseInCirc,
    EaseOutCirc,
    EaseInOutCirc,
}

pub const ALL_EASINGS: [Easing; 21] = [
    Easing::EaseInSine,
    Easing::EaseOutSine,
    Easing::EaseInOutSine,
    Easing::EaseInQuad,
    Easing::EaseOutQuad,
    Easing::EaseInOutQuad,
    Easing::EaseInCubic,
    Easing::EaseOutCubic,
    Easing::EaseInOutCubic,
    Easing::EaseInQuart,
    Easing::EaseOutQuart,
    Easing::EaseInOutQuart,
    Easing::EaseInQuint,
    Easing::EaseOutQuint,
    Easing::EaseInOutQuint,
    Easing::EaseInExpo,
    Easing::EaseOutExpo,
    Easing::EaseInOutExpo,
    Easing::EaseInCirc,
    Easing::EaseOutCirc,
    Easing::EaseInOutCirc,
];

impl Easing {
    /// Maps `t` in [0, 1] to the eased progress in [0, 1].
    pub fn apply(self, t: f64) -> f64 {
        use Easing::*;
        match self {
            EaseInSine => 1.0 - ((t * PI) / 2.0).cos(),
            EaseOutSine => ((t * PI) / 2.0).sin(),
            EaseInOutSine => -((PI * t).cos() - 1.0) / 2.0,
            EaseInQuad => t * t,
            EaseOutQuad => 1.0 - (1.0 - t) * (1.0 - t),
            EaseInOutQuad => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
                }
            }
            EaseInCubic => t.powi(3),
            EaseOutCubic => 1.0 - (1.0 - t).powi(3),
            EaseInOutCubic => {
                if t < 0.5 {
                    4.0 * t.powi(3)
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
                }
            }
            EaseInQuart => t.powi(4),
            EaseOutQuart => 1.0 - (1.0 - t).powi(4),
            EaseInOutQuart => {
                if t < 0.5 {
                    8.0 * t.powi(4)
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(4) / 2.0
                }
            }
            EaseInQuint => t.powi(5),
            EaseOutQuint => 1.0 - (1.0 - t).powi(5),
            EaseInOutQuint => {
                if t < 0.5 {
                    16.0 * t.powi(5)
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(5) / 2.0
                }
            }
            EaseInExpo => {
                if t == 0.0 { 0.0 } else { 2f64.powf(10.0 * t - 10.0) }
            }
            EaseOutExpo => {
                if t == 1.0 { 1.0 } else { 1.0 - 2f64.powf(-10.0 * t) }
            }
            EaseInOutExpo => {
                if t == 0.0 {
                    0.0
                } else if t == 1.0 {
                    1.0
                } else if t < 0.5 {
                    2f64.powf(20.0 * t - 10.0) / 2.0
                } else {
                    (2.0 - 2f64.powf(-20.0 * t + 10.0)) / 2.0
                }
            }
            EaseInCirc => 1.0 - (1.0 - t * t).sqrt(),
            EaseOutCirc => (1.0 - (t - 1.0) * (t - 1.0)).sqrt(),
            EaseInOutCirc => {
                if t < 0.5 {
                    (1.0 - (1.0 - (2.0 * t).powi(2)).sqrt()) / 2.0
                } else {
                    ((1.0 - (-2.0 * t + 2.0).powi(2)).sqrt() + 1.0) / 2.0
                }
            }
        }
    }
}

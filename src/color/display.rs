//! Displays and the views they offer.

use super::colorspace::Transfer;

/// White point of the extended Reinhard curve used by the `Tonemapped` view:
/// scene values at this level map to display 1.0.
pub const TONEMAP_WHITE: f32 = 4.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum View {
    Standard,
    Tonemapped,
    Raw,
}

impl View {
    pub fn name(self) -> &'static str {
        match self {
            View::Standard => "Standard",
            View::Tonemapped => "Tonemapped",
            View::Raw => "Raw",
        }
    }
}

#[derive(Debug)]
pub struct Display {
    pub name: &'static str,
    pub encoding: Transfer,
    pub views: &'static [View],
}

pub static DISPLAYS: &[Display] = &[
    Display {
        name: "sRGB",
        encoding: Transfer::Srgb,
        views: &[View::Standard, View::Tonemapped, View::Raw],
    },
    Display {
        name: "Rec.1886",
        encoding: Transfer::Gamma(2.4),
        views: &[View::Standard, View::Tonemapped, View::Raw],
    },
];

pub fn find_display(name: &str) -> Option<&'static Display> {
    DISPLAYS.iter().find(|d| d.name.eq_ignore_ascii_case(name))
}

impl Display {
    pub fn find_view(&self, name: &str) -> Option<View> {
        self.views
            .iter()
            .copied()
            .find(|v| v.name().eq_ignore_ascii_case(name))
    }
}

pub fn tonemap(v: f32) -> f32 {
    let x = v.max(0.0);
    x * (1.0 + x / (TONEMAP_WHITE * TONEMAP_WHITE)) / (1.0 + x)
}

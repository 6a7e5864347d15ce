/// Four RGB colours shared by every visualization mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThemeColors {
    pub background: [f32; 3],
    pub primary: [f32; 3],
    pub secondary: [f32; 3],
    pub accent: [f32; 3],
}

impl ThemeColors {
    pub fn lerp(&self, to: &Self, t: f32) -> Self {
        let mix = |a: [f32; 3], b: [f32; 3]| {
            [
                a[0] + (b[0] - a[0]) * t,
                a[1] + (b[1] - a[1]) * t,
                a[2] + (b[2] - a[2]) * t,
            ]
        };
        Self {
            background: mix(self.background, to.background),
            primary: mix(self.primary, to.primary),
            secondary: mix(self.secondary, to.secondary),
            accent: mix(self.accent, to.accent),
        }
    }

    pub fn clear_color(&self) -> wgpu::Color {
        wgpu::Color {
            r: f64::from(self.background[0]),
            g: f64::from(self.background[1]),
            b: f64::from(self.background[2]),
            a: 1.0,
        }
    }
}

pub struct Theme {
    pub name: &'static str,
    pub colors: ThemeColors,
}

pub const THEMES: [Theme; 9] = [
    Theme {
        name: "Synthwave",
        colors: ThemeColors {
            background: [0.05, 0.0, 0.1],
            primary: [1.0, 0.2, 0.8],
            secondary: [0.2, 0.6, 1.0],
            accent: [1.0, 0.4, 0.1],
        },
    },
    Theme {
        name: "Monochrome",
        colors: ThemeColors {
            background: [0.0, 0.0, 0.0],
            primary: [1.0, 1.0, 1.0],
            secondary: [0.6, 0.6, 0.6],
            accent: [0.9, 0.9, 0.9],
        },
    },
    Theme {
        name: "Fire",
        colors: ThemeColors {
            background: [0.05, 0.01, 0.0],
            primary: [1.0, 0.3, 0.0],
            secondary: [1.0, 0.8, 0.0],
            accent: [1.0, 0.1, 0.1],
        },
    },
    Theme {
        name: "Ocean",
        colors: ThemeColors {
            background: [0.0, 0.02, 0.08],
            primary: [0.0, 0.6, 1.0],
            secondary: [0.0, 1.0, 0.8],
            accent: [0.2, 0.3, 1.0],
        },
    },
    Theme {
        name: "Neon",
        colors: ThemeColors {
            background: [0.0, 0.0, 0.02],
            primary: [0.0, 1.0, 0.4],
            secondary: [1.0, 0.0, 1.0],
            accent: [0.0, 1.0, 1.0],
        },
    },
    Theme {
        name: "Sunset",
        colors: ThemeColors {
            background: [0.08, 0.02, 0.04],
            primary: [1.0, 0.5, 0.2],
            secondary: [0.9, 0.2, 0.4],
            accent: [1.0, 0.8, 0.3],
        },
    },
    Theme {
        name: "Matrix",
        colors: ThemeColors {
            background: [0.0, 0.02, 0.0],
            primary: [0.0, 1.0, 0.0],
            secondary: [0.0, 0.6, 0.0],
            accent: [0.4, 1.0, 0.4],
        },
    },
    Theme {
        name: "Aurora",
        colors: ThemeColors {
            background: [0.0, 0.02, 0.05],
            primary: [0.2, 1.0, 0.6],
            secondary: [0.4, 0.2, 1.0],
            accent: [0.0, 0.8, 1.0],
        },
    },
    Theme {
        name: "Custom",
        colors: ThemeColors {
            background: [0.02, 0.02, 0.02],
            primary: [0.8, 0.8, 0.8],
            secondary: [0.5, 0.5, 0.5],
            accent: [1.0, 1.0, 1.0],
        },
    },
];

/// Theme at `index`, wrapping out-of-range indices.
pub fn theme(index: usize) -> &'static Theme {
    &THEMES[index % THEMES.len()]
}

/// Catalogue index of a theme by name, ignoring case.
pub fn index_of(name: &str) -> Option<usize> {
    THEMES.iter().position(|t| t.name.eq_ignore_ascii_case(name))
}

pub fn next_theme_index(index: usize) -> usize {
    (index + 1) % THEMES.len()
}

/// Linear blend from the colours on screen when the theme changed to the new target.
#[derive(Debug, Clone, Copy)]
pub struct ColorTransition {
    from: ThemeColors,
    current: ThemeColors,
    target: ThemeColors,
    progress: f32,
}

impl ColorTransition {
    /// Progress gained per second.
    pub const RATE: f32 = 2.0;

    pub fn new(colors: ThemeColors) -> Self {
        Self {
            from: colors,
            current: colors,
            target: colors,
            progress: 1.0,
        }
    }

    pub fn set_target(&mut self, target: ThemeColors) {
        if target == self.target {
            return;
        }
        self.from = self.current;
        self.target = target;
        self.progress = 0.0;
    }

    pub fn advance(&mut self, dt: f32) -> &ThemeColors {
        if self.progress < 1.0 {
            self.progress = (self.progress + dt * Self::RATE).min(1.0);
            self.current = if self.progress >= 1.0 {
                self.target
            } else {
                self.from.lerp(&self.target, self.progress)
            };
        }
        &self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycling_from_last_wraps_to_first() {
        assert_eq!(next_theme_index(THEMES.len() - 1), 0);
    }

    #[test]
    fn cycling_k_times_returns_to_start() {
        for start in 0..THEMES.len() {
            let mut index = start;
            for _ in 0..THEMES.len() {
                index = next_theme_index(index);
            }
            assert_eq!(index, start);
        }
    }

    #[test]
    fn theme_lookup_ignores_case() {
        assert_eq!(index_of("Fire"), Some(2));
        assert_eq!(index_of("MATRIX"), Some(6));
        assert_eq!(index_of("vaporwave"), None);
    }

    #[test]
    fn out_of_range_index_wraps() {
        assert_eq!(theme(THEMES.len() + 2).name, THEMES[2].name);
    }

    #[test]
    fn transition_reaches_target_exactly() {
        let mut t = ColorTransition::new(THEMES[0].colors);
        t.set_target(THEMES[3].colors);
        let mut frames = 0;
        while t.progress < 1.0 {
            t.advance(1.0 / 60.0);
            frames += 1;
        }
        assert_eq!(t.current, THEMES[3].colors);
        assert!((29..=31).contains(&frames));
    }

    #[test]
    fn transition_midway_is_blend() {
        let mut t = ColorTransition::new(THEMES[1].colors);
        t.set_target(THEMES[0].colors);
        let c = *t.advance(0.25);
        // Monochrome bg 0.0 -> Synthwave bg 0.1 (blue) at progress 0.5
        assert!((c.background[2] - 0.05).abs() < 1e-6);
    }

    #[test]
    fn retarget_mid_transition_starts_from_current() {
        let mut t = ColorTransition::new(THEMES[1].colors);
        t.set_target(THEMES[0].colors);
        let mid = *t.advance(0.25);
        t.set_target(THEMES[2].colors);
        assert_eq!(t.progress, 0.0);
        let next = *t.advance(0.0);
        assert_eq!(next, mid);
    }
}

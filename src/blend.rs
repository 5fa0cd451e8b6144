// ============================================================================
// BLEND MODES — closed enumeration + pure per-mode color math
// ============================================================================
//
// The composite shaders dispatch on `BlendMode::to_u32()`; the functions in
// this module are the authoritative definition of each mode's math.  The
// WGSL switch in `gpu::shaders` mirrors them case-for-case, so a new mode
// means: add a variant, add its pure function, add its WGSL case.  Nothing
// else in the pipeline changes.

/// Layer blend mode.  The u32 dispatch keys are part of the shader contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BlendMode {
    #[default]
    Normal,
    /// Additive, clamped to 1.
    Add,
    Multiply,
    Screen,
    Difference,
    Overlay,
    Lighten,
    Darken,
    Exclusion,
}

impl BlendMode {
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Add,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Difference,
            BlendMode::Overlay,
            BlendMode::Lighten,
            BlendMode::Darken,
            BlendMode::Exclusion,
        ]
    }

    pub fn label(&self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Add => "Add",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Difference => "Difference",
            BlendMode::Overlay => "Overlay",
            BlendMode::Lighten => "Lighten",
            BlendMode::Darken => "Darken",
            BlendMode::Exclusion => "Exclusion",
        }
    }

    /// Shader dispatch key.  Must stay in sync with the WGSL switch.
    pub fn to_u32(self) -> u32 {
        match self {
            BlendMode::Normal => 0,
            BlendMode::Add => 1,
            BlendMode::Multiply => 2,
            BlendMode::Screen => 3,
            BlendMode::Difference => 4,
            BlendMode::Overlay => 5,
            BlendMode::Lighten => 6,
            BlendMode::Darken => 7,
            BlendMode::Exclusion => 8,
        }
    }

    /// Apply this mode to straight-alpha RGB channels.
    pub fn apply(self, base: [f32; 3], top: [f32; 3]) -> [f32; 3] {
        let f = match self {
            BlendMode::Normal => normal,
            BlendMode::Add => add,
            BlendMode::Multiply => multiply,
            BlendMode::Screen => screen,
            BlendMode::Difference => difference,
            BlendMode::Overlay => overlay,
            BlendMode::Lighten => lighten,
            BlendMode::Darken => darken,
            BlendMode::Exclusion => exclusion,
        };
        [f(base[0], top[0]), f(base[1], top[1]), f(base[2], top[2])]
    }
}

// ---- Per-channel blend functions (base = accumulator, top = layer) ----

pub fn normal(_base: f32, top: f32) -> f32 {
    top
}

pub fn add(base: f32, top: f32) -> f32 {
    (base + top).min(1.0)
}

pub fn multiply(base: f32, top: f32) -> f32 {
    base * top
}

pub fn screen(base: f32, top: f32) -> f32 {
    1.0 - (1.0 - base) * (1.0 - top)
}

pub fn difference(base: f32, top: f32) -> f32 {
    (base - top).abs()
}

pub fn overlay(base: f32, top: f32) -> f32 {
    if base < 0.5 {
        2.0 * base * top
    } else {
        1.0 - 2.0 * (1.0 - base) * (1.0 - top)
    }
}

pub fn lighten(base: f32, top: f32) -> f32 {
    base.max(top)
}

pub fn darken(base: f32, top: f32) -> f32 {
    base.min(top)
}

pub fn exclusion(base: f32, top: f32) -> f32 {
    base + top - 2.0 * base * top
}

/// Reference implementation of one composite pass's per-pixel output, as the
/// fragment shader computes it: blend the sampled layer color into the base,
/// weight by `sampled_alpha × opacity`, and widen coverage.
///
/// `base` and `sampled` are straight-alpha RGBA.
pub fn composite_pixel(base: [f32; 4], sampled: [f32; 4], mode: BlendMode, opacity: f32) -> [f32; 4] {
    let final_alpha = sampled[3] * opacity;
    let blended = mode.apply([base[0], base[1], base[2]], [sampled[0], sampled[1], sampled[2]]);
    [
        base[0] + (blended[0] - base[0]) * final_alpha,
        base[1] + (blended[1] - base[1]) * final_alpha,
        base[2] + (blended[2] - base[2]) * final_alpha,
        base[3].max(final_alpha),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    fn assert_rgba_eq(a: [f32; 4], b: [f32; 4]) {
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < EPS, "{:?} != {:?}", a, b);
        }
    }

    #[test]
    fn dispatch_keys_are_dense_and_stable() {
        for (i, mode) in BlendMode::all().iter().enumerate() {
            assert_eq!(mode.to_u32(), i as u32);
        }
    }

    #[test]
    fn add_clamps_to_one() {
        assert_eq!(add(0.8, 0.5), 1.0);
        assert!((add(0.25, 0.5) - 0.75).abs() < EPS);
    }

    #[test]
    fn screen_and_multiply_identities() {
        // multiply by white is identity, screen over black is identity
        assert!((multiply(0.37, 1.0) - 0.37).abs() < EPS);
        assert!((screen(0.0, 0.37) - 0.37).abs() < EPS);
    }

    #[test]
    fn difference_is_symmetric() {
        assert!((difference(0.2, 0.9) - difference(0.9, 0.2)).abs() < EPS);
        assert!((difference(0.2, 0.9) - 0.7).abs() < EPS);
    }

    #[test]
    fn normal_half_opacity_averages_base_and_layer() {
        // Opaque layer at 50% opacity over an opaque base: out = base/2 + layer/2.
        let base = [0.2, 0.4, 0.6, 1.0];
        let layer = [1.0, 0.0, 0.0, 1.0];
        let out = composite_pixel(base, layer, BlendMode::Normal, 0.5);
        assert_rgba_eq(out, [0.6, 0.2, 0.3, 1.0]);
    }

    #[test]
    fn reverse_order_compositing_puts_first_layer_on_top() {
        // Three opaque full-frame layers, list index 0 first.  Compositing
        // walks the list back-to-front, so index 0 must win.
        let list = [
            [1.0, 0.0, 0.0, 1.0], // red, top of stack
            [0.0, 1.0, 0.0, 1.0],
            [0.0, 0.0, 1.0, 1.0],
        ];
        let mut acc = [0.0, 0.0, 0.0, 0.0];
        for layer in list.iter().rev() {
            acc = composite_pixel(acc, *layer, BlendMode::Normal, 1.0);
        }
        assert_rgba_eq(acc, [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn transparent_sample_leaves_base_untouched() {
        let base = [0.1, 0.2, 0.3, 0.8];
        let out = composite_pixel(base, [1.0, 1.0, 1.0, 0.0], BlendMode::Add, 1.0);
        assert_rgba_eq(out, base);
    }

    #[test]
    fn coverage_only_widens() {
        // Output alpha is max(base, layer), never less than either.
        let out = composite_pixel([0.0, 0.0, 0.0, 0.9], [1.0, 1.0, 1.0, 0.3], BlendMode::Normal, 1.0);
        assert!((out[3] - 0.9).abs() < EPS);
        let out = composite_pixel([0.0, 0.0, 0.0, 0.1], [1.0, 1.0, 1.0, 1.0], BlendMode::Normal, 0.6);
        assert!((out[3] - 0.6).abs() < EPS);
    }
}

// ============================================================================
// GPU SHADERS — all WGSL code kept inline for containment
// ============================================================================

// ============================================================================
// COMPOSITE SHADER — one ping-pong blend pass for a single layer
// ============================================================================
//
// Each pass draws a full-screen quad into the write target.  The fragment
// shader samples BOTH the running base image (the read target) and the
// layer's texture, maps the destination UV through the layer's inverse
// transform + aspect-fit correction, applies the blend-mode math, and
// writes the composited result.  Hardware blending is disabled — the shader
// does all the work.
//
// Blend mode IDs match `BlendMode::to_u32()` in blend.rs:
//   0 = Normal, 1 = Add, 2 = Multiply, 3 = Screen, 4 = Difference,
//   5 = Overlay, 6 = Lighten, 7 = Darken, 8 = Exclusion
//
// The shader exists in two variants built from the same template:
//   * persistent — still-image textures, sampled alpha respected;
//   * external   — one-shot video frames; decoded video carries no alpha,
//     so sampled alpha is forced to 1 before the out-of-bounds test.
const COMPOSITE_TEMPLATE: &str = r#"
struct LayerUniforms {
    position:      vec2<f32>,  // normalized offset, origin = frame center
    scale:         vec2<f32>,
    rotation:      f32,        // radians
    opacity:       f32,
    blend_mode:    u32,
    source_aspect: f32,
    dest_aspect:   f32,
    _pad0: f32,
    _pad1: f32,
    _pad2: f32,
};

@group(0) @binding(0) var<uniform> u: LayerUniforms;

@group(1) @binding(0) var layer_tex: texture_2d<f32>;
@group(1) @binding(1) var base_tex:  texture_2d<f32>;
@group(1) @binding(2) var samp:      sampler;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_composite(@builtin(vertex_index) vi: u32) -> VertexOutput {
    var positions = array<vec2<f32>, 6>(
        vec2<f32>(0.0, 0.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(0.0, 1.0),
        vec2<f32>(0.0, 1.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(1.0, 1.0),
    );
    let uv = positions[vi];
    var out: VertexOutput;
    out.position = vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, 0.0, 1.0);
    out.uv = uv;
    return out;
}

// ---- Blend mode helpers ----

fn overlay_ch(base: f32, top: f32) -> f32 {
    if (base < 0.5) {
        return 2.0 * base * top;
    } else {
        return 1.0 - 2.0 * (1.0 - base) * (1.0 - top);
    }
}

// Destination UV -> source sampling coordinate, unclamped.
// Inverse rotation, inverse scale, aspect-fit, then position offset.
fn map_source_uv(uv: vec2<f32>) -> vec2<f32> {
    var p = uv - vec2<f32>(0.5);

    let s = sin(-u.rotation);
    let c = cos(-u.rotation);
    p = vec2<f32>(p.x * c - p.y * s, p.x * s + p.y * c);

    p = p / u.scale;

    let ratio = u.source_aspect / u.dest_aspect;
    if (ratio > 1.0) {
        p.y = p.y * ratio;
    } else {
        p.x = p.x / ratio;
    }

    return p + vec2<f32>(0.5) - u.position;
}

@fragment
fn fs_composite(in: VertexOutput) -> @location(0) vec4<f32> {
    let base = textureSample(base_tex, samp, in.uv);

    let src_uv = map_source_uv(in.uv);
    let clamped = clamp(src_uv, vec2<f32>(0.0), vec2<f32>(1.0));
    let src = textureSample(layer_tex, samp, clamped);

    // The fetch uses the clamped coordinate, but coverage is decided on the
    // unclamped one — otherwise the edge texels smear across the frame.
    let oob = src_uv.x < 0.0 || src_uv.x > 1.0 || src_uv.y < 0.0 || src_uv.y > 1.0;

    var src_a = /*ALPHA_SOURCE*/;
    if (oob) {
        src_a = 0.0;
    }
    let final_a = src_a * u.opacity;

    var blended: vec3<f32>;
    switch (u.blend_mode) {
        // Normal
        case 0u {
            blended = src.rgb;
        }
        // Add (clamped)
        case 1u {
            blended = min(base.rgb + src.rgb, vec3<f32>(1.0));
        }
        // Multiply
        case 2u {
            blended = base.rgb * src.rgb;
        }
        // Screen
        case 3u {
            blended = vec3<f32>(1.0) - (vec3<f32>(1.0) - base.rgb) * (vec3<f32>(1.0) - src.rgb);
        }
        // Difference
        case 4u {
            blended = abs(base.rgb - src.rgb);
        }
        // Overlay
        case 5u {
            blended = vec3<f32>(
                overlay_ch(base.r, src.r),
                overlay_ch(base.g, src.g),
                overlay_ch(base.b, src.b),
            );
        }
        // Lighten
        case 6u {
            blended = max(base.rgb, src.rgb);
        }
        // Darken
        case 7u {
            blended = min(base.rgb, src.rgb);
        }
        // Exclusion
        case 8u {
            blended = base.rgb + src.rgb - 2.0 * base.rgb * src.rgb;
        }
        // Fallback: Normal
        default {
            blended = src.rgb;
        }
    }

    let out_rgb = mix(base.rgb, blended, final_a);
    let out_a = max(base.a, final_a);
    return vec4<f32>(out_rgb, out_a);
}
"#;

/// Composite shader source for persistent (image) textures.
pub fn composite_shader() -> String {
    COMPOSITE_TEMPLATE.replace("/*ALPHA_SOURCE*/", "src.a")
}

/// Composite shader source for one-shot external (video) frames: decoded
/// video is opaque, so sampled alpha is pinned to 1.
pub fn composite_external_shader() -> String {
    COMPOSITE_TEMPLATE.replace("/*ALPHA_SOURCE*/", "1.0")
}

// ============================================================================
// OUTPUT SHADER — present the composited frame to one surface
// ============================================================================
//
// Fits the frame into the surface preserving the frame's aspect ratio
// (same correction math as the composite pass), letterboxing with black or
// — when the authoring grid is enabled — a checkerboard.  The grid sits
// *behind* the frame: it never changes composited pixels, it only replaces
// the void where coverage is missing.
pub const OUTPUT_SHADER: &str = r#"
struct OutputUniforms {
    frame_aspect:   f32,
    surface_aspect: f32,
    grid:           u32,   // 1 = draw transparency checkerboard backdrop
    _pad0:          f32,
};

@group(0) @binding(0) var<uniform> u: OutputUniforms;

@group(1) @binding(0) var frame_tex:  texture_2d<f32>;
@group(1) @binding(1) var frame_samp: sampler;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_output(@builtin(vertex_index) vi: u32) -> VertexOutput {
    var positions = array<vec2<f32>, 6>(
        vec2<f32>(0.0, 0.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(0.0, 1.0),
        vec2<f32>(0.0, 1.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(1.0, 1.0),
    );
    let uv = positions[vi];
    var out: VertexOutput;
    out.position = vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, 0.0, 1.0);
    out.uv = uv;
    return out;
}

@fragment
fn fs_output(in: VertexOutput) -> @location(0) vec4<f32> {
    var p = in.uv - vec2<f32>(0.5);
    let ratio = u.frame_aspect / u.surface_aspect;
    if (ratio > 1.0) {
        p.y = p.y * ratio;
    } else {
        p.x = p.x / ratio;
    }
    let fuv = p + vec2<f32>(0.5);

    let oob = fuv.x < 0.0 || fuv.x > 1.0 || fuv.y < 0.0 || fuv.y > 1.0;
    let frame = textureSample(frame_tex, frame_samp, clamp(fuv, vec2<f32>(0.0), vec2<f32>(1.0)));

    var backdrop = vec3<f32>(0.0);
    if (u.grid == 1u) {
        let checker_size = 8.0; // pixels per checker square at reference scale
        let cx = floor(in.uv.x * 1024.0 / checker_size);
        let cy = floor(in.uv.y * 1024.0 / checker_size);
        let checker = (cx + cy) % 2.0;
        let gray = select(0.8, 0.9, checker > 0.5);
        backdrop = vec3<f32>(gray, gray, gray);
    }

    var coverage = frame.a;
    if (oob) {
        coverage = 0.0;
    }
    let rgb = mix(backdrop, frame.rgb, coverage);
    return vec4<f32>(rgb, 1.0);
}
"#;

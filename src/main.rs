// ============================================================================
// VELOCUT PREVIEW HOST — winit shell that exercises the compositing engine
// ============================================================================
//
// Stands in for the full editor application: it owns the event loop, feeds
// the engine a small animated layer stack (what the timeline/keyframe
// evaluator would normally supply), and forwards window events.
//
// Keys:
//   O — open a detachable output window
//   F — toggle fullscreen on the last output window
//   G — toggle the transparency grid on the preview
//   S — snapshot the composited frame to velocut_frame.png
//   L — simulate GPU device loss        I — re-initialize after a loss

use std::sync::Arc;
use std::time::Instant;

use winit::event::{ElementState, Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::Key;
use winit::window::WindowBuilder;

use velocut::{log_err, log_info};
use velocut::{BlendMode, CompositeEngine, EngineConfig, ImageHandle, Layer, LayerContent};

fn main() {
    velocut::logger::init();

    let event_loop = EventLoop::new().expect("event loop");
    event_loop.set_control_flow(ControlFlow::Poll);

    let preview = Arc::new(
        WindowBuilder::new()
            .with_title("VeloCut Preview")
            .with_inner_size(winit::dpi::PhysicalSize::new(1280u32, 720u32))
            .build(&event_loop)
            .expect("preview window"),
    );
    let preview_id = preview.id();

    let mut engine = CompositeEngine::new(EngineConfig::default());
    if let Err(e) = engine.initialize() {
        log_err!("engine failed to initialize: {}", e);
        std::process::exit(1);
    }

    let size = preview.inner_size();
    let preview_target = engine
        .register_target(preview.clone(), size.width, size.height)
        .expect("preview surface");

    // Demo stack: an animated badge over a gradient backdrop, standing in
    // for the editing layer's resolved per-frame values.
    let mut layers = demo_layers();
    let started = Instant::now();
    engine.start(Box::new(move |engine| {
        let t = started.elapsed().as_secs_f32();
        layers[0].transform.rotation = 0.4 * (t * 0.8).sin();
        layers[0].transform.position = [0.25 * (t * 0.5).cos(), 0.15 * (t * 0.7).sin()];
        layers[0].opacity = 0.75 + 0.25 * (t * 1.3).sin();
        engine.render_frame(&layers);
    }));

    let mut grid_on = false;
    let mut last_output = None;

    event_loop
        .run(move |event, elwt| match event {
            Event::WindowEvent { window_id, event } => match event {
                WindowEvent::CloseRequested => {
                    if window_id == preview_id {
                        let stats = engine.stats();
                        log_info!(
                            "shutting down: {} fps, {:.2} ms avg frame",
                            stats.fps,
                            stats.average_frame_time_ms
                        );
                        engine.stop();
                        elwt.exit();
                    } else {
                        let _ = engine.on_output_window_closed(window_id);
                    }
                }
                WindowEvent::Resized(new_size) => {
                    if window_id == preview_id {
                        engine.resize_target(preview_target, new_size.width, new_size.height);
                    } else {
                        engine.on_output_window_resized(window_id, new_size.width, new_size.height);
                    }
                }
                WindowEvent::KeyboardInput { event: key_event, .. } => {
                    if key_event.state != ElementState::Pressed {
                        return;
                    }
                    match key_event.logical_key.as_ref() {
                        Key::Character("o") => {
                            last_output = engine.create_output_window(elwt, "VeloCut Output");
                        }
                        Key::Character("f") => {
                            if let Some(target) = last_output {
                                engine.toggle_output_fullscreen(target);
                            }
                        }
                        Key::Character("g") => {
                            grid_on = !grid_on;
                            engine.set_target_transparency_grid(preview_target, grid_on);
                        }
                        Key::Character("s") => {
                            snapshot(&mut engine);
                        }
                        Key::Character("l") => {
                            log_info!("simulating device loss");
                            engine.simulate_device_loss();
                        }
                        Key::Character("i") => {
                            if let Err(e) = engine.initialize() {
                                log_err!("re-initialization failed: {}", e);
                            }
                        }
                        _ => {}
                    }
                }
                WindowEvent::RedrawRequested => {
                    if window_id == preview_id {
                        engine.pump();
                    }
                }
                _ => {}
            },
            Event::AboutToWait => preview.request_redraw(),
            _ => {}
        })
        .expect("event loop run");
}

/// Save the last composited frame next to the executable.
fn snapshot(engine: &mut CompositeEngine) {
    let Some(pixels) = engine.capture_frame() else {
        log_err!("no composited frame to capture yet");
        return;
    };
    let (width, height) = engine.resolution();
    match image::save_buffer("velocut_frame.png", &pixels, width, height, image::ColorType::Rgba8) {
        Ok(()) => log_info!("frame saved to velocut_frame.png"),
        Err(e) => log_err!("snapshot failed: {}", e),
    }
}

/// Two still-image layers: index 0 (the badge) on top.
fn demo_layers() -> Vec<Layer> {
    let badge = image::RgbaImage::from_fn(512, 512, |x, y| {
        let dx = x as f32 / 511.0 - 0.5;
        let dy = y as f32 / 511.0 - 0.5;
        let d = (dx * dx + dy * dy).sqrt();
        if d < 0.45 {
            let ring = ((d * 40.0).sin() * 0.5 + 0.5) * 255.0;
            image::Rgba([255, ring as u8, 80, 255])
        } else {
            image::Rgba([0, 0, 0, 0])
        }
    });

    let backdrop = image::RgbaImage::from_fn(1280, 720, |x, y| {
        let r = (x * 255 / 1279) as u8;
        let b = (y * 255 / 719) as u8;
        image::Rgba([r, 64, b, 255])
    });

    let mut badge_layer = Layer::new(LayerContent::Image(ImageHandle::new(badge)));
    badge_layer.transform.scale = [0.5, 0.5];
    badge_layer.blend_mode = BlendMode::Screen;

    let backdrop_layer = Layer::new(LayerContent::Image(ImageHandle::new(backdrop)));

    vec![badge_layer, backdrop_layer]
}

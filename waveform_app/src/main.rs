//! Live waveform demo
//!
//! Renders a scrolling sine trace plus a scatter overlay into a window,
//! or headless into a PNG with `--headless <path>`.

use std::time::{Duration, Instant};

use plot_engine::render::renderer::{AxesDecorations, DrawItem};
use plot_engine::{Config, Drawable, PrimitiveKind, RendererConfig, Theme, Viewport, WindowManager};

const WINDOW_WIDTH: u32 = 800;
const WINDOW_HEIGHT: u32 = 600;
const PLOT_MARGIN: f32 = 40.0;
const SAMPLE_COUNT: usize = 512;

/// A sine trace whose phase advances every tick.
struct WaveSeries {
    kind: PrimitiveKind,
    points: Vec<[f32; 2]>,
    dirty: bool,
    palette_index: usize,
}

impl WaveSeries {
    fn new(kind: PrimitiveKind, palette_index: usize) -> Self {
        let mut series = Self {
            kind,
            points: Vec::with_capacity(SAMPLE_COUNT),
            dirty: true,
            palette_index,
        };
        series.sample(0.0);
        series
    }

    fn sample(&mut self, phase: f32) {
        self.points.clear();
        let step = if self.kind == PrimitiveKind::Scatter { 16 } else { 1 };
        for i in (0..SAMPLE_COUNT).step_by(step) {
            let x = i as f32 / (SAMPLE_COUNT - 1) as f32 * 10.0;
            let y = (x * 1.3 + phase).sin();
            self.points.push([x, y]);
        }
        self.dirty = true;
    }
}

impl Drawable for WaveSeries {
    fn kind(&self) -> PrimitiveKind {
        self.kind
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    fn positions(&self) -> &[[f32; 2]] {
        &self.points
    }

    fn palette_index(&self) -> usize {
        self.palette_index
    }

    fn point_size(&self) -> f32 {
        6.0
    }
}

/// Decoration geometry for one axes region, in data space.
struct Decorations {
    grid_lines: Vec<[f32; 2]>,
    border: Vec<[f32; 2]>,
    tick_marks: Vec<[f32; 2]>,
}

fn build_decorations(x_limits: (f32, f32), y_limits: (f32, f32)) -> Decorations {
    let (x0, x1) = x_limits;
    let (y0, y1) = y_limits;

    let mut grid_lines = Vec::new();
    let divisions = 10;
    for i in 1..divisions {
        let t = i as f32 / divisions as f32;
        let x = x0 + (x1 - x0) * t;
        grid_lines.push([x, y0]);
        grid_lines.push([x, y1]);
        let y = y0 + (y1 - y0) * t;
        grid_lines.push([x0, y]);
        grid_lines.push([x1, y]);
    }

    let border = vec![
        [x0, y0], [x1, y0],
        [x1, y0], [x1, y1],
        [x1, y1], [x0, y1],
        [x0, y1], [x0, y0],
    ];

    let tick_len = (y1 - y0) * 0.02;
    let mut tick_marks = Vec::new();
    for i in 0..=divisions {
        let x = x0 + (x1 - x0) * i as f32 / divisions as f32;
        tick_marks.push([x, y0]);
        tick_marks.push([x, y0 + tick_len]);
    }

    Decorations {
        grid_lines,
        border,
        tick_marks,
    }
}

fn plot_viewport(width: u32, height: u32) -> Viewport {
    Viewport::new(
        PLOT_MARGIN,
        PLOT_MARGIN,
        width as f32 - 2.0 * PLOT_MARGIN,
        height as f32 - 2.0 * PLOT_MARGIN,
    )
}

fn run_windowed(manager: &mut WindowManager, theme: &Theme) -> Result<(), Box<dyn std::error::Error>> {
    let line_id = manager.register_entity(PrimitiveKind::Line);
    let scatter_id = manager.register_entity(PrimitiveKind::Scatter);
    let axes_id = manager.register_entity(PrimitiveKind::Grid);

    let mut line = WaveSeries::new(PrimitiveKind::Line, 0);
    let mut scatter = WaveSeries::new(PrimitiveKind::Scatter, 1);

    let x_limits = (0.0, 10.0);
    let y_limits = (-1.2, 1.2);
    let decorations = build_decorations(x_limits, y_limits);

    let start = Instant::now();
    while !manager.all_closed() {
        manager.pump_events();
        manager.maintain();
        if manager.all_closed() {
            break;
        }

        let phase = start.elapsed().as_secs_f32();
        line.sample(phase);
        scatter.sample(phase);

        let viewport = plot_viewport(WINDOW_WIDTH, WINDOW_HEIGHT);
        let mut items = [
            DrawItem {
                id: line_id,
                drawable: &mut line,
                viewport,
                x_limits,
                y_limits,
            },
            DrawItem {
                id: scatter_id,
                drawable: &mut scatter,
                viewport,
                x_limits,
                y_limits,
            },
        ];
        let decor = [AxesDecorations {
            axes: axes_id,
            viewport,
            x_limits,
            y_limits,
            grid_lines: &decorations.grid_lines,
            border: &decorations.border,
            tick_marks: &decorations.tick_marks,
        }];

        let report = manager.render(&mut items, &decor, theme)?;
        if !report.presented {
            log::debug!("frame {} skipped", report.frame);
        }

        std::thread::sleep(Duration::from_millis(16));
    }

    manager.remove_entity(line_id);
    manager.remove_entity(scatter_id);
    manager.remove_entity(axes_id);
    Ok(())
}

fn run_headless(
    manager: &mut WindowManager,
    theme: &Theme,
    out_path: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let line_id = manager.register_entity(PrimitiveKind::Line);
    let axes_id = manager.register_entity(PrimitiveKind::Grid);
    let mut line = WaveSeries::new(PrimitiveKind::Line, 0);

    let x_limits = (0.0, 10.0);
    let y_limits = (-1.2, 1.2);
    let decorations = build_decorations(x_limits, y_limits);
    let viewport = plot_viewport(WINDOW_WIDTH, WINDOW_HEIGHT);

    let mut items = [DrawItem {
        id: line_id,
        drawable: &mut line,
        viewport,
        x_limits,
        y_limits,
    }];
    let decor = [AxesDecorations {
        axes: axes_id,
        viewport,
        x_limits,
        y_limits,
        grid_lines: &decorations.grid_lines,
        border: &decorations.border,
        tick_marks: &decorations.tick_marks,
    }];

    let mut pixels = vec![0u8; (WINDOW_WIDTH * WINDOW_HEIGHT * 4) as usize];
    if !manager.render_to_buffer(
        &mut pixels,
        WINDOW_WIDTH,
        WINDOW_HEIGHT,
        &mut items,
        &decor,
        theme,
    ) {
        return Err("offscreen render failed".into());
    }

    let image = image::RgbaImage::from_raw(WINDOW_WIDTH, WINDOW_HEIGHT, pixels)
        .ok_or("pixel buffer size mismatch")?;
    image.save(out_path)?;
    log::info!("wrote {out_path}");

    manager.remove_entity(line_id);
    manager.remove_entity(axes_id);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let headless_out = args
        .iter()
        .position(|a| a == "--headless")
        .map(|i| args.get(i + 1).cloned().unwrap_or_else(|| "waveform.png".to_string()));

    let config = match RendererConfig::load_from_file("waveform.toml") {
        Ok(config) => config,
        Err(e) => {
            log::debug!("using default renderer config ({e})");
            RendererConfig::default()
        }
    };
    let theme = Theme::default();

    log::info!("starting waveform demo");
    let mut manager = WindowManager::new(&config, "waveform", WINDOW_WIDTH, WINDOW_HEIGHT)?;

    let result = match headless_out {
        Some(path) => run_headless(&mut manager, &theme, &path),
        None => run_windowed(&mut manager, &theme),
    };

    manager.shutdown();
    result
}

//! Frame orchestration
//!
//! Drives one logical frame on the active surface: ring flush after the
//! fence wait, re-upload of dirty entities, then draw calls against cached
//! buffers. Rendering is a pure function of (entities, viewports, theme);
//! no global styling state is consulted.

use std::collections::HashMap;

use nalgebra::Matrix4;

use crate::render::api::{
    Color, PipelineHandle, PrimitiveKind, RenderBackend, SeriesPushConstants, Theme, Viewport,
};
use crate::render::cache::{DecorCache, DecorKind, EntityCache, UploadOutcome};
use crate::render::deletion::{DeletionRing, MAX_FRAMES_IN_FLIGHT};
use crate::render::entity::{Drawable, EntityId, SurfaceId};
use crate::render::frame::{self, BeginFrame, EndFrame};
use crate::render::{RenderError, RenderResult};

/// One drawable series to render this frame, with the layout-supplied
/// viewport and axis limits it is plotted under.
pub struct DrawItem<'a> {
    pub id: EntityId,
    pub drawable: &'a mut dyn Drawable,
    pub viewport: Viewport,
    pub x_limits: (f32, f32),
    pub y_limits: (f32, f32),
}

/// Axes decoration geometry for one axes region, computed by the layout
/// collaborator in data space. Uploaded through the per-window decor cache.
pub struct AxesDecorations<'a> {
    /// Identity of the owning axes; used as the per-window cache key.
    pub axes: EntityId,
    pub viewport: Viewport,
    pub x_limits: (f32, f32),
    pub y_limits: (f32, f32),
    /// Line-list segments (pairs of endpoints).
    pub grid_lines: &'a [[f32; 2]],
    pub border: &'a [[f32; 2]],
    pub tick_marks: &'a [[f32; 2]],
}

/// What happened during one render tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    /// False when the frame was skipped (transient swapchain failure).
    pub presented: bool,
    /// Entity uploads that actually touched the GPU this frame.
    pub uploads: usize,
    /// Frame counter value for this tick.
    pub frame: u64,
}

/// Renderer state shared across all windows: the pipeline table, the
/// per-entity cache, the per-window decoration caches, and the deletion
/// ring.
pub struct PlotRenderer {
    pipelines: HashMap<PrimitiveKind, PipelineHandle>,
    cache: EntityCache,
    decor: DecorCache,
    ring: DeletionRing,
}

impl PlotRenderer {
    /// Build the pipeline table and empty caches.
    pub fn new(backend: &mut dyn RenderBackend) -> RenderResult<Self> {
        let mut pipelines = HashMap::new();
        for kind in PrimitiveKind::ALL {
            pipelines.insert(kind, backend.create_pipeline(kind)?);
        }
        Ok(Self {
            pipelines,
            cache: EntityCache::new(),
            decor: DecorCache::new(),
            ring: DeletionRing::new(MAX_FRAMES_IN_FLIGHT),
        })
    }

    /// Register a drawable entity, fixing its primitive kind.
    pub fn register_entity(&mut self, kind: PrimitiveKind) -> EntityId {
        self.cache.register(kind)
    }

    /// Notify the renderer that an entity was destroyed. Its GPU buffers
    /// are retired through the deletion ring.
    pub fn remove_entity(&mut self, id: EntityId) {
        self.cache.remove(&mut self.ring, id);
        self.decor.remove_axes(&mut self.ring, id);
    }

    /// Notify the renderer that a window surface was destroyed. Its
    /// decoration buffers are retired through the deletion ring.
    pub fn remove_surface(&mut self, surface: SurfaceId) {
        self.decor.remove_surface(&mut self.ring, surface);
    }

    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    pub fn ring(&self) -> &DeletionRing {
        &self.ring
    }

    /// Render one frame on the backend's active surface.
    ///
    /// Returns `Ok` with `presented = false` for a skipped frame; transient
    /// swapchain failures never abort the render loop. Device loss is the
    /// only error surfaced from the frame path.
    pub fn render_frame(
        &mut self,
        backend: &mut dyn RenderBackend,
        surface: SurfaceId,
        items: &mut [DrawItem<'_>],
        decorations: &[AxesDecorations<'_>],
        theme: &Theme,
    ) -> RenderResult<FrameReport> {
        match frame::begin_frame(backend) {
            BeginFrame::Ready => {}
            BeginFrame::Skipped => {
                return Ok(FrameReport {
                    presented: false,
                    uploads: 0,
                    frame: self.ring.current_frame(),
                })
            }
            BeginFrame::DeviceLost => return Err(RenderError::DeviceLost),
        }

        // The fence wait in begin_frame has retired frame N-2's command
        // buffers; anything old enough in the ring is now safe to free.
        self.ring.begin_frame(backend);

        // Upload pass: all dirty-entity uploads complete before any draw
        // call that references them.
        let mut uploads = 0;
        for item in items.iter_mut() {
            if !item.drawable.visible() {
                continue;
            }
            let outcome =
                self.cache
                    .upload(backend, &mut self.ring, item.id, item.drawable)?;
            if outcome == UploadOutcome::Uploaded {
                uploads += 1;
            }
        }

        backend.begin_render_pass(theme.background);

        for decor in decorations {
            self.draw_decorations(backend, surface, decor, theme)?;
        }

        for item in items.iter() {
            if !item.drawable.visible() || item.drawable.element_count() == 0 {
                continue;
            }
            let row = self.cache.row(item.id).ok_or(RenderError::StaleEntity)?;
            let Some(buffer) = row.vertex_buffer() else {
                continue;
            };

            let pipeline = self.pipeline(row.kind())?;
            backend.bind_pipeline(pipeline);
            Self::apply_viewport(backend, item.viewport);
            backend.bind_buffer(buffer, 0);
            backend.push_constants(&Self::series_constants(
                item.x_limits,
                item.y_limits,
                theme.series_color(item.drawable.palette_index()),
                item.drawable.point_size(),
            ));
            // Indexed entities (gapped lines, filled regions) draw through
            // their index buffer; everything else draws sequentially.
            if let Some(index_buffer) = row.index_buffer() {
                backend.bind_index_buffer(index_buffer);
                backend.draw_indexed(row.uploaded_index_count() as u32, 0);
            } else {
                backend.draw(row.uploaded_count() as u32, 0);
            }
        }

        backend.end_render_pass();

        let presented = match frame::end_frame(backend) {
            EndFrame::Presented => true,
            EndFrame::Invalidated => false,
            EndFrame::DeviceLost => return Err(RenderError::DeviceLost),
        };

        Ok(FrameReport {
            presented,
            uploads,
            frame: self.ring.current_frame(),
        })
    }

    fn draw_decorations(
        &mut self,
        backend: &mut dyn RenderBackend,
        surface: SurfaceId,
        decor: &AxesDecorations<'_>,
        theme: &Theme,
    ) -> RenderResult<()> {
        let pipeline = self.pipeline(PrimitiveKind::Grid)?;
        let sets: [(DecorKind, &[[f32; 2]], Color); 3] = [
            (DecorKind::GridLines, decor.grid_lines, theme.grid),
            (DecorKind::TickMarks, decor.tick_marks, theme.axis_border),
            (DecorKind::AxisBorder, decor.border, theme.axis_border),
        ];

        for (which, vertices, color) in sets {
            let Some((buffer, count)) = self.decor.upload(
                backend,
                &mut self.ring,
                surface,
                decor.axes,
                which,
                vertices,
            )?
            else {
                continue;
            };
            backend.bind_pipeline(pipeline);
            Self::apply_viewport(backend, decor.viewport);
            backend.bind_buffer(buffer, 0);
            backend.push_constants(&Self::series_constants(
                decor.x_limits,
                decor.y_limits,
                color,
                1.0,
            ));
            backend.draw(count, 0);
        }
        Ok(())
    }

    fn pipeline(&self, kind: PrimitiveKind) -> RenderResult<PipelineHandle> {
        self.pipelines
            .get(&kind)
            .copied()
            .ok_or(RenderError::MissingPipeline(kind))
    }

    fn apply_viewport(backend: &mut dyn RenderBackend, viewport: Viewport) {
        backend.set_viewport(viewport);
        backend.set_scissor(
            viewport.x as i32,
            viewport.y as i32,
            viewport.width as u32,
            viewport.height as u32,
        );
    }

    /// Orthographic projection for the given axis limits, plus styling.
    fn series_constants(
        x_limits: (f32, f32),
        y_limits: (f32, f32),
        color: Color,
        point_size: f32,
    ) -> SeriesPushConstants {
        let mvp = ortho_projection(x_limits.0, x_limits.1, y_limits.0, y_limits.1);
        SeriesPushConstants {
            mvp,
            color: [color.r, color.g, color.b, color.a],
            point_size,
            _pad: [0.0; 3],
        }
    }

    /// Shutdown: retire all cached buffers, idle-wait the device, drain
    /// the ring.
    pub fn shutdown(&mut self, backend: &mut dyn RenderBackend) {
        self.cache.clear(&mut self.ring);
        self.decor.clear(&mut self.ring);
        self.ring.drain(backend);
    }
}

/// Column-major orthographic projection mapping the axis-limit rectangle
/// to clip space. Y stays positive-up; the viewport flip is handled when
/// the viewport is set.
pub(crate) fn ortho_projection(left: f32, right: f32, bottom: f32, top: f32) -> [[f32; 4]; 4] {
    let mat = Matrix4::new_orthographic(left, right, bottom, top, -1.0, 1.0);
    let mut out = [[0.0f32; 4]; 4];
    for (col, out_col) in out.iter_mut().enumerate() {
        for (row, value) in out_col.iter_mut().enumerate() {
            *value = mat[(row, col)];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::testing::{MockBackend, TestSeries};
    use approx::assert_relative_eq;

    fn renderer_with_backend() -> (MockBackend, PlotRenderer, SurfaceId) {
        let mut backend = MockBackend::new();
        let renderer = PlotRenderer::new(&mut backend).unwrap();
        let (surface, _) = MockBackend::surface_id_pair();
        (backend, renderer, surface)
    }

    #[test]
    fn pipeline_table_covers_every_kind() {
        let (mut backend, _renderer, _) = renderer_with_backend();
        // Creating again returns the same handles (idempotent per kind).
        let again = PlotRenderer::new(&mut backend).unwrap();
        for kind in PrimitiveKind::ALL {
            assert!(again.pipelines.contains_key(&kind));
        }
        assert_eq!(backend.pipeline_count(), PrimitiveKind::ALL.len());
    }

    #[test]
    fn three_unmutated_frames_upload_once() {
        let (mut backend, mut renderer, surface) = renderer_with_backend();
        let mut series = TestSeries::line(100);
        let id = renderer.register_entity(series.kind());
        let theme = Theme::default();

        let mut total_uploads = 0;
        for _ in 0..3 {
            let mut items = [DrawItem {
                id,
                drawable: &mut series,
                viewport: Viewport::new(0.0, 0.0, 800.0, 600.0),
                x_limits: (0.0, 100.0),
                y_limits: (-1.0, 1.0),
            }];
            let report = renderer
                .render_frame(&mut backend, surface, &mut items, &[], &theme)
                .unwrap();
            assert!(report.presented);
            total_uploads += report.uploads;
        }
        assert_eq!(total_uploads, 1);
        assert_eq!(renderer.cache().row(id).unwrap().uploaded_count(), 100);

        // Mutate: append one point; exactly one additional upload.
        series.set_point_count(101);
        let mut items = [DrawItem {
            id,
            drawable: &mut series,
            viewport: Viewport::new(0.0, 0.0, 800.0, 600.0),
            x_limits: (0.0, 101.0),
            y_limits: (-1.0, 1.0),
        }];
        let report = renderer
            .render_frame(&mut backend, surface, &mut items, &[], &theme)
            .unwrap();
        assert_eq!(report.uploads, 1);
        assert_eq!(renderer.cache().row(id).unwrap().uploaded_count(), 101);
    }

    #[test]
    fn invisible_entities_do_no_gpu_work() {
        let (mut backend, mut renderer, surface) = renderer_with_backend();
        let mut series = TestSeries::line(50);
        series.set_visible(false);
        let id = renderer.register_entity(series.kind());

        let mut items = [DrawItem {
            id,
            drawable: &mut series,
            viewport: Viewport::new(0.0, 0.0, 100.0, 100.0),
            x_limits: (0.0, 1.0),
            y_limits: (0.0, 1.0),
        }];
        let report = renderer
            .render_frame(&mut backend, surface, &mut items, &[], &Theme::default())
            .unwrap();
        assert_eq!(report.uploads, 0);
        assert_eq!(backend.draw_count(), 0);
    }

    #[test]
    fn skipped_frame_reports_not_presented() {
        let (mut backend, mut renderer, surface) = renderer_with_backend();
        backend.fail_next_acquires(2);

        let report = renderer
            .render_frame(&mut backend, surface, &mut [], &[], &Theme::default())
            .unwrap();
        assert!(!report.presented);
        assert_eq!(backend.render_pass_count(), 0);
    }

    #[test]
    fn device_lost_is_terminal() {
        let (mut backend, mut renderer, surface) = renderer_with_backend();
        backend.set_device_lost();

        let result = renderer.render_frame(&mut backend, surface, &mut [], &[], &Theme::default());
        assert!(matches!(result, Err(RenderError::DeviceLost)));
    }

    #[test]
    fn ortho_projection_maps_limits_to_clip_corners() {
        let mvp = ortho_projection(0.0, 10.0, -5.0, 5.0);
        let mat = Matrix4::from_fn(|row, col| mvp[col][row]);

        let lower = mat.transform_point(&nalgebra::Point3::new(0.0, -5.0, 0.0));
        let upper = mat.transform_point(&nalgebra::Point3::new(10.0, 5.0, 0.0));
        assert_relative_eq!(lower.x, -1.0, epsilon = 1e-6);
        assert_relative_eq!(lower.y, -1.0, epsilon = 1e-6);
        assert_relative_eq!(upper.x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(upper.y, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn indexed_series_draws_through_its_index_buffer() {
        let (mut backend, mut renderer, surface) = renderer_with_backend();
        let mut series = TestSeries::line(6);
        series.set_indices(vec![0, 1, 2, 4, 5]); // skip the gap at 3
        let id = renderer.register_entity(series.kind());

        let mut items = [DrawItem {
            id,
            drawable: &mut series,
            viewport: Viewport::new(0.0, 0.0, 800.0, 600.0),
            x_limits: (0.0, 6.0),
            y_limits: (-1.0, 1.0),
        }];
        let report = renderer
            .render_frame(&mut backend, surface, &mut items, &[], &Theme::default())
            .unwrap();
        assert!(report.presented);
        assert_eq!(backend.indexed_draw_count(), 1);
        assert_eq!(renderer.cache().row(id).unwrap().uploaded_index_count(), 5);
    }

    #[test]
    fn decorations_draw_with_grid_pipeline() {
        let (mut backend, mut renderer, surface) = renderer_with_backend();
        let axes = renderer.register_entity(PrimitiveKind::Grid);

        let grid = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
        let decor = [AxesDecorations {
            axes,
            viewport: Viewport::new(0.0, 0.0, 640.0, 480.0),
            x_limits: (0.0, 1.0),
            y_limits: (0.0, 1.0),
            grid_lines: &grid,
            border: &grid[..2],
            tick_marks: &[],
        }];
        let report = renderer
            .render_frame(&mut backend, surface, &mut [], &decor, &Theme::default())
            .unwrap();
        assert!(report.presented);
        assert_eq!(backend.draw_count(), 2); // grid + border, empty ticks skipped
    }
}

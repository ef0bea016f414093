//! Per-entity GPU buffer caches
//!
//! Avoids re-uploading unchanged data every frame while guaranteeing dirty
//! entities are fully re-synced before being drawn. Buffers grow with 2×
//! headroom over the requested size to amortize streaming/animated growth,
//! and are retired through the deletion ring, never freed directly.

use std::collections::HashMap;

use slotmap::SlotMap;

use crate::render::api::{BufferHandle, BufferUsage, PrimitiveKind, RenderBackend};
use crate::render::deletion::DeletionRing;
use crate::render::entity::{Drawable, EntityId, SurfaceId};
use crate::render::{RenderError, RenderResult};

/// What `upload` did for an entity this frame. Exposed so the frame report
/// can count actual GPU uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Data was (re)uploaded to the GPU.
    Uploaded,
    /// Entity was clean and fits its buffers; nothing touched the GPU.
    Unchanged,
    /// Zero-element entity; no GPU work.
    Empty,
}

/// One cache row per registered drawable entity.
#[derive(Debug)]
pub struct CacheRow {
    kind: PrimitiveKind,
    vertex_buffer: Option<BufferHandle>,
    vertex_capacity: usize,
    index_buffer: Option<BufferHandle>,
    index_capacity: usize,
    uploaded_count: usize,
    uploaded_index_count: usize,
}

impl CacheRow {
    fn new(kind: PrimitiveKind) -> Self {
        Self {
            kind,
            vertex_buffer: None,
            vertex_capacity: 0,
            index_buffer: None,
            index_capacity: 0,
            uploaded_count: 0,
            uploaded_index_count: 0,
        }
    }

    pub fn kind(&self) -> PrimitiveKind {
        self.kind
    }

    pub fn vertex_buffer(&self) -> Option<BufferHandle> {
        self.vertex_buffer
    }

    pub fn index_buffer(&self) -> Option<BufferHandle> {
        self.index_buffer
    }

    /// Element count at the last successful upload.
    pub fn uploaded_count(&self) -> usize {
        self.uploaded_count
    }

    /// Index count at the last successful upload; zero for non-indexed
    /// entities.
    pub fn uploaded_index_count(&self) -> usize {
        self.uploaded_index_count
    }

    pub fn vertex_capacity(&self) -> usize {
        self.vertex_capacity
    }
}

/// Maps registered entities to their GPU buffers and upload watermarks.
pub struct EntityCache {
    rows: SlotMap<EntityId, CacheRow>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self {
            rows: SlotMap::with_key(),
        }
    }

    /// Register an entity, fixing its primitive kind for its lifetime.
    pub fn register(&mut self, kind: PrimitiveKind) -> EntityId {
        let id = self.rows.insert(CacheRow::new(kind));
        log::debug!("registered entity {:?} ({:?})", id, kind);
        id
    }

    pub fn row(&self, id: EntityId) -> Option<&CacheRow> {
        self.rows.get(id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Sync an entity's GPU buffers with its CPU data.
    ///
    /// (Re)allocates and uploads iff the entity is dirty, the buffers do
    /// not exist yet, or the data has outgrown the allocated capacity.
    /// Growth allocates 2× the requested byte size. Clears the entity's
    /// dirty flag after a successful upload.
    pub fn upload(
        &mut self,
        backend: &mut dyn RenderBackend,
        ring: &mut DeletionRing,
        id: EntityId,
        entity: &mut dyn Drawable,
    ) -> RenderResult<UploadOutcome> {
        let row = self.rows.get_mut(id).ok_or(RenderError::StaleEntity)?;

        let count = entity.element_count();
        if count == 0 {
            return Ok(UploadOutcome::Empty);
        }

        let vertex_bytes: &[u8] = bytemuck::cast_slice(entity.positions());
        let vertex_grown = vertex_bytes.len() > row.vertex_capacity;
        let index_grown = entity
            .indices()
            .is_some_and(|idx| std::mem::size_of_val(idx) > row.index_capacity);

        let needs_upload =
            entity.is_dirty() || row.vertex_buffer.is_none() || vertex_grown || index_grown;
        if !needs_upload {
            return Ok(UploadOutcome::Unchanged);
        }

        if row.vertex_buffer.is_none() || vertex_grown {
            if let Some(old) = row.vertex_buffer.take() {
                ring.retire(old);
            }
            let capacity = vertex_bytes.len() * 2;
            row.vertex_buffer = Some(backend.create_buffer(BufferUsage::Vertex, capacity)?);
            row.vertex_capacity = capacity;
            log::debug!(
                "entity {:?}: vertex buffer grown to {} bytes",
                id,
                capacity
            );
        }
        backend.upload_buffer(
            row.vertex_buffer.expect("allocated above"),
            vertex_bytes,
            0,
        )?;

        if let Some(indices) = entity.indices() {
            let index_bytes: &[u8] = bytemuck::cast_slice(indices);
            if row.index_buffer.is_none() || index_bytes.len() > row.index_capacity {
                if let Some(old) = row.index_buffer.take() {
                    ring.retire(old);
                }
                let capacity = index_bytes.len() * 2;
                row.index_buffer = Some(backend.create_buffer(BufferUsage::Index, capacity)?);
                row.index_capacity = capacity;
            }
            backend.upload_buffer(row.index_buffer.expect("allocated above"), index_bytes, 0)?;
            row.uploaded_index_count = indices.len();
        }

        row.uploaded_count = count;
        entity.clear_dirty();
        Ok(UploadOutcome::Uploaded)
    }

    /// Remove an entity, retiring its buffers through the deletion ring.
    pub fn remove(&mut self, ring: &mut DeletionRing, id: EntityId) {
        if let Some(row) = self.rows.remove(id) {
            if let Some(handle) = row.vertex_buffer {
                ring.retire(handle);
            }
            if let Some(handle) = row.index_buffer {
                ring.retire(handle);
            }
            log::debug!("removed entity {:?}", id);
        }
    }

    /// Retire every row's buffers. Shutdown path; the caller drains the
    /// ring afterwards.
    pub fn clear(&mut self, ring: &mut DeletionRing) {
        let ids: Vec<EntityId> = self.rows.keys().collect();
        for id in ids {
            self.remove(ring, id);
        }
    }
}

impl Default for EntityCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Auxiliary vertex buffer slot for axes decorations.
#[derive(Debug, Default)]
struct DecorSlot {
    buffer: Option<BufferHandle>,
    capacity: usize,
    vertex_count: usize,
    /// Bytes of the last upload; unchanged geometry skips the GPU write.
    uploaded: Vec<u8>,
}

#[derive(Debug, Default)]
struct DecorRow {
    grid: DecorSlot,
    border: DecorSlot,
    ticks: DecorSlot,
}

/// Which decoration a decor upload targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecorKind {
    GridLines,
    AxisBorder,
    TickMarks,
}

/// Per-window cache for axes decoration geometry (grid lines, border, tick
/// marks).
///
/// Rows are keyed by (surface, axes) rather than axes alone: the same
/// logical axes is recorded into independent command buffers for different
/// windows within one frame, and a shared host-visible buffer would be
/// overwritten mid-flight.
pub struct DecorCache {
    rows: HashMap<(SurfaceId, EntityId), DecorRow>,
}

impl DecorCache {
    pub fn new() -> Self {
        Self {
            rows: HashMap::new(),
        }
    }

    /// Sync decoration vertices for one (surface, axes) pair, growing the
    /// slot's buffer with 2× headroom when needed. Geometry identical to
    /// the previous call touches nothing on the GPU. Returns the buffer
    /// and vertex count to draw, or `None` for empty geometry.
    pub fn upload(
        &mut self,
        backend: &mut dyn RenderBackend,
        ring: &mut DeletionRing,
        surface: SurfaceId,
        axes: EntityId,
        which: DecorKind,
        vertices: &[[f32; 2]],
    ) -> RenderResult<Option<(BufferHandle, u32)>> {
        if vertices.is_empty() {
            return Ok(None);
        }

        let row = self.rows.entry((surface, axes)).or_default();
        let slot = match which {
            DecorKind::GridLines => &mut row.grid,
            DecorKind::AxisBorder => &mut row.border,
            DecorKind::TickMarks => &mut row.ticks,
        };

        let bytes: &[u8] = bytemuck::cast_slice(vertices);
        if let Some(handle) = slot.buffer {
            if slot.uploaded == bytes {
                return Ok(Some((handle, slot.vertex_count as u32)));
            }
        }

        if slot.buffer.is_none() || bytes.len() > slot.capacity {
            if let Some(old) = slot.buffer.take() {
                ring.retire(old);
            }
            let capacity = bytes.len() * 2;
            slot.buffer = Some(backend.create_buffer(BufferUsage::Vertex, capacity)?);
            slot.capacity = capacity;
        }
        let handle = slot.buffer.expect("allocated above");
        backend.upload_buffer(handle, bytes, 0)?;
        slot.vertex_count = vertices.len();
        slot.uploaded.clear();
        slot.uploaded.extend_from_slice(bytes);

        Ok(Some((handle, vertices.len() as u32)))
    }

    /// Drop every row belonging to a destroyed axes entity.
    pub fn remove_axes(&mut self, ring: &mut DeletionRing, axes: EntityId) {
        self.rows.retain(|(_, key_axes), row| {
            let keep = *key_axes != axes;
            if !keep {
                for slot in [&mut row.grid, &mut row.border, &mut row.ticks] {
                    if let Some(handle) = slot.buffer.take() {
                        ring.retire(handle);
                    }
                }
            }
            keep
        });
    }

    /// Drop every row belonging to a surface being destroyed.
    pub fn remove_surface(&mut self, ring: &mut DeletionRing, surface: SurfaceId) {
        self.rows.retain(|(key_surface, _), row| {
            let keep = *key_surface != surface;
            if !keep {
                for slot in [&mut row.grid, &mut row.border, &mut row.ticks] {
                    if let Some(handle) = slot.buffer.take() {
                        ring.retire(handle);
                    }
                }
            }
            keep
        });
    }

    /// Retire every buffer in the cache. Shutdown path.
    pub fn clear(&mut self, ring: &mut DeletionRing) {
        for (_, row) in self.rows.drain() {
            for slot in [row.grid, row.border, row.ticks] {
                if let Some(handle) = slot.buffer {
                    ring.retire(handle);
                }
            }
        }
    }
}

impl Default for DecorCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::deletion::MAX_FRAMES_IN_FLIGHT;
    use crate::render::testing::{MockBackend, TestSeries};

    fn setup() -> (MockBackend, DeletionRing, EntityCache) {
        (
            MockBackend::new(),
            DeletionRing::new(MAX_FRAMES_IN_FLIGHT),
            EntityCache::new(),
        )
    }

    #[test]
    fn upload_clears_dirty_and_records_count() {
        let (mut backend, mut ring, mut cache) = setup();
        let mut series = TestSeries::line(100);
        let id = cache.register(series.kind());

        let outcome = cache
            .upload(&mut backend, &mut ring, id, &mut series)
            .unwrap();
        assert_eq!(outcome, UploadOutcome::Uploaded);
        assert!(!series.is_dirty());
        assert_eq!(cache.row(id).unwrap().uploaded_count(), 100);
    }

    #[test]
    fn second_upload_without_mutation_is_noop() {
        let (mut backend, mut ring, mut cache) = setup();
        let mut series = TestSeries::line(50);
        let id = cache.register(series.kind());

        cache
            .upload(&mut backend, &mut ring, id, &mut series)
            .unwrap();
        let uploads_after_first = backend.upload_count();

        let outcome = cache
            .upload(&mut backend, &mut ring, id, &mut series)
            .unwrap();
        assert_eq!(outcome, UploadOutcome::Unchanged);
        assert_eq!(backend.upload_count(), uploads_after_first);
    }

    #[test]
    fn growth_reallocates_with_double_headroom() {
        let (mut backend, mut ring, mut cache) = setup();
        let mut series = TestSeries::line(10);
        let id = cache.register(series.kind());
        cache
            .upload(&mut backend, &mut ring, id, &mut series)
            .unwrap();

        let small_capacity = cache.row(id).unwrap().vertex_capacity();
        assert_eq!(small_capacity, 10 * 8 * 2);

        series.set_point_count(100);
        cache
            .upload(&mut backend, &mut ring, id, &mut series)
            .unwrap();

        let requested = 100 * 8;
        let row = cache.row(id).unwrap();
        assert!(row.vertex_capacity() >= 2 * requested);
        assert_eq!(row.uploaded_count(), 100);
        // Old buffer went into the ring, not straight to the backend.
        assert_eq!(ring.pending(), 1);
    }

    #[test]
    fn dirty_data_that_fits_reuses_the_buffer() {
        let (mut backend, mut ring, mut cache) = setup();
        let mut series = TestSeries::line(100);
        let id = cache.register(series.kind());
        cache
            .upload(&mut backend, &mut ring, id, &mut series)
            .unwrap();
        let buffer = cache.row(id).unwrap().vertex_buffer().unwrap();

        series.set_point_count(120); // fits inside the 2x headroom
        cache
            .upload(&mut backend, &mut ring, id, &mut series)
            .unwrap();
        assert_eq!(cache.row(id).unwrap().vertex_buffer(), Some(buffer));
        assert_eq!(ring.pending(), 0);
    }

    #[test]
    fn zero_element_entity_is_a_noop() {
        let (mut backend, mut ring, mut cache) = setup();
        let mut series = TestSeries::line(0);
        let id = cache.register(series.kind());

        let outcome = cache
            .upload(&mut backend, &mut ring, id, &mut series)
            .unwrap();
        assert_eq!(outcome, UploadOutcome::Empty);
        assert_eq!(backend.upload_count(), 0);
    }

    #[test]
    fn stale_id_is_a_visible_error() {
        let (mut backend, mut ring, mut cache) = setup();
        let mut series = TestSeries::line(10);
        let id = cache.register(series.kind());
        cache.remove(&mut ring, id);

        let result = cache.upload(&mut backend, &mut ring, id, &mut series);
        assert!(matches!(result, Err(RenderError::StaleEntity)));
    }

    #[test]
    fn removal_routes_buffers_through_the_ring() {
        let (mut backend, mut ring, mut cache) = setup();
        let mut series = TestSeries::line(10);
        let id = cache.register(series.kind());
        cache
            .upload(&mut backend, &mut ring, id, &mut series)
            .unwrap();
        let buffer = cache.row(id).unwrap().vertex_buffer().unwrap();

        cache.remove(&mut ring, id);
        assert!(backend.is_buffer_alive(buffer));
        assert_eq!(ring.pending(), 1);
    }

    #[test]
    fn geometry_buffers_carry_draw_time_usage_classes() {
        let (mut backend, mut ring, mut cache) = setup();
        let mut series = TestSeries::line(8);
        series.set_indices(vec![0, 1, 2, 3, 5, 6, 7]); // gapped line
        let id = cache.register(series.kind());
        cache
            .upload(&mut backend, &mut ring, id, &mut series)
            .unwrap();

        let row = cache.row(id).unwrap();
        assert_eq!(
            backend.buffer_usage(row.vertex_buffer().unwrap()),
            Some(BufferUsage::Vertex)
        );
        assert_eq!(
            backend.buffer_usage(row.index_buffer().unwrap()),
            Some(BufferUsage::Index)
        );
        assert_eq!(row.uploaded_index_count(), 7);
    }

    #[test]
    fn unchanged_decor_geometry_skips_the_gpu_write() {
        let mut backend = MockBackend::new();
        let mut ring = DeletionRing::new(MAX_FRAMES_IN_FLIGHT);
        let mut cache = EntityCache::new();
        let mut decor = DecorCache::new();

        let axes = cache.register(PrimitiveKind::Grid);
        let (surface, _) = MockBackend::surface_id_pair();
        let verts = [[0.0, 0.0], [1.0, 0.0]];

        let (first, _) = decor
            .upload(&mut backend, &mut ring, surface, axes, DecorKind::AxisBorder, &verts)
            .unwrap()
            .unwrap();
        let uploads = backend.upload_count();

        // Same bytes: buffer handed back, nothing written.
        let (again, count) = decor
            .upload(&mut backend, &mut ring, surface, axes, DecorKind::AxisBorder, &verts)
            .unwrap()
            .unwrap();
        assert_eq!(again, first);
        assert_eq!(count, 2);
        assert_eq!(backend.upload_count(), uploads);

        // New geometry of the same size: rewritten in place.
        let moved = [[0.0, 0.5], [1.0, 0.5]];
        decor
            .upload(&mut backend, &mut ring, surface, axes, DecorKind::AxisBorder, &moved)
            .unwrap()
            .unwrap();
        assert_eq!(backend.upload_count(), uploads + 1);
    }

    #[test]
    fn decor_rows_are_keyed_per_surface() {
        let mut backend = MockBackend::new();
        let mut ring = DeletionRing::new(MAX_FRAMES_IN_FLIGHT);
        let mut cache = EntityCache::new();
        let mut decor = DecorCache::new();

        let axes = cache.register(PrimitiveKind::Grid);
        let (window_a, window_b) = MockBackend::surface_id_pair();
        let verts = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];

        let (buf_a, _) = decor
            .upload(&mut backend, &mut ring, window_a, axes, DecorKind::GridLines, &verts)
            .unwrap()
            .unwrap();
        let (buf_b, _) = decor
            .upload(&mut backend, &mut ring, window_b, axes, DecorKind::GridLines, &verts)
            .unwrap()
            .unwrap();
        assert_ne!(buf_a, buf_b);

        decor.remove_surface(&mut ring, window_a);
        assert_eq!(ring.pending(), 1);
    }
}

//! Cached resource: lifecycle state, bookkeeping, typed payload
//!
//! A `Resource` is shared between the render thread and the data thread.
//! The header fields are atomics; the decoded payload is published before
//! the `Ready` state is release-stored, so any thread that acquires `Ready`
//! also sees the payload.

use crate::core::types::DMat4;
use crate::map::config::{BoundLayerConfig, MapConfig};
use crate::tile::{BoundMetaTile, MetaTile};
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Lifecycle state of a cached resource
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ResourceState {
    /// Created or reset; waiting to be scheduled for fetch
    Initializing = 0,
    /// Fetch in flight
    Downloading,
    /// Fetch finished, decode pending
    Downloaded,
    /// Decoded and uploaded; payload readable
    Ready,
    /// Gave up after transient failures
    Failed,
    /// Permanently unavailable; never retried
    Invalid,
}

impl ResourceState {
    fn from_u8(v: u8) -> ResourceState {
        match v {
            0 => ResourceState::Initializing,
            1 => ResourceState::Downloading,
            2 => ResourceState::Downloaded,
            3 => ResourceState::Ready,
            4 => ResourceState::Failed,
            _ => ResourceState::Invalid,
        }
    }
}

/// Three-valued readiness used throughout traversal
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Validity {
    Valid,
    Indeterminate,
    Invalid,
}

/// What a resource's payload is expected to decode into
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    RawBuffer,
    Texture,
    Mesh,
    MetaTile,
    MeshAggregate,
    BoundMetaTile,
    BoundLayerConfig,
    MapConfig,
    GeodataFeatures,
    GeodataStyle,
}

/// Opaque handle produced by the GPU upload sink
pub type GpuHandle = Arc<dyn Any + Send + Sync>;

/// An uploaded texture
#[derive(Clone)]
pub struct GpuTexture {
    pub handle: GpuHandle,
    pub width: u32,
    pub height: u32,
}

/// An uploaded mesh
#[derive(Clone)]
pub struct GpuMesh {
    pub handle: GpuHandle,
    pub vertex_count: u32,
}

/// One submesh of a mesh aggregate, with its placement and texturing mode
#[derive(Clone)]
pub struct MeshPart {
    pub mesh: GpuMesh,
    /// Normalized-tile to physical-SRS transform
    pub norm_to_phys: DMat4,
    pub internal_uv: bool,
    pub external_uv: bool,
    /// Bound layer baked into the mesh, drawn on top of the view's list
    pub texture_layer: Option<String>,
    /// 1-based member index for glue bound-layer lookup
    pub surface_reference: u32,
}

/// All submeshes of one tile mesh
pub struct MeshAggregate {
    pub submeshes: Vec<MeshPart>,
}

/// Decoded payload of a `Ready` resource
#[derive(Clone)]
pub enum ResourcePayload {
    RawBuffer(Arc<[u8]>),
    Texture(GpuTexture),
    Mesh(GpuMesh),
    MetaTile(Arc<MetaTile>),
    MeshAggregate(Arc<MeshAggregate>),
    BoundMetaTile(Arc<BoundMetaTile>),
    BoundLayerConfig(Arc<BoundLayerConfig>),
    MapConfig(Arc<MapConfig>),
    GeodataFeatures(Arc<[u8]>),
    GeodataStyle(Arc<[u8]>),
}

/// Frames before the first retry; doubled on every further retry
const RETRY_BASE_TICKS: u64 = 8;
/// Backoff doubling stops here so the shift cannot overflow
const RETRY_MAX_SHIFT: u32 = 10;

/// Frames to wait before retry number `retry_number`
pub fn backoff_ticks(retry_number: u32) -> u64 {
    RETRY_BASE_TICKS << retry_number.min(RETRY_MAX_SHIFT)
}

/// One cached, shared resource; see the module docs for the threading rules
pub struct Resource {
    url: String,
    kind: ResourceKind,
    state: AtomicU8,
    /// f32 bits; NaN marks "unprioritised"
    priority: AtomicU32,
    last_access_tick: AtomicU64,
    ram_cost: AtomicUsize,
    gpu_cost: AtomicUsize,
    retry_number: AtomicU32,
    retry_after_tick: AtomicU64,
    /// Scheduler-queue membership marker; prevents duplicate enqueues
    pub(crate) queued: AtomicBool,
    payload: Mutex<Option<ResourcePayload>>,
    user_data: Mutex<Option<GpuHandle>>,
}

impl Resource {
    pub fn new(url: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            url: url.into(),
            kind,
            state: AtomicU8::new(ResourceState::Initializing as u8),
            priority: AtomicU32::new(f32::NAN.to_bits()),
            last_access_tick: AtomicU64::new(0),
            ram_cost: AtomicUsize::new(0),
            gpu_cost: AtomicUsize::new(0),
            retry_number: AtomicU32::new(0),
            retry_after_tick: AtomicU64::new(0),
            queued: AtomicBool::new(false),
            payload: Mutex::new(None),
            user_data: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn state(&self) -> ResourceState {
        ResourceState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ResourceState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn validity(&self) -> Validity {
        match self.state() {
            ResourceState::Ready => Validity::Valid,
            ResourceState::Failed | ResourceState::Invalid => Validity::Invalid,
            _ => Validity::Indeterminate,
        }
    }

    pub fn priority(&self) -> f32 {
        f32::from_bits(self.priority.load(Ordering::Relaxed))
    }

    /// Raise the priority to at least `p`; NaN-initialised priorities take
    /// any value
    pub fn update_priority(&self, p: f32) {
        let mut current = self.priority.load(Ordering::Relaxed);
        loop {
            let value = f32::from_bits(current);
            if !value.is_nan() && value >= p {
                return;
            }
            match self.priority.compare_exchange_weak(
                current,
                p.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Forget the priority; done at every frame boundary
    pub(crate) fn reset_priority(&self) {
        self.priority.store(f32::NAN.to_bits(), Ordering::Relaxed);
    }

    pub fn last_access_tick(&self) -> u64 {
        self.last_access_tick.load(Ordering::Relaxed)
    }

    pub(crate) fn touch(&self, tick: u64) {
        self.last_access_tick.fetch_max(tick, Ordering::Relaxed);
    }

    pub fn ram_cost(&self) -> usize {
        self.ram_cost.load(Ordering::Relaxed)
    }

    pub fn gpu_cost(&self) -> usize {
        self.gpu_cost.load(Ordering::Relaxed)
    }

    pub fn retry_number(&self) -> u32 {
        self.retry_number.load(Ordering::Relaxed)
    }

    pub fn retry_after_tick(&self) -> u64 {
        self.retry_after_tick.load(Ordering::Relaxed)
    }

    /// Whether the scheduler may pick this resource up now
    pub fn ready_for_fetch(&self, now: u64) -> bool {
        self.state() == ResourceState::Initializing && self.retry_after_tick() <= now
    }

    /// Snapshot of the payload; `Some` for any `Ready` resource
    pub fn payload(&self) -> Option<ResourcePayload> {
        self.payload.lock().unwrap().clone()
    }

    /// The opaque GPU object, set by the upload step only
    pub fn user_data(&self) -> Option<GpuHandle> {
        self.user_data.lock().unwrap().clone()
    }

    pub fn meta_tile(&self) -> Option<Arc<MetaTile>> {
        match self.payload() {
            Some(ResourcePayload::MetaTile(m)) => Some(m),
            _ => None,
        }
    }

    pub fn mesh_aggregate(&self) -> Option<Arc<MeshAggregate>> {
        match self.payload() {
            Some(ResourcePayload::MeshAggregate(m)) => Some(m),
            _ => None,
        }
    }

    pub fn bound_meta_tile(&self) -> Option<Arc<BoundMetaTile>> {
        match self.payload() {
            Some(ResourcePayload::BoundMetaTile(b)) => Some(b),
            _ => None,
        }
    }

    pub fn texture(&self) -> Option<GpuTexture> {
        match self.payload() {
            Some(ResourcePayload::Texture(t)) => Some(t),
            _ => None,
        }
    }

    pub fn map_config(&self) -> Option<Arc<MapConfig>> {
        match self.payload() {
            Some(ResourcePayload::MapConfig(c)) => Some(c),
            _ => None,
        }
    }

    pub fn geodata_features(&self) -> Option<Arc<[u8]>> {
        match self.payload() {
            Some(ResourcePayload::GeodataFeatures(g)) => Some(g),
            _ => None,
        }
    }

    pub fn geodata_style(&self) -> Option<Arc<[u8]>> {
        match self.payload() {
            Some(ResourcePayload::GeodataStyle(g)) => Some(g),
            _ => None,
        }
    }

    // --- Transitions driven by the data thread ---

    /// `Initializing` -> `Downloading`; false when another party got there
    /// first or the resource was purged meanwhile
    pub(crate) fn mark_downloading(&self) -> bool {
        self.queued.store(false, Ordering::Relaxed);
        self.state
            .compare_exchange(
                ResourceState::Initializing as u8,
                ResourceState::Downloading as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Store payload, GPU object, and costs, then release `Ready`
    pub(crate) fn publish(
        &self,
        payload: ResourcePayload,
        user_data: Option<GpuHandle>,
        ram_cost: usize,
        gpu_cost: usize,
    ) {
        *self.payload.lock().unwrap() = Some(payload);
        *self.user_data.lock().unwrap() = user_data;
        self.ram_cost.store(ram_cost, Ordering::Relaxed);
        self.gpu_cost.store(gpu_cost, Ordering::Relaxed);
        self.retry_number.store(0, Ordering::Relaxed);
        self.set_state(ResourceState::Ready);
    }

    /// Transient failure: back off and return to `Initializing`, or give up
    /// as `Failed` once the retry budget is spent; returns the new state
    pub(crate) fn fail_transient(&self, now: u64, max_retries: u32) -> ResourceState {
        let n = self.retry_number.fetch_add(1, Ordering::Relaxed) + 1;
        if n > max_retries {
            self.set_state(ResourceState::Failed);
            ResourceState::Failed
        } else {
            self.retry_after_tick
                .store(now + backoff_ticks(n), Ordering::Relaxed);
            self.set_state(ResourceState::Initializing);
            ResourceState::Initializing
        }
    }

    /// Permanent failure: never retried
    pub(crate) fn fail_permanent(&self) {
        self.set_state(ResourceState::Invalid);
    }

    /// Decode failure without a permanent diagnosis
    pub(crate) fn fail_decode(&self) {
        self.set_state(ResourceState::Failed);
    }

    /// Manual reset to `Initializing`: drops payload, GPU object, costs and
    /// retry history
    pub(crate) fn purge(&self) {
        *self.payload.lock().unwrap() = None;
        *self.user_data.lock().unwrap() = None;
        self.ram_cost.store(0, Ordering::Relaxed);
        self.gpu_cost.store(0, Ordering::Relaxed);
        self.retry_number.store(0, Ordering::Relaxed);
        self.retry_after_tick.store(0, Ordering::Relaxed);
        self.queued.store(false, Ordering::Relaxed);
        self.set_state(ResourceState::Initializing);
    }
}

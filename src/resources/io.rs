//! Collaborator seams: fetching, decoding, GPU upload, coordinate conversion
//!
//! The engine never talks HTTP, parses wire formats, or touches a GPU
//! context directly; integrators plug those in through the traits here. The
//! two formats the interface contract itself fixes (the JSON configuration
//! document and the bound-layer availability grid) come with ready-made
//! decode helpers.

use crate::core::types::{DMat4, DVec3};
use crate::map::config::{BoundLayerConfig, MapConfig};
use crate::resources::resource::{GpuHandle, ResourceKind};
use crate::tile::{BoundMetaTile, MetaTile};
use thiserror::Error;

/// One fetch request
#[derive(Clone, Debug)]
pub struct FetchQuery {
    pub url: String,
    pub kind: ResourceKind,
}

/// Result of one fetch; `status` follows HTTP semantics, 0 means the
/// transfer never completed (network failure, timeout)
#[derive(Clone, Debug)]
pub struct FetchReply {
    pub status: u32,
    pub body: Vec<u8>,
}

impl FetchReply {
    pub fn ok(body: Vec<u8>) -> Self {
        Self { status: 200, body }
    }

    pub fn error(status: u32) -> Self {
        Self { status, body: Vec::new() }
    }
}

/// Completion callback handed to the fetcher
pub type FetchDone = Box<dyn FnOnce(FetchReply) + Send + 'static>;

/// Asynchronous download collaborator
///
/// `fetch` must not block; the callback may fire on any thread, including
/// the calling one. Concurrency inside the fetcher is its own business; the
/// scheduler bounds how many fetches it keeps in flight.
pub trait Fetcher: Send + Sync + 'static {
    fn fetch(&self, query: FetchQuery, done: FetchDone);
}

/// Decode failure
///
/// `permanent` failures (schema or format violations) mark the resource
/// permanently unavailable; anything else counts against the retry budget.
#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct DecodeError {
    pub message: String,
    pub permanent: bool,
}

impl DecodeError {
    pub fn permanent(message: impl Into<String>) -> Self {
        Self { message: message.into(), permanent: true }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self { message: message.into(), permanent: false }
    }
}

/// A decoded texture, pre-upload
#[derive(Clone)]
pub struct DecodedTexture {
    pub width: u32,
    pub height: u32,
    pub components: u32,
    pub data: Vec<u8>,
}

impl DecodedTexture {
    pub fn byte_size(&self) -> usize {
        self.data.len()
    }
}

/// A decoded mesh, pre-upload
#[derive(Clone)]
pub struct DecodedMesh {
    pub vertex_count: u32,
    pub data: Vec<u8>,
}

/// One decoded submesh with its placement and texturing mode
#[derive(Clone)]
pub struct DecodedSubmesh {
    pub mesh: DecodedMesh,
    pub norm_to_phys: DMat4,
    pub internal_uv: bool,
    pub external_uv: bool,
    pub texture_layer: Option<String>,
    pub surface_reference: u32,
}

/// A decoded tile mesh
#[derive(Clone)]
pub struct DecodedMeshAggregate {
    pub submeshes: Vec<DecodedSubmesh>,
}

/// CPU-side decode result, before the GPU upload step
#[derive(Clone)]
pub enum DecodedResource {
    Buffer(Vec<u8>),
    Texture(DecodedTexture),
    Mesh(DecodedMesh),
    MetaTile(MetaTile),
    MeshAggregate(DecodedMeshAggregate),
    BoundMetaTile(BoundMetaTile),
    BoundLayerConfig(BoundLayerConfig),
    MapConfig(MapConfig),
    GeodataFeatures(Vec<u8>),
    GeodataStyle(Vec<u8>),
}

/// Wire-format deserialiser collaborator
pub trait ResourceDecoder: Send + Sync + 'static {
    fn decode(
        &self,
        kind: ResourceKind,
        url: &str,
        bytes: &[u8],
    ) -> Result<DecodedResource, DecodeError>;
}

/// GPU upload sink; the only producer of resource `user_data`
pub trait GpuContext: Send + Sync + 'static {
    fn upload_texture(&self, texture: &DecodedTexture) -> Result<GpuHandle, DecodeError>;
    fn upload_mesh(&self, mesh: &DecodedMesh) -> Result<GpuHandle, DecodeError>;
}

/// Coordinate conversion collaborator
pub trait CoordConvertor: Send + Sync + 'static {
    /// Convert a physical-SRS point into the named SRS
    fn phys_to_srs(&self, srs: &str, point: DVec3) -> DVec3;
}

/// Convertor for planar reference frames where every SRS coincides
pub struct IdentityConvertor;

impl CoordConvertor for IdentityConvertor {
    fn phys_to_srs(&self, _srs: &str, point: DVec3) -> DVec3 {
        point
    }
}

/// Decode the JSON map-configuration document
pub fn decode_map_config(bytes: &[u8]) -> Result<MapConfig, DecodeError> {
    MapConfig::from_slice(bytes).map_err(|e| DecodeError::permanent(e.to_string()))
}

/// Decode a bound-layer availability grid
pub fn decode_bound_meta_tile(bytes: &[u8]) -> Result<BoundMetaTile, DecodeError> {
    BoundMetaTile::from_bytes(bytes.to_vec())
        .ok_or_else(|| DecodeError::permanent(format!(
            "bound metatile size {} != {}", bytes.len(), BoundMetaTile::CELLS
        )))
}

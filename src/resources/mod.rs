//! Resource cache, fetch scheduling, and collaborator seams

pub mod cache;
pub mod io;
pub mod resource;
pub mod scheduler;

pub use cache::ResourceCache;
pub use io::{
    CoordConvertor, DecodeError, DecodedResource, FetchQuery, FetchReply, Fetcher, GpuContext,
    IdentityConvertor, ResourceDecoder,
};
pub use resource::{
    GpuHandle, GpuMesh, GpuTexture, MeshAggregate, MeshPart, Resource, ResourceKind,
    ResourcePayload, ResourceState, Validity,
};
pub use scheduler::FetchScheduler;

//! Shared mocks and fixtures for the test suite

use crate::camera::camera::CameraView;
use crate::core::types::{DMat4, DVec3};
use crate::map::config::MapConfig;
use crate::resources::io::{
    DecodeError, DecodedResource, FetchDone, FetchQuery, FetchReply, Fetcher, GpuContext,
    ResourceDecoder,
};
use crate::resources::resource::{GpuHandle, ResourceKind};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Configuration exercising surfaces, glues, virtual surfaces, bound
/// layers of every flavour, and a monolithic free layer
pub const RICH_JSON: &str = r#"{
    "referenceFrame": {
        "physicalSrs": "phys",
        "navigationSrs": "nav",
        "publicSrs": "pub",
        "body": { "majorRadius": 6378137.0, "minorRadius": 6356752.0 }
    },
    "surfaces": [
        {
            "id": "base",
            "lodRange": [0, 18],
            "metaUrl": "base-meta-{lod}-{x}-{y}",
            "meshUrl": "base-mesh-{lod}-{x}-{y}",
            "textureUrl": "base-tex-{lod}-{x}-{y}-{sub}"
        },
        {
            "id": "over",
            "lodRange": [0, 12],
            "metaUrl": "over-meta-{lod}-{x}-{y}",
            "meshUrl": "over-mesh-{lod}-{x}-{y}",
            "textureUrl": "over-tex-{lod}-{x}-{y}-{sub}"
        }
    ],
    "glues": [
        {
            "id": ["base", "over"],
            "lodRange": [0, 12],
            "metaUrl": "glue-meta-{lod}-{x}-{y}",
            "meshUrl": "glue-mesh-{lod}-{x}-{y}",
            "textureUrl": "glue-tex-{lod}-{x}-{y}-{sub}"
        }
    ],
    "virtualSurfaces": [
        {
            "id": ["base", "over"],
            "mapping": [[0], [1], [0, 1]],
            "lodRange": [0, 18],
            "metaUrl": "vs-meta-{lod}-{x}-{y}",
            "meshUrl": "vs-mesh-{lod}-{x}-{y}",
            "textureUrl": "vs-tex-{lod}-{x}-{y}-{sub}"
        }
    ],
    "boundLayers": [
        {
            "id": "ortho",
            "lodRange": [0, 18],
            "tileRange": [[0, 0], [262143, 262143]],
            "url": "ortho-{lod}-{x}-{y}",
            "credits": ["cr"]
        },
        {
            "id": "glass",
            "lodRange": [0, 18],
            "tileRange": [[0, 0], [262143, 262143]],
            "url": "glass-{lod}-{x}-{y}",
            "isTransparent": true
        },
        {
            "id": "capped",
            "lodRange": [2, 8],
            "tileRange": [[0, 0], [3, 3]],
            "url": "capped-{lod}-{x}-{y}"
        },
        {
            "id": "narrow",
            "lodRange": [2, 18],
            "tileRange": [[0, 0], [1, 1]],
            "url": "narrow-{lod}-{x}-{y}"
        },
        {
            "id": "gated",
            "lodRange": [0, 18],
            "tileRange": [[0, 0], [262143, 262143]],
            "url": "gated-{lod}-{x}-{y}",
            "maskUrl": "gated-mask-{lod}-{x}-{y}",
            "metaUrl": "gated-meta-{lod}-{x}-{y}"
        }
    ],
    "credits": { "cr": { "id": 7, "notice": "(c) imagery provider" } },
    "freeLayers": {
        "pois": {
            "styleUrl": "style.json",
            "geodataUrl": "geo-{lod}-{x}-{y}",
            "lodRange": [0, 4],
            "extents": [[-100.0, -100.0, -10.0], [100.0, 100.0, 10.0]],
            "monolithic": true
        }
    },
    "views": [
        {
            "surfaces": { "base": [ { "id": "ortho" } ], "over": [] },
            "freeLayers": ["pois"]
        }
    ]
}"#;

pub fn test_config() -> MapConfig {
    MapConfig::from_slice(RICH_JSON.as_bytes()).unwrap()
}

/// A view from `(0, 0, distance)` toward the origin
pub fn view_from(distance: f64) -> CameraView {
    let eye = DVec3::new(0.0, 0.0, distance);
    CameraView {
        view: DMat4::look_at_rh(eye, DVec3::ZERO, DVec3::Y),
        proj: DMat4::perspective_rh(60f64.to_radians(), 1.0, 0.1, 1e9),
        eye_phys: eye,
        focus_phys: DVec3::ZERO,
        viewport_height: 1000,
        fov_y: 60f64.to_radians(),
    }
}

/// Fetcher serving scripted replies; completes synchronously on the
/// calling thread and records fetch order
pub struct MockFetcher {
    replies: Mutex<HashMap<String, VecDeque<FetchReply>>>,
    log: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn push_reply(&self, url: &str, reply: FetchReply) {
        self.replies
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(reply);
    }

    /// URLs fetched so far, in order
    pub fn fetched(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

impl Fetcher for MockFetcher {
    fn fetch(&self, query: FetchQuery, done: FetchDone) {
        self.log.lock().unwrap().push(query.url.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get_mut(&query.url)
            .and_then(|q| q.pop_front())
            .unwrap_or_else(|| FetchReply::error(404));
        done(reply);
    }
}

/// Fetcher that parks callbacks until the test completes them
pub struct DeferredFetcher {
    pending: Mutex<VecDeque<(String, FetchDone)>>,
}

impl DeferredFetcher {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Complete the oldest parked fetch; false when none are parked
    pub fn complete_next(&self, reply: FetchReply) -> bool {
        let parked = self.pending.lock().unwrap().pop_front();
        match parked {
            Some((_, done)) => {
                done(reply);
                true
            }
            None => false,
        }
    }
}

impl Fetcher for DeferredFetcher {
    fn fetch(&self, query: FetchQuery, done: FetchDone) {
        self.pending.lock().unwrap().push_back((query.url, done));
    }
}

/// Decoder serving pre-built payloads by URL; anything unknown is a
/// permanent decode error
pub struct MockDecoder {
    items: Mutex<HashMap<String, DecodedResource>>,
}

impl MockDecoder {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, url: &str, item: DecodedResource) {
        self.items.lock().unwrap().insert(url.to_string(), item);
    }
}

impl ResourceDecoder for MockDecoder {
    fn decode(
        &self,
        _kind: ResourceKind,
        url: &str,
        _bytes: &[u8],
    ) -> Result<DecodedResource, DecodeError> {
        self.items
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| DecodeError::permanent(format!("no decode fixture for {url}")))
    }
}

/// Upload sink producing unit handles
pub struct NullGpu;

impl GpuContext for NullGpu {
    fn upload_texture(
        &self,
        _texture: &crate::resources::io::DecodedTexture,
    ) -> Result<GpuHandle, DecodeError> {
        let handle: GpuHandle = Arc::new(());
        Ok(handle)
    }

    fn upload_mesh(
        &self,
        _mesh: &crate::resources::io::DecodedMesh,
    ) -> Result<GpuHandle, DecodeError> {
        let handle: GpuHandle = Arc::new(());
        Ok(handle)
    }
}
